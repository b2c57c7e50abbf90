//! Lexical handling of archive member names.
//!
//! Tar member names are `/`-separated byte strings, independent of the host
//! platform, so these helpers work on `&str` rather than [`std::path::Path`].
//! Nothing here touches a filesystem: a name that climbs out of the archive
//! with `..` is still a perfectly good name to compare against headers.

/// Shortest name equivalent to `path`, by purely lexical processing.
///
/// - repeated slashes collapse to one,
/// - `.` elements are dropped,
/// - `..` removes the preceding element, and is dropped at the root of a
///   rooted path but kept at the start of a relative one,
/// - an empty result becomes `.`.
///
/// # Examples
///
/// ```
/// use tarn_archive::path::clean;
///
/// assert_eq!(clean("./abc/def/../manifest.json"), "abc/manifest.json");
/// assert_eq!(clean("/../layer.tar"), "/layer.tar");
/// assert_eq!(clean("../../layer.tar"), "../../layer.tar");
/// assert_eq!(clean(""), ".");
/// ```
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    // Leading `..` elements of a relative path that can't be cancelled.
    let mut floor = 0;
    for part in path.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                if parts.len() > floor {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                    floor += 1;
                }
            },
            name => parts.push(name),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Every element of `path` except the last, cleaned.
///
/// ```
/// use tarn_archive::path::dir;
///
/// assert_eq!(dir("abc/def/layer.tar"), "abc/def");
/// assert_eq!(dir("layer.tar"), ".");
/// assert_eq!(dir("/layer.tar"), "/");
/// ```
pub fn dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => clean(&path[..=idx]),
        None => ".".to_string(),
    }
}

/// Join two names and clean the result. An absolute `name` does not reset to
/// the root; it is taken relative to `base`, the same as a relative one.
pub fn join(base: &str, name: &str) -> String {
    match (base.is_empty(), name.is_empty()) {
        (true, true) => String::new(),
        (true, false) => clean(name),
        (false, true) => clean(base),
        (false, false) => clean(&format!("{base}/{name}")),
    }
}
