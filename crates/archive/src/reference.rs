//! Docker-style image references (`[domain/]path[:tag][@digest]`).
//!
//! Parsing follows the normalization rules of the docker CLI, so that a tag
//! written as `busybox` on the command line and one stored in an archive as
//! `docker.io/library/busybox:latest` compare equal once normalized.

use crate::error::{ErrorKind, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

pub const DEFAULT_DOMAIN: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const NAME_TOTAL_LENGTH_MAX: usize = 255;

const DOMAIN_COMPONENT: &str = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
const PATH_COMPONENT: &str = r"[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*";
const TAG: &str = r"[\w][\w.-]{0,127}";
const DIGEST: &str = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

regex!(
    REFERENCE_REGEX,
    format!(
        r"^((?:{DOMAIN_COMPONENT}(?:\.{DOMAIN_COMPONENT})*(?::[0-9]+)?/)?{PATH_COMPONENT}(?:/{PATH_COMPONENT})*)(?::({TAG}))?(?:@({DIGEST}))?$"
    )
    .as_str()
);
regex!(ANCHORED_IDENTIFIER_REGEX, r"^[a-f0-9]{64}$");

/// A parsed, normalized image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub domain: String,
    /// Repository path within the domain, e.g. `library/busybox`.
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference as a user would type it, filling in the default
    /// domain and the `library/` namespace for official images.
    ///
    /// # Examples
    ///
    /// ```
    /// use tarn_archive::ImageReference;
    ///
    /// let reference = ImageReference::parse_normalized("busybox:1.36").unwrap();
    /// assert_eq!(reference.to_string(), "docker.io/library/busybox:1.36");
    ///
    /// let reference = ImageReference::parse_normalized("ghcr.io/org/app").unwrap();
    /// assert_eq!(reference.with_default_tag().to_string(), "ghcr.io/org/app:latest");
    ///
    /// assert!(ImageReference::parse_normalized("Busybox").is_err());
    /// ```
    pub fn parse_normalized(input: &str) -> Result<Self> {
        if ANCHORED_IDENTIFIER_REGEX.is_match(input) {
            exn::bail!(ErrorKind::ParseError(format!(
                "invalid repository name ({input}), cannot specify 64-byte hexadecimal strings"
            )));
        }
        let (domain, remainder) = split_domain(input);
        let remote_name = remainder.split([':', '@']).next().unwrap_or_default();
        if remote_name.to_lowercase() != remote_name {
            exn::bail!(ErrorKind::ParseError(format!("invalid reference format: repository name must be lowercase: {input}")));
        }
        Self::parse(&format!("{domain}/{remainder}"))
    }

    /// Parse a fully qualified reference, without any normalization.
    fn parse(input: &str) -> Result<Self> {
        let Some(captures) = REFERENCE_REGEX.captures(input) else {
            exn::bail!(ErrorKind::ParseError(format!("invalid reference format: {input}")));
        };
        let name = captures.get(1).map_or("", |m| m.as_str());
        if name.len() > NAME_TOTAL_LENGTH_MAX {
            exn::bail!(ErrorKind::ParseError(format!(
                "repository name must not be more than {NAME_TOTAL_LENGTH_MAX} characters: {input}"
            )));
        }
        let Some((domain, path)) = name.split_once('/') else {
            exn::bail!(ErrorKind::ParseError(format!("reference has no domain: {input}")));
        };
        Ok(Self {
            domain: domain.to_string(),
            path: path.to_string(),
            tag: captures.get(2).map(|m| m.as_str().to_string()),
            digest: captures.get(3).map(|m| m.as_str().to_string()),
        })
    }

    /// `domain/path`, without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Add the `latest` tag to a reference that has neither tag nor digest.
    pub fn with_default_tag(mut self) -> Self {
        if self.tag.is_none() && self.digest.is_none() {
            self.tag = Some(DEFAULT_TAG.to_string());
        }
        self
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Split off the domain. The first element counts as a domain only if it
/// looks like a host (`.` or `:` in it, `localhost`, or uppercase letters).
fn split_domain(input: &str) -> (&str, String) {
    let (mut domain, remainder) = match input.split_once('/') {
        Some((first, rest))
            if first.contains(['.', ':']) || first == "localhost" || first.to_lowercase() != first =>
        {
            (first, rest.to_string())
        },
        _ => (DEFAULT_DOMAIN, input.to_string()),
    };
    if domain == LEGACY_DEFAULT_DOMAIN {
        domain = DEFAULT_DOMAIN;
    }
    if domain == DEFAULT_DOMAIN && !remainder.contains('/') {
        return (domain, format!("{OFFICIAL_REPO_PREFIX}{remainder}"));
    }
    (domain, remainder)
}
