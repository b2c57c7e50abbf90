//! The `manifest.json` index of an image archive.

use crate::error::{self, ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;

pub const MEGABYTE: u64 = 1 << 20;
/// Name of the archive index member.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Largest `manifest.json` read into memory.
pub const MANIFEST_LIMIT: u64 = MEGABYTE;
/// Largest image config blob read into memory.
pub const CONFIG_LIMIT: u64 = 4 * MEGABYTE;

/// One image in the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestItem {
    /// Member name of the image config blob.
    pub config: String,
    /// Repository tags for the image, in archive order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub repo_tags: Vec<String>,
    /// Member names of the layer blobs, base layer first.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub layers: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse the contents of `manifest.json`.
pub fn parse_manifest(bytes: &[u8]) -> Result<Vec<ManifestItem>> {
    serde_json::from_slice(bytes).or_raise(|| ErrorKind::ParseError(format!("decoding {MANIFEST_FILE}")))
}

/// Read all of `reader`, failing with
/// [`SizeLimitExceeded`](ErrorKind::SizeLimitExceeded) as soon as more than
/// `limit` bytes turn up. `path` names the source in errors.
pub fn read_at_most(reader: impl Read, limit: u64, path: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| error::from_io(err, format!("reading {path}")))?;
    if bytes.len() as u64 > limit {
        exn::bail!(ErrorKind::SizeLimitExceeded { path: path.to_string(), limit });
    }
    Ok(bytes)
}
