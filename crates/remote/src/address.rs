//! Object addressing.

use crate::error::{ErrorKind, Result};
use std::fmt;

/// URI scheme for objects in S3-compatible stores.
pub const SCHEME: &str = "s3://";

/// Location of one object in a remote store: a bucket and a key within it.
///
/// The key may be empty, which addresses the bucket itself. Stores will
/// report [`NotFound`](ErrorKind::NotFound) for that when probed, but the
/// address is still well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectAddress {
    pub bucket: String,
    pub key: String,
}

impl ObjectAddress {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), key: key.into() }
    }

    /// Parse an `s3://bucket/key` URI.
    ///
    /// # Examples
    ///
    /// ```
    /// use tarn_remote::ObjectAddress;
    ///
    /// let address = ObjectAddress::parse("s3://images/releases/app.tar").unwrap();
    /// assert_eq!(address.bucket, "images");
    /// assert_eq!(address.key, "releases/app.tar");
    ///
    /// assert!(ObjectAddress::parse("https://images/app.tar").is_err());
    /// ```
    pub fn parse(uri: &str) -> Result<Self> {
        let Some(location) = uri.strip_prefix(SCHEME) else {
            exn::bail!(ErrorKind::InvalidAddress(format!("address must begin with {SCHEME}: {uri}")));
        };
        Self::from_location(location)
    }

    /// Build an address from the part of a URI after the scheme
    /// (`bucket/key`).
    pub fn from_location(location: &str) -> Result<Self> {
        let (bucket, key) = location.split_once('/').unwrap_or((location, ""));
        if bucket.is_empty() {
            exn::bail!(ErrorKind::InvalidAddress(format!("missing bucket name: {SCHEME}{location}")));
        }
        Ok(Self::new(bucket, key))
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.bucket, self.key)
    }
}
