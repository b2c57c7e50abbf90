//! Object store trait and implementations.
//!
//! This module defines the [`ObjectStore`] trait, the two operations a
//! [`RemoteFile`](crate::RemoteFile) needs from a remote store: learning an
//! object's size, and fetching a byte range of it. Stores are read-only from
//! this crate's point of view.

#[cfg(any(test, feature = "mock"))]
mod mock;
#[cfg(feature = "s3")]
mod s3;

#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockStore;
#[cfg(feature = "s3")]
pub use self::s3::S3Store;
use crate::address::ObjectAddress;
use crate::error::Result;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Object metadata returned by a store probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub address: ObjectAddress,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp, if the store reports one
    pub last_modified: Option<OffsetDateTime>,
    /// Entity tag, if the store reports one
    pub e_tag: Option<String>,
}

impl ObjectInfo {
    pub fn new(address: ObjectAddress, size: u64) -> Self {
        Self {
            address,
            size,
            last_modified: None,
            e_tag: None,
        }
    }
}

/// Read access to a remote object store.
///
/// All operations are asynchronous; [`RemoteFile`](crate::RemoteFile) drives
/// them from blocking code through a captured runtime handle.
///
/// # Examples
///
/// ```
/// use tarn_remote::{ObjectAddress, ObjectStore, error::Result};
///
/// async fn first_bytes(store: &dyn ObjectStore, address: &ObjectAddress) -> Result<Vec<u8>> {
///     let info = store.probe(address).await?;
///     let mut buf = vec![0; info.size.min(16) as usize];
///     let filled = store.fetch_range(address, 0, &mut buf).await?;
///     buf.truncate(filled);
///     Ok(buf)
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the store, used for logging only.
    fn name(&self) -> &str;

    /// Fetch object metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn probe(&self, address: &ObjectAddress) -> Result<ObjectInfo>;

    /// Fetch the bytes `[start, start + buf.len())` of an object into `buf`.
    ///
    /// Returns the number of bytes written, which is less than `buf.len()`
    /// only when the range runs past the end of the object. Bytes of `buf`
    /// past the returned count are left untouched.
    ///
    /// # Notes
    /// - Implementations must not retry; retry policy belongs to whoever
    ///   drives the reads.
    /// - Dropping the returned future abandons the request.
    async fn fetch_range(&self, address: &ObjectAddress, start: u64, buf: &mut [u8]) -> Result<usize>;
}
