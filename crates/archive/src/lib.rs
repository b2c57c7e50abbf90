//! Random access to `docker save` image archives in remote object stores.
//!
//! An archive is never downloaded whole. [`ArchiveReader`] scans tar headers
//! through a block-cached [`RemoteFile`](tarn_remote::RemoteFile), reads the
//! small `manifest.json` and config blobs into memory under size limits, and
//! hands out [`ComponentReader`]s for layers that stream straight from the
//! store.
//!
//! [`ArchiveTransport`] wraps all of this behind the [`ImageTransport`]
//! capability that an image copy engine consumes, addressed with
//! [`ArchiveReference`]s such as `s3://bucket/images.tar:app:v2`.
//!
//! Reading archive bytes blocks on the network. The async entry points
//! ([`ArchiveReader::open`], [`ArchiveImage`]) move that work onto tokio's
//! blocking pool; the synchronous ones must be called from a blocking thread.

mod component;
pub mod error;
mod locate;
pub mod manifest;
mod options;
pub mod path;
mod reader;
pub mod reference;
#[cfg(test)]
mod testing;
mod transport;

pub use crate::component::ComponentReader;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::locate::{ArchiveComponent, ComponentLocator, SYMLINK_HOP_LIMIT};
pub use crate::manifest::ManifestItem;
pub use crate::options::ArchiveOptions;
pub use crate::reader::ArchiveReader;
pub use crate::reference::ImageReference;
pub use crate::transport::{ArchiveImage, ArchiveReference, ArchiveTransport, ImageTransport, TRANSPORT_NAME};
