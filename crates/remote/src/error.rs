//! Remote Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! The [`std::io`] trait implementations on [`RemoteFile`](crate::RemoteFile)
//! can't return an [`Exn`](exn::Exn), so [`into_io`] flattens the error into an
//! [`io::Error`](IoError) that still carries the [`ErrorKind`] as its payload.
//! Recover it with `err.get_ref().and_then(|e| e.downcast_ref::<ErrorKind>())`.

use derive_more::{Display, Error};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};

/// A remote access error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote access operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Object does not exist in the remote store.
    #[display("object not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Address could not be parsed into a bucket and key.
    #[display("invalid address: {_0}")]
    InvalidAddress(#[error(not(source))] String),
    /// Byte range is empty, inverted, or doesn't match the output buffer.
    #[display("invalid byte range [{begin}, {end})")]
    InvalidRange { begin: u64, end: u64 },
    /// Offset plus read length overflows the addressable range.
    #[display("invalid offset: {_0}")]
    InvalidOffset(#[error(not(source))] u64),
    /// Seek would move the cursor before the start of the object.
    #[display("invalid seek position: {_0}")]
    InvalidPosition(#[error(not(source))] i128),
    /// Remote fetch failed (connection, service error, truncated response).
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Fetch was cancelled through the handle's cancellation token.
    #[display("fetch cancelled")]
    Cancelled,
    /// Fetch did not complete before the configured deadline.
    #[display("fetch deadline exceeded")]
    DeadlineExceeded,
    /// Backing runtime is gone, or the handle was closed.
    #[display("remote handle closed")]
    Closed,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::DeadlineExceeded)
    }

    fn io_kind(&self) -> IoErrorKind {
        match self {
            Self::NotFound(_) => IoErrorKind::NotFound,
            Self::InvalidAddress(_) | Self::InvalidRange { .. } | Self::InvalidOffset(_) | Self::InvalidPosition(_) => {
                IoErrorKind::InvalidInput
            },
            Self::DeadlineExceeded => IoErrorKind::TimedOut,
            // Never `Interrupted`: std's read loops would silently retry a
            // cancelled fetch.
            Self::Network(_) | Self::Cancelled | Self::Closed => IoErrorKind::Other,
        }
    }
}

/// Flatten an [`Error`] into an [`IoError`] for the [`std::io`] traits.
///
/// The error tree is logged at debug level before it is discarded; the
/// [`ErrorKind`] survives as the payload of the returned error.
pub fn into_io(err: Error) -> IoError {
    tracing::debug!(error = ?err, "Remote read failed");
    let kind = (*err).clone();
    IoError::new(kind.io_kind(), kind)
}

/// Recover the [`ErrorKind`] from an [`IoError`] produced by [`into_io`].
pub fn from_io(err: &IoError) -> Option<&ErrorKind> {
    err.get_ref().and_then(|inner| inner.downcast_ref::<ErrorKind>())
}
