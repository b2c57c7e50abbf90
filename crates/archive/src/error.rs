//! Archive Error Types
//!
//! Errors from the remote layer are re-raised with [`ErrorKind::remote`],
//! which keeps the remote error tree as a child frame.

use derive_more::{Display, Error};
use tarn_remote::error::{Error as RemoteError, ErrorKind as RemoteErrorKind};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reading the underlying remote object failed.
    #[display("remote error: {_0}")]
    Remote(RemoteErrorKind),
    /// No archive component, tag or object by this name.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Component is larger than the caller is willing to buffer.
    #[display("{path} exceeds the {limit} byte limit")]
    SizeLimitExceeded { path: String, limit: u64 },
    /// Manifest, tag or reference could not be parsed.
    #[display("parse error: {_0}")]
    ParseError(#[error(not(source))] String),
    /// No selector given, and the archive holds other than exactly one image.
    #[display("expected exactly 1 manifest item, found {_0}")]
    AmbiguousSelection(#[error(not(source))] usize),
    /// Tag and index selectors were combined, or one was malformed.
    #[display("invalid selector: {_0}")]
    InvalidSelector(#[error(not(source))] String),
    /// Index selector past the end of the manifest.
    #[display("source index @{index} out of range: {count} manifest items available")]
    OutOfRange { index: usize, count: usize },
    /// Component exists but is not a regular file (after following symlinks).
    #[display("not a regular file: {_0}")]
    NotARegularFile(#[error(not(source))] String),
    /// Archive is not a readable tar stream.
    #[display("invalid archive: {_0}")]
    InvalidArchive(#[error(not(source))] String),
    /// Operation the archive transport does not provide.
    #[display("unsupported: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// Reader was closed.
    #[display("archive reader closed")]
    Closed,
    /// A blocking task failed to complete.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Convert a remote error into an archive error, preserving the remote
    /// crate's `Exn` frame (error tree) as a child in its own error tree.
    ///
    /// A missing object surfaces as [`NotFound`](Self::NotFound); everything
    /// else as [`Remote`](Self::Remote).
    #[track_caller]
    pub fn remote(err: RemoteError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::from(inner))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(inner) => inner.is_retryable(),
            Self::Task => true,
            _ => false,
        }
    }
}

/// Classify an [`io::Error`](std::io::Error) surfaced while reading archive
/// bytes: remote failures keep their kind, anything else means the archive
/// itself is unreadable.
#[track_caller]
pub(crate) fn from_io(err: std::io::Error, context: impl std::fmt::Display) -> Error {
    match tarn_remote::error::from_io(&err) {
        Some(kind) => ErrorKind::remote(exn::Exn::from(kind.clone())),
        None => exn::Exn::from(ErrorKind::InvalidArchive(format!("{context}: {err}"))),
    }
}

impl From<RemoteErrorKind> for ErrorKind {
    fn from(kind: RemoteErrorKind) -> Self {
        match kind {
            RemoteErrorKind::NotFound(what) => Self::NotFound(what),
            other => Self::Remote(other),
        }
    }
}
