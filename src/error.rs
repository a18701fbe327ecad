//! Error Taxonomy
//!
//! Every receive operation in this crate is partial-success aware: when a
//! call fails, the bytes gathered before the failure travel with the error
//! instead of being dropped. [`TubeError`] is the carrier (kind + partial
//! bytes); [`TubeErrorKind`] is the taxonomy.
//!
//! Transport-side failures are sticky: once the underlying stream reports
//! EOF or an I/O error, later receives drain whatever is still buffered and
//! then keep surfacing the same kind. To make that possible the kind is a
//! plain clonable value — `std::io::Error` itself is not `Clone`, so the
//! `Transport` variant stores its kind and rendered message.

use std::io;

use thiserror::Error;

/// Convenience alias used by every fallible tube operation.
pub type Result<T> = std::result::Result<T, TubeError>;

/// The kinds of failure a tube operation can report.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TubeErrorKind {
    /// The configured receive timeout elapsed before the call was satisfied.
    #[error("tube read timeout")]
    Timeout,

    /// The transport reported end-of-stream and no buffered bytes remain
    /// beyond those carried with the error.
    #[error("end of stream")]
    Eof,

    /// The underlying read, write, or close failed.
    #[error("transport error: {message}")]
    Transport {
        /// The `std::io::ErrorKind` of the original error.
        kind: io::ErrorKind,
        /// The rendered message of the original error.
        message: String,
    },

    /// The operation was interrupted by [`Tube::close`](crate::Tube::close)
    /// from another task.
    #[error("operation cancelled")]
    Cancelled,

    /// The tube was already closed when the operation started.
    #[error("tube is closed")]
    Closed,

    /// The caller passed arguments the operation cannot act on.
    #[error("invalid argument: {0}")]
    InvalidInput(&'static str),
}

impl From<io::Error> for TubeErrorKind {
    fn from(err: io::Error) -> Self {
        Self::Transport {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// An error carrying the bytes gathered before the failure.
///
/// Callers that care about partial results inspect [`partial`](Self::partial)
/// (or destructure with [`into_parts`](Self::into_parts)); callers that do
/// not can treat this like any other error value.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct TubeError {
    kind: TubeErrorKind,
    partial: Vec<u8>,
}

impl TubeError {
    pub(crate) fn with_partial(kind: TubeErrorKind, partial: Vec<u8>) -> Self {
        Self { kind, partial }
    }

    /// The failure kind.
    #[must_use]
    pub fn kind(&self) -> &TubeErrorKind {
        &self.kind
    }

    /// The bytes delivered before the failure. Often empty.
    #[must_use]
    pub fn partial(&self) -> &[u8] {
        &self.partial
    }

    /// Split the error into its kind and partial bytes.
    #[must_use]
    pub fn into_parts(self) -> (TubeErrorKind, Vec<u8>) {
        (self.kind, self.partial)
    }

    /// True when the receive timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, TubeErrorKind::Timeout)
    }

    /// True when the transport reached end-of-stream.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TubeErrorKind::Eof)
    }
}

impl From<TubeErrorKind> for TubeError {
    fn from(kind: TubeErrorKind) -> Self {
        Self {
            kind,
            partial: Vec::new(),
        }
    }
}
