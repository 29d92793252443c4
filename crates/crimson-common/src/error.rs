//! Error types for Crimson
//!
//! One closed error set covers every public operation in the store, the wire
//! protocol, and the write client. Errors are returned verbatim to the caller
//! of a public operation; nothing is recovered locally.

use std::sync::Arc;
use thiserror::Error;

/// Common result type for Crimson operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Crimson.
///
/// Cloneable so that a background failure (the write client's reader loop)
/// can be stored once and surfaced to several foreground callers.
#[derive(Clone, Debug, Error)]
pub enum Error {
    // "not found" family
    #[error("no such collection: {0}")]
    NoSuchCollection(String),

    #[error("no such object: {0}")]
    NoSuchObject(String),

    #[error("no such attribute key: {0}")]
    NoSuchAttributeKey(String),

    // "already exists" family
    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("object already exists: {0}")]
    ObjectExists(String),

    // precondition violations
    #[error("collection not empty: {0}")]
    CollectionNotEmpty(String),

    #[error("range [{offset}, +{length}) out of range for object of length {object_len}")]
    OutOfRange {
        offset: u64,
        length: u64,
        object_len: u64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // stale tokens
    #[error("invalid handle")]
    InvalidHandle,

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("operation not supported: {0}")]
    OperationNotSupported(&'static str),

    // transport
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchCollection(_) | Self::NoSuchObject(_) | Self::NoSuchAttributeKey(_)
        )
    }

    /// Check if this is an already exists error
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::CollectionExists(_) | Self::ObjectExists(_))
    }

    /// Map onto the conventional POSIX errno equivalent.
    ///
    /// Used for logging and as the wire error code in replies.
    #[must_use]
    pub fn errno(&self) -> u32 {
        match self {
            Self::NoSuchCollection(_) | Self::NoSuchObject(_) | Self::NoSuchAttributeKey(_) => {
                libc_errno::ENOENT
            }
            Self::CollectionExists(_) | Self::ObjectExists(_) => libc_errno::EEXIST,
            Self::CollectionNotEmpty(_) => libc_errno::ENOTEMPTY,
            Self::OutOfRange { .. }
            | Self::InvalidArgument(_)
            | Self::InvalidHandle
            | Self::InvalidCursor => libc_errno::EINVAL,
            Self::OperationNotSupported(_) => libc_errno::ENOTSUP,
            Self::Protocol(_) => libc_errno::EPROTO,
            Self::Closed => libc_errno::EPIPE,
            Self::Io(_) => libc_errno::EIO,
        }
    }

    /// Reconstruct the error family carried by a wire error code.
    ///
    /// The mapping is lossy in the reverse direction; codes outside the
    /// taxonomy come back as `Protocol`.
    #[must_use]
    pub fn from_errno(errno: u32, context: &str) -> Self {
        match errno {
            libc_errno::ENOENT => Self::NoSuchObject(context.to_string()),
            libc_errno::EEXIST => Self::ObjectExists(context.to_string()),
            libc_errno::ENOTEMPTY => Self::CollectionNotEmpty(context.to_string()),
            libc_errno::EINVAL => Self::InvalidArgument(context.to_string()),
            libc_errno::ENOTSUP => Self::OperationNotSupported("remote operation"),
            libc_errno::EPIPE => Self::Closed,
            _ => Self::Protocol(format!("remote error {errno}: {context}")),
        }
    }
}

/// The errno values we map onto, spelled out so no libc binding is needed.
mod libc_errno {
    pub const ENOENT: u32 = 2;
    pub const EIO: u32 = 5;
    pub const EEXIST: u32 = 17;
    pub const EINVAL: u32 = 22;
    pub const EPIPE: u32 = 32;
    pub const ENOTEMPTY: u32 = 39;
    pub const EPROTO: u32 = 71;
    pub const ENOTSUP: u32 = 95;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_families() {
        assert!(Error::NoSuchObject("o".into()).is_not_found());
        assert!(Error::NoSuchCollection("c".into()).is_not_found());
        assert!(!Error::Closed.is_not_found());
        assert!(Error::CollectionExists("c".into()).is_already_exists());
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NoSuchObject("o".into()).errno(), 2);
        assert_eq!(Error::ObjectExists("o".into()).errno(), 17);
        assert_eq!(
            Error::OutOfRange {
                offset: 0,
                length: 1,
                object_len: 0
            }
            .errno(),
            22
        );
        assert_eq!(Error::OperationNotSupported("clone").errno(), 95);
        assert_eq!(Error::CollectionNotEmpty("c".into()).errno(), 39);
    }

    #[test]
    fn test_from_errno_round_trip_family() {
        let err = Error::from_errno(Error::NoSuchObject("o".into()).errno(), "o");
        assert!(err.is_not_found());
        let err = Error::from_errno(9999, "mystery");
        assert!(matches!(err, Error::Protocol(_)));
    }
}
