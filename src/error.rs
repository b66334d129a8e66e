use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Emberdb errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Key, bucket, or element absent. A legitimate outcome of a lookup,
    /// not a failure of the call.
    NotFound,
    /// The entry exists but its TTL has elapsed. Reads treat this as
    /// NotFound; merge reclaims the record.
    Expired,
    /// The key alone would make the record exceed the segment size cap.
    KeyTooLarge,
    /// The serialized record (or a whole transaction group) would exceed
    /// the segment size cap.
    ValueTooLarge,
    /// Checksum mismatch or a structurally invalid record on a read.
    Corrupted(String),
    /// A record location points past the physical end of its segment.
    OutOfRange(String),
    /// An IO error.
    IO(String),
    /// An operation was attempted on a committed or rolled-back transaction.
    TxClosed,
    /// A mutation was attempted on a read transaction.
    TxReadOnly,
    /// The database directory is locked by another process.
    AlreadyOpen,
    /// Malformed bucket, key, range, or rank argument.
    InvalidArgument(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::Expired => write!(f, "entry expired"),
            Error::KeyTooLarge => write!(f, "key exceeds segment size"),
            Error::ValueTooLarge => write!(f, "record exceeds segment size"),
            Error::Corrupted(msg) => write!(f, "corrupted record: {msg}"),
            Error::OutOfRange(msg) => write!(f, "location out of range: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::TxClosed => write!(f, "transaction already finished"),
            Error::TxReadOnly => write!(f, "write attempted in a read transaction"),
            Error::AlreadyOpen => write!(f, "database directory locked by another process"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

/// Constructs an Error::Corrupted for the given format string.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::Corrupted(format!($($args)*)) };
}

/// Constructs an Error::InvalidArgument for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidArgument(format!($($args)*)) };
}

/// An emberdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = errdata!("bad checksum at offset {}", 42);
        assert_eq!(
            err.to_string(),
            "corrupted record: bad checksum at offset 42"
        );

        let err = errinput!("empty bucket name");
        assert_eq!(err.to_string(), "invalid argument: empty bucket name");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::IO(_)));
    }
}
