//! Error types for the pesift-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate,
//! with detailed error variants for different failure modes, plus the classifier
//! that decides whether a directory-enumeration failure is recoverable.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pesift operations
pub type Result<T> = std::result::Result<T, Error>;

/// Validation pipeline stage at which an I/O operation failed.
///
/// Each stage gets its own tag so diagnostics can distinguish, for example,
/// the initial open from the rewind that happens after the signature peek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStage {
    /// Opening the file for binary read
    Open,
    /// Seeking to the start of the file
    SeekStart,
    /// Reading the two signature bytes
    ReadSignature,
    /// Re-seeking to the start after the signature peek
    Rewind,
    /// Reading the complete file contents
    ReadAll,
}

impl IoStage {
    /// Short human-readable label used in diagnostic lines
    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::SeekStart => "seek (1)",
            Self::ReadSignature => "read signature",
            Self::Rewind => "seek (2)",
            Self::ReadAll => "read",
        }
    }
}

/// Why a candidate was rejected on size grounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeReason {
    /// File is zero bytes long
    Empty,
    /// File length does not fit the format's 32-bit size field
    TooLarge,
    /// Buffer allocation for the file failed
    AllocFailed,
}

/// Comprehensive error type for all pesift operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O operation in the validation pipeline failed
    #[error("{} failed for '{path}': {source}", .stage.label())]
    Io {
        /// Pipeline stage that failed
        stage: IoStage,
        /// Path to the file being validated
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Candidate rejected before parsing because of its size
    #[error("size rejected for '{path}': {reason:?}")]
    SizeRejected {
        /// Path to the rejected file
        path: PathBuf,
        /// Which size check failed
        reason: SizeReason,
    },

    /// Candidate rejected by one of the two format checks
    #[error("not a PE file '{path}' (pass {pass})")]
    FormatRejected {
        /// Path to the rejected file
        path: PathBuf,
        /// Which check rejected it: 1 = magic sniff, 2 = header probe
        pass: u8,
    },

    /// Directory enumeration failed fatally
    #[error("failed to enumerate '{path}': {source}")]
    Enumeration {
        /// Directory being enumerated
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Buffer failed structural image validation
    #[error("invalid PE image: {0}")]
    BadImage(String),

    /// The worker pool has shut down and no longer accepts tasks
    #[error("worker pool is closed")]
    PoolClosed,

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new pipeline I/O error
    pub fn io(stage: IoStage, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            stage,
            path: path.into(),
            source,
        }
    }

    /// Creates a new size rejection
    pub fn size_rejected(path: impl Into<PathBuf>, reason: SizeReason) -> Self {
        Self::SizeRejected {
            path: path.into(),
            reason,
        }
    }

    /// Creates a new format rejection for the given validation pass
    pub fn format_rejected(path: impl Into<PathBuf>, pass: u8) -> Self {
        Self::FormatRejected {
            path: path.into(),
            pass,
        }
    }

    /// Creates a new fatal enumeration error
    pub fn enumeration(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Enumeration {
            path: path.into(),
            source,
        }
    }

    /// Creates a new structural validation error
    pub fn bad_image(msg: impl Into<String>) -> Self {
        Self::BadImage(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error is scoped to a single file and should be
    /// skipped rather than aborting the walk
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::SizeRejected { .. }
                | Self::FormatRejected { .. }
                | Self::BadImage(_)
        )
    }
}

/// Classification of a directory-enumeration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationClass {
    /// Failure scoped to one entry; log it and continue with its siblings
    RecoverableEntry,
    /// Directory open signalled "nothing here"; treat as an empty directory
    RecoverableEmpty,
    /// Anything else; abort the enclosing subtree walk
    Fatal,
}

/// Windows sharing-violation OS error code (`ERROR_SHARING_VIOLATION`)
#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;

/// `EAGAIN` / `EBUSY`, the closest Unix analogues of a sharing violation
#[cfg(unix)]
const BUSY_ERRNOS: [i32; 2] = [11, 16];

fn is_sharing_violation(err: &io::Error) -> bool {
    #[cfg(windows)]
    if err.raw_os_error() == Some(ERROR_SHARING_VIOLATION) {
        return true;
    }
    #[cfg(unix)]
    if matches!(err.raw_os_error(), Some(code) if BUSY_ERRNOS.contains(&code)) {
        return true;
    }
    false
}

/// Classifies a failure that occurred while enumerating entries of an open
/// directory.
///
/// Sharing violations, access denied and entries that vanished between
/// enumeration and inspection are per-entry recoverable. Everything else
/// aborts the subtree.
pub fn classify_entry_error(err: &io::Error) -> EnumerationClass {
    if is_sharing_violation(err) {
        return EnumerationClass::RecoverableEntry;
    }
    match err.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound => {
            EnumerationClass::RecoverableEntry
        }
        _ => EnumerationClass::Fatal,
    }
}

/// Classifies a failure opening a directory for its first enumeration call.
///
/// Not-found on the initial open means the directory raced away or has no
/// entries; both are reported as an empty directory. Access denied on the
/// open is informational. Anything else is fatal.
pub fn classify_open_error(err: &io::Error) -> EnumerationClass {
    match err.kind() {
        io::ErrorKind::NotFound => EnumerationClass::RecoverableEmpty,
        io::ErrorKind::PermissionDenied => EnumerationClass::RecoverableEntry,
        _ => EnumerationClass::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::format_rejected("/bin/data", 1);
        assert!(err.to_string().contains("pass 1"));
        assert!(err.to_string().contains("/bin/data"));
    }

    #[test]
    fn test_io_stage_labels_distinct() {
        // The two seek stages must be distinguishable in diagnostics
        assert_ne!(IoStage::SeekStart.label(), IoStage::Rewind.label());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::size_rejected("/x", SizeReason::Empty).is_recoverable());
        assert!(Error::format_rejected("/x", 2).is_recoverable());
        assert!(!Error::PoolClosed.is_recoverable());
        assert!(!Error::enumeration("/x", io::Error::new(io::ErrorKind::Other, "boom")).is_recoverable());
    }

    #[test]
    fn test_classify_entry_error() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(
            classify_entry_error(&denied),
            EnumerationClass::RecoverableEntry
        );

        let gone = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(
            classify_entry_error(&gone),
            EnumerationClass::RecoverableEntry
        );

        let other = io::Error::new(io::ErrorKind::Other, "disk fell off");
        assert_eq!(classify_entry_error(&other), EnumerationClass::Fatal);
    }

    #[test]
    fn test_classify_open_error() {
        let gone = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(
            classify_open_error(&gone),
            EnumerationClass::RecoverableEmpty
        );

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(
            classify_open_error(&denied),
            EnumerationClass::RecoverableEntry
        );

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(classify_open_error(&other), EnumerationClass::Fatal);
    }
}
