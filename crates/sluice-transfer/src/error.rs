//! Transfer error types.
//!
//! Cancellation is not an error; see [`crate::TransferOutcome::Cancelled`].
//! Fast-path failures never surface here either: they trigger the fallback.

use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum TransferError {
    /// Read, write or seek failed after `transferred` bytes.
    Io { transferred: u64, source: io::Error },
    /// The source ended early.
    Incomplete { transferred: u64, expected: u64 },
    SourceNotFound(PathBuf),
    SourceIsDirectory(PathBuf),
}

impl TransferError {
    pub fn io(transferred: u64, source: io::Error) -> Self {
        Self::Io {
            transferred,
            source,
        }
    }

    /// Bytes written to the destination before the failure.
    pub fn transferred(&self) -> u64 {
        match self {
            Self::Io { transferred, .. } | Self::Incomplete { transferred, .. } => *transferred,
            Self::SourceNotFound(_) | Self::SourceIsDirectory(_) => 0,
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io {
                transferred,
                source,
            } => write!(f, "i/o error after {} bytes: {}", transferred, source),
            Self::Incomplete {
                transferred,
                expected,
            } => write!(f, "incomplete copy: {} < {} bytes", transferred, expected),
            Self::SourceNotFound(p) => write!(f, "source not found: {}", p.display()),
            Self::SourceIsDirectory(p) => write!(f, "source is a directory: {}", p.display()),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        Self::io(0, e)
    }
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;
