//! Error kinds shared by the whole tool.
//!
//! Only `Usage` is fatal for the process. Every other kind is scoped to a single
//! job or traversal entry and ends up folded into the run's aggregate failure flag.

use std::io;

use thiserror::Error;

use crate::pipeline::bridge::{BridgeError, Stage};

/// Result type used throughout the crate.
pub type BzResult<T> = Result<T, BzError>;

#[derive(Debug, Error)]
pub enum BzError {
    /// Bad flag value or flag combination. Aborts before any job runs.
    #[error("{0}")]
    Usage(String),
    /// Missing file, directory where a file was expected, unsafe overwrite, bad name.
    #[error("{0}")]
    Path(String),
    /// Malformed compressed data found while decoding or testing.
    #[error("corrupted file or format error: {0}")]
    Codec(#[source] io::Error),
    /// Read, write or remove failure on the host filesystem.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BzError {
    pub fn usage<S: Into<String>>(msg: S) -> Self {
        BzError::Usage(msg.into())
    }

    pub fn path<S: Into<String>>(msg: S) -> Self {
        BzError::Path(msg.into())
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, BzError::Usage(_))
    }
}

impl From<BridgeError> for BzError {
    fn from(err: BridgeError) -> Self {
        match err.stage {
            Stage::Transform => BzError::Codec(err.source),
            Stage::Read | Stage::Write | Stage::Conduit => BzError::Io(err.source),
        }
    }
}
