//! Error types for stayd.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StayError {
    #[error("Storage I/O error on {}: {source}", .path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sample log {} is corrupt: {reason}", .path.display())]
    StorageCorrupt { path: PathBuf, reason: String },

    #[error("Detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl StayError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StayError::StorageIo {
            path: path.into(),
            source,
        }
    }

    /// Errors that must stop the sampling loop. Everything else is logged
    /// and the next tick proceeds.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StayError::StorageCorrupt { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StayError::StorageIo { .. } => "storage-io",
            StayError::StorageCorrupt { .. } => "storage-corrupt",
            StayError::DetectorUnavailable(_) => "detector-unavailable",
            StayError::Notification(_) => "notification",
        }
    }
}
