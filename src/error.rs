use thiserror::Error;

/// Reasons the gaze capability could not be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("gaze capability unavailable: {0}")]
    CapabilityUnavailable(String),
}

/// Failures reported by a running gaze capability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GazeError {
    #[error("gaze capability is not running")]
    NotRunning,

    #[error("failed to record screen position ({x:.1}, {y:.1}): {reason}")]
    RecordFailed { x: f64, y: f64, reason: String },
}

/// Persistence failures. Reads never surface these; writes do.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
