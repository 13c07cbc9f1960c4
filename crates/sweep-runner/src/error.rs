use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("series not found: {0}")]
    SeriesNotFound(String),
    #[error("run index {index} out of range for series {series} ({len} configurations)")]
    IndexOutOfRange {
        series: String,
        index: usize,
        len: usize,
    },
    /// Execution succeeded but its output could not be decoded.
    #[error("failed to decode output of run {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid sweep: {0}")]
    InvalidSweep(String),
    #[error("invalid run outcome: {0}")]
    InvalidOutcome(String),
    #[error("store schema version {found} incompatible with expected {expected}")]
    SchemaVersion { found: i64, expected: i64 },
}

pub type Result<T> = std::result::Result<T, SweepError>;
