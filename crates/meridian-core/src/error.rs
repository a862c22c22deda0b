use thiserror::Error;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("empty parameter grid: {0}")]
    EmptyGrid(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("timestamps out of order at row {index} (timestamp {timestamp})")]
    OutOfOrder { index: usize, timestamp: i64 },

    #[error("benchmark length {actual} does not match portfolio length {expected}")]
    BenchmarkLength { expected: usize, actual: usize },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("data error: {0}")]
    Data(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BacktestError {
    /// Configuration and input problems are rejected before any simulation
    /// runs; retrying with the same inputs cannot succeed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BacktestError::InvalidConfiguration(_)
                | BacktestError::EmptyGrid(_)
                | BacktestError::InvalidParameter { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
