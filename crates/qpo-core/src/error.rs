use thiserror::Error;

#[derive(Debug, Error)]
pub enum QpoError {
    #[error("Data availability: {0}")]
    DataAvailability(String),

    #[error("Data quality: {0}")]
    DataQuality(String),

    #[error("Insufficient data: need at least {required} valid return observations, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Dimension mismatch in {field}: expected {expected}, got {actual}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Portfolio has zero total value; nothing to rebalance")]
    ZeroPortfolioValue,

    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for QpoError {
    fn from(e: serde_json::Error) -> Self {
        QpoError::Serialization(e.to_string())
    }
}
