pub mod config;
pub mod engine;
pub mod error;
pub mod estimation;
pub mod market_data;
pub mod metrics;
pub mod optimization;
pub mod reconciliation;
pub mod types;

pub use config::EngineConfig;
pub use error::QpoError;
pub use types::*;

/// Standard result type for all engine operations
pub type QpoResult<T> = Result<T, QpoError>;
