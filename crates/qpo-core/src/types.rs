use serde::{Deserialize, Serialize};

/// Instrument identifier. Positional order in a universe is significant.
pub type Ticker = String;

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "ieee754_f64".to_string(),
        },
    }
}

/// A single named weight in an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetWeight {
    pub ticker: Ticker,
    pub weight: f64,
}

/// Pair tickers with a positional weight vector.
pub fn named_weights(tickers: &[Ticker], weights: &[f64]) -> Vec<AssetWeight> {
    tickers
        .iter()
        .zip(weights.iter())
        .map(|(t, w)| AssetWeight {
            ticker: t.clone(),
            weight: *w,
        })
        .collect()
}
