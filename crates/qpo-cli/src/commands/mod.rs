pub mod estimate;
pub mod optimize;
pub mod rebalance;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use qpo_core::EngineConfig;

use crate::input;

/// `--config` file, or defaults, with an optional seed applied to every
/// randomized component.
pub fn load_config(
    path: Option<&str>,
    seed: Option<u64>,
) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(p) => input::file::read_config(p)?,
        None => EngineConfig::default(),
    };
    if let Some(seed) = seed {
        config.classical.seed = Some(seed);
        config.heuristic.seed = Some(seed);
        config.subset.seed = Some(seed);
    }
    config.validate()?;
    Ok(config)
}

/// `--input` file, then piped stdin.
pub fn read_request<T: DeserializeOwned>(
    path: Option<&str>,
) -> Result<Option<T>, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return Ok(Some(input::file::read_json(path)?));
    }
    input::stdin::read_stdin()
}

pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("--{field}: expected YYYY-MM-DD, got '{raw}': {e}").into())
}

pub fn parse_tickers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
