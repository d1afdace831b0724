use clap::Args;
use serde_json::Value;

use qpo_core::engine::{self, ExistingPortfolioRequest};

use super::{load_config, read_request};
use crate::input::prices::CsvPriceSource;

#[derive(Args)]
pub struct RebalanceArgs {
    /// JSON existing-portfolio request with positions
    #[arg(long)]
    pub input: Option<String>,
    /// Wide CSV of daily prices: date,TICKER1,TICKER2,...
    #[arg(long)]
    pub prices: String,
    /// Engine config (JSON or YAML)
    #[arg(long)]
    pub config: Option<String>,
    /// Seed for every randomized strategy
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run_rebalance(args: RebalanceArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: ExistingPortfolioRequest = read_request(args.input.as_deref())?
        .ok_or("--input <file.json> or stdin required for rebalancing")?;
    let config = load_config(args.config.as_deref(), args.seed)?;
    let source = CsvPriceSource::from_path(&args.prices)?;

    let result = engine::optimize_existing_portfolio(&source, &request, &config)?;
    Ok(serde_json::to_value(result)?)
}
