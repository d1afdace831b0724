use clap::Args;
use serde_json::Value;

use qpo_core::engine::{self, NewPortfolioRequest};

use super::{load_config, parse_date, parse_tickers, read_request};
use crate::input::prices::CsvPriceSource;

#[derive(Args)]
pub struct OptimizeArgs {
    /// JSON new-portfolio request
    #[arg(long)]
    pub input: Option<String>,
    /// Comma-separated tickers (instead of --input)
    #[arg(long)]
    pub tickers: Option<String>,
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub end: Option<String>,
    /// 0 = minimize risk, 1 = maximize return
    #[arg(long, default_value_t = 0.5)]
    pub risk_tolerance: f64,
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

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: NewPortfolioRequest = match (&args.tickers, &args.start, &args.end) {
        (Some(t), Some(s), Some(e)) => NewPortfolioRequest {
            tickers: parse_tickers(t),
            start_date: parse_date("start", s)?,
            end_date: parse_date("end", e)?,
            risk_tolerance: args.risk_tolerance,
        },
        _ => read_request(args.input.as_deref())?.ok_or(
            "--input <file.json>, stdin, or --tickers/--start/--end required for optimization",
        )?,
    };
    let config = load_config(args.config.as_deref(), args.seed)?;
    let source = CsvPriceSource::from_path(&args.prices)?;

    let result = engine::optimize_portfolio(&source, &request, &config)?;
    Ok(serde_json::to_value(result)?)
}
