use clap::Args;
use serde::Deserialize;
use serde_json::Value;

use qpo_core::engine;
use qpo_core::Ticker;

use super::{load_config, parse_date, parse_tickers, read_request};
use crate::input::prices::CsvPriceSource;

#[derive(Args)]
pub struct EstimateArgs {
    /// JSON request: {"tickers": [...], "start_date": "...", "end_date": "..."}
    #[arg(long)]
    pub input: Option<String>,
    /// Comma-separated tickers (instead of --input)
    #[arg(long)]
    pub tickers: Option<String>,
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub end: Option<String>,
    /// Wide CSV of daily prices: date,TICKER1,TICKER2,...
    #[arg(long)]
    pub prices: String,
    /// Engine config (JSON or YAML)
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Deserialize)]
struct EstimateRequest {
    tickers: Vec<Ticker>,
    start_date: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
}

pub fn run_estimate(args: EstimateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request = match (&args.tickers, &args.start, &args.end) {
        (Some(t), Some(s), Some(e)) => EstimateRequest {
            tickers: parse_tickers(t),
            start_date: parse_date("start", s)?,
            end_date: parse_date("end", e)?,
        },
        _ => read_request(args.input.as_deref())?.ok_or(
            "--input <file.json>, stdin, or --tickers/--start/--end required for estimation",
        )?,
    };
    let config = load_config(args.config.as_deref(), None)?;
    let source = CsvPriceSource::from_path(&args.prices)?;

    let result = engine::estimate_market(
        &source,
        &request.tickers,
        request.start_date,
        request.end_date,
        &config,
    )?;
    Ok(serde_json::to_value(result)?)
}
