mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::estimate::EstimateArgs;
use commands::optimize::OptimizeArgs;
use commands::rebalance::RebalanceArgs;

/// Portfolio optimization engine
#[derive(Parser)]
#[command(
    name = "qpo",
    version,
    about = "Portfolio optimization engine",
    long_about = "Estimates annualized returns and covariances from daily prices, then \
                  searches for long-only capped allocations with a constrained \
                  mean-variance solver, a quantum-inspired Monte Carlo search and a \
                  QUBO asset selector. Existing holdings get BUY/SELL/HOLD trade lists."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log solver progress to stderr (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate annualized expected returns and covariance from prices
    Estimate(EstimateArgs),
    /// Build a new portfolio with every enabled strategy
    Optimize(OptimizeArgs),
    /// Rebalance an existing holding toward each strategy's target
    Rebalance(RebalanceArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "qpo_core=debug,qpo=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Estimate(args) => commands::estimate::run_estimate(args),
        Commands::Optimize(args) => commands::optimize::run_optimize(args),
        Commands::Rebalance(args) => commands::rebalance::run_rebalance(args),
        Commands::Version => {
            println!("qpo {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
