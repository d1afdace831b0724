//! Request orchestration: prices -> estimates -> strategies -> trades.
//!
//! Each entry point builds everything it needs from its arguments and
//! returns the standard `ComputationOutput` envelope; nothing is cached
//! between calls.

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::{validate_risk_tolerance, EngineConfig};
use crate::error::QpoError;
use crate::estimation::{estimate, MarketEstimates};
use crate::market_data::{validate_universe, PriceSource, PriceTable};
use crate::metrics::{
    compute_metrics, concentration_hhi, effective_num_assets, improvement_percent,
    PortfolioMetrics,
};
use crate::optimization::classical::{optimize_classical, ClassicalResult};
use crate::optimization::heuristic::{optimize_heuristic, HeuristicResult};
use crate::optimization::subset::{optimize_subset, SubsetResult};
use crate::reconciliation::{current_weights, reconcile, Position, RebalancePlan};
use crate::types::{named_weights, with_metadata, AssetWeight, ComputationOutput, Ticker};
use crate::QpoResult;

/// Positions above this weight are flagged in the warnings.
const CONCENTRATION_WARNING: f64 = 0.40;

// ---------------------------------------------------------------------------
// Input / Output
// ---------------------------------------------------------------------------

/// Build a portfolio from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPortfolioRequest {
    pub tickers: Vec<Ticker>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// 0 = minimize risk only, 1 = maximize return only.
    pub risk_tolerance: f64,
}

/// Rebalance an existing holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingPortfolioRequest {
    pub positions: Vec<Position>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub risk_tolerance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Classical,
    Heuristic,
    Subset,
}

/// Named allocation plus the strategy's own diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyReport<R> {
    pub allocation: Vec<AssetWeight>,
    pub metrics: PortfolioMetrics,
    pub concentration_hhi: f64,
    pub effective_num_assets: f64,
    pub details: R,
}

/// Result of a new-portfolio request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutput {
    pub estimates: MarketEstimates,
    pub classical: StrategyReport<ClassicalResult>,
    pub heuristic: StrategyReport<HeuristicResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subset: Option<StrategyReport<SubsetResult>>,
    /// Heuristic Sharpe over classical Sharpe, in percent.
    pub improvement_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerPrice {
    pub ticker: Ticker,
    pub price: Decimal,
}

/// Target metrics and trades for one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub strategy: Strategy,
    pub target_allocation: Vec<AssetWeight>,
    pub target_metrics: PortfolioMetrics,
    pub plan: RebalancePlan,
}

/// Result of an existing-portfolio request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceOutput {
    pub total_value: Decimal,
    pub latest_prices: Vec<TickerPrice>,
    pub current_allocation: Vec<AssetWeight>,
    pub current_metrics: PortfolioMetrics,
    pub plans: Vec<StrategyPlan>,
    pub optimization: OptimizationOutput,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Fetch prices for `tickers` and estimate (mu, sigma).
pub fn estimate_market(
    source: &dyn PriceSource,
    tickers: &[Ticker],
    start: NaiveDate,
    end: NaiveDate,
    config: &EngineConfig,
) -> QpoResult<ComputationOutput<MarketEstimates>> {
    let started = Instant::now();
    config.validate()?;
    let prices = load_prices(source, tickers, start, end)?;
    let estimates = estimate(&prices, &config.estimation)?;

    Ok(with_metadata(
        "Annualized return and covariance estimation",
        &serde_json::json!({
            "n_assets": tickers.len(),
            "start_date": start,
            "end_date": end,
            "policy": config.estimation.policy,
            "min_observations": config.estimation.min_observations,
            "trading_days_per_year": crate::estimation::TRADING_DAYS,
        }),
        Vec::new(),
        started.elapsed().as_micros() as u64,
        estimates,
    ))
}

/// Run every enabled strategy on precomputed estimates.
pub fn optimize_estimates(
    estimates: MarketEstimates,
    risk_tolerance: f64,
    config: &EngineConfig,
    warnings: &mut Vec<String>,
) -> QpoResult<OptimizationOutput> {
    validate_risk_tolerance(risk_tolerance)?;
    let tickers = &estimates.tickers;
    let mu = &estimates.expected_returns;
    let sigma = &estimates.covariance_matrix;
    let cap = config.constraints.max_weight;

    let classical = optimize_classical(mu, sigma, risk_tolerance, cap, &config.classical)?;
    collect_warnings(warnings, "classical", &classical.warnings);

    let heuristic = optimize_heuristic(mu, sigma, risk_tolerance, cap, &config.heuristic)?;
    collect_warnings(warnings, "heuristic", &heuristic.warnings);

    let subset = if config.subset.enabled {
        let r = optimize_subset(
            tickers,
            mu,
            sigma,
            risk_tolerance,
            cap,
            &config.subset,
            &config.classical,
        )?;
        collect_warnings(warnings, "subset", &r.warnings);
        Some(r)
    } else {
        None
    };

    let improvement =
        improvement_percent(heuristic.metrics.sharpe_ratio, classical.metrics.sharpe_ratio);
    info!(
        classical_sharpe = classical.metrics.sharpe_ratio,
        heuristic_sharpe = heuristic.metrics.sharpe_ratio,
        improvement,
        "strategies finished"
    );

    let classical = report(tickers, classical.weights.clone(), classical, warnings);
    let heuristic = report(tickers, heuristic.weights.clone(), heuristic, warnings);
    let subset = subset.map(|r| report(tickers, r.weights.clone(), r, warnings));

    Ok(OptimizationOutput {
        estimates,
        classical,
        heuristic,
        subset,
        improvement_percent: improvement,
    })
}

/// New-portfolio use case.
pub fn optimize_portfolio(
    source: &dyn PriceSource,
    request: &NewPortfolioRequest,
    config: &EngineConfig,
) -> QpoResult<ComputationOutput<OptimizationOutput>> {
    let started = Instant::now();
    config.validate()?;
    validate_risk_tolerance(request.risk_tolerance)?;

    let prices = load_prices(source, &request.tickers, request.start_date, request.end_date)?;
    let estimates = estimate(&prices, &config.estimation)?;
    let mut warnings = Vec::new();
    let output = optimize_estimates(estimates, request.risk_tolerance, config, &mut warnings)?;

    Ok(with_metadata(
        methodology(config),
        &assumptions(
            request.tickers.len(),
            request.start_date,
            request.end_date,
            request.risk_tolerance,
            &output.estimates,
            config,
        ),
        warnings,
        started.elapsed().as_micros() as u64,
        output,
    ))
}

/// Existing-portfolio use case: optimize the held universe, then reconcile
/// each strategy's target against the holding.
pub fn optimize_existing_portfolio(
    source: &dyn PriceSource,
    request: &ExistingPortfolioRequest,
    config: &EngineConfig,
) -> QpoResult<ComputationOutput<RebalanceOutput>> {
    let started = Instant::now();
    config.validate()?;
    validate_risk_tolerance(request.risk_tolerance)?;

    let tickers: Vec<Ticker> = request.positions.iter().map(|p| p.ticker.clone()).collect();
    let shares: Vec<Decimal> = request.positions.iter().map(|p| p.shares).collect();
    let prices = load_prices(source, &tickers, request.start_date, request.end_date)?;

    let latest: Vec<Decimal> = prices
        .latest_prices()?
        .into_iter()
        .zip(tickers.iter())
        .map(|(p, t)| {
            Decimal::from_f64(p).ok_or_else(|| {
                QpoError::DataQuality(format!("latest price {p} for {t} is not representable"))
            })
        })
        .collect::<QpoResult<_>>()?;
    let held = current_weights(&shares, &latest)?;

    let estimates = estimate(&prices, &config.estimation)?;
    let current_metrics = compute_metrics(
        &held,
        &estimates.expected_returns,
        &estimates.covariance_matrix,
    );

    let mut warnings = Vec::new();
    let optimization = optimize_estimates(estimates, request.risk_tolerance, config, &mut warnings)?;

    let min_trade = config.reconciliation.min_trade_shares;
    let mut targets: Vec<(Strategy, &[AssetWeight], PortfolioMetrics)> = vec![
        (
            Strategy::Classical,
            optimization.classical.allocation.as_slice(),
            optimization.classical.metrics,
        ),
        (
            Strategy::Heuristic,
            optimization.heuristic.allocation.as_slice(),
            optimization.heuristic.metrics,
        ),
    ];
    if let Some(s) = &optimization.subset {
        targets.push((Strategy::Subset, s.allocation.as_slice(), s.metrics));
    }

    let mut plans = Vec::with_capacity(targets.len());
    for (strategy, allocation, target_metrics) in targets {
        let weights: Vec<f64> = allocation.iter().map(|a| a.weight).collect();
        let plan = reconcile(&tickers, &weights, &shares, &latest, min_trade)?;
        debug!(?strategy, traded = plan.positions_traded, turnover = %plan.turnover, "reconciled");
        plans.push(StrategyPlan {
            strategy,
            target_allocation: allocation.to_vec(),
            target_metrics,
            plan,
        });
    }

    let total_value = plans
        .first()
        .map(|p| p.plan.total_value)
        .unwrap_or(Decimal::ZERO);
    let assumptions = assumptions(
        tickers.len(),
        request.start_date,
        request.end_date,
        request.risk_tolerance,
        &optimization.estimates,
        config,
    );

    let output = RebalanceOutput {
        total_value,
        latest_prices: tickers
            .iter()
            .zip(latest.iter())
            .map(|(t, p)| TickerPrice {
                ticker: t.clone(),
                price: *p,
            })
            .collect(),
        current_allocation: named_weights(&tickers, &held),
        current_metrics,
        plans,
        optimization,
    };

    Ok(with_metadata(
        methodology(config),
        &assumptions,
        warnings,
        started.elapsed().as_micros() as u64,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch, align to the requested order and clip to the date range.
fn load_prices(
    source: &dyn PriceSource,
    tickers: &[Ticker],
    start: NaiveDate,
    end: NaiveDate,
) -> QpoResult<PriceTable> {
    validate_universe(tickers)?;
    if start > end {
        return Err(QpoError::InvalidInput {
            field: "start_date".into(),
            reason: format!("{start} is after end date {end}"),
        });
    }
    let table = source.fetch_prices(tickers, start, end)?;
    let table = table.select(tickers)?.between(start, end);
    if table.is_empty() {
        return Err(QpoError::DataAvailability(format!(
            "no prices between {start} and {end}"
        )));
    }
    debug!(assets = table.n_assets(), days = table.len(), "loaded prices");
    Ok(table)
}

fn report<R>(
    tickers: &[Ticker],
    weights: Vec<f64>,
    details: R,
    warnings: &mut Vec<String>,
) -> StrategyReport<R>
where
    R: HasMetrics,
{
    for (t, w) in tickers.iter().zip(weights.iter()) {
        if *w > CONCENTRATION_WARNING {
            warnings.push(format!(
                "Concentrated position ({}): {} has weight {:.4}",
                details.label(),
                t,
                w
            ));
        }
    }
    StrategyReport {
        allocation: named_weights(tickers, &weights),
        metrics: details.metrics(),
        concentration_hhi: concentration_hhi(&weights),
        effective_num_assets: effective_num_assets(&weights),
        details,
    }
}

/// Lets `report` pull metrics out of any strategy result.
trait HasMetrics {
    fn metrics(&self) -> PortfolioMetrics;
    fn label(&self) -> &'static str;
}

impl HasMetrics for ClassicalResult {
    fn metrics(&self) -> PortfolioMetrics {
        self.metrics
    }
    fn label(&self) -> &'static str {
        "classical"
    }
}

impl HasMetrics for HeuristicResult {
    fn metrics(&self) -> PortfolioMetrics {
        self.metrics
    }
    fn label(&self) -> &'static str {
        "heuristic"
    }
}

impl HasMetrics for SubsetResult {
    fn metrics(&self) -> PortfolioMetrics {
        self.metrics
    }
    fn label(&self) -> &'static str {
        "subset"
    }
}

fn collect_warnings(into: &mut Vec<String>, strategy: &str, from: &[String]) {
    into.extend(from.iter().map(|w| format!("{strategy}: {w}")));
}

fn methodology(config: &EngineConfig) -> &'static str {
    if config.subset.enabled {
        "Constrained mean-variance optimization, quantum-inspired Monte Carlo search and QUBO asset selection"
    } else {
        "Constrained mean-variance optimization and quantum-inspired Monte Carlo search"
    }
}

fn assumptions(
    n_assets: usize,
    start: NaiveDate,
    end: NaiveDate,
    risk_tolerance: f64,
    estimates: &MarketEstimates,
    config: &EngineConfig,
) -> serde_json::Value {
    serde_json::json!({
        "n_assets": n_assets,
        "start_date": start,
        "end_date": end,
        "risk_tolerance": risk_tolerance,
        "observations": estimates.observations,
        "estimation_policy": estimates.policy,
        "max_weight": config.constraints.max_weight,
        "classical_objective": config.classical.objective,
        "heuristic_trials": config.heuristic.trials,
        "subset_k": config.subset.enabled.then_some(config.subset.k),
        "min_trade_shares": config.reconciliation.min_trade_shares.to_string(),
    })
}
