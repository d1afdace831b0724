use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::QpoError;
use crate::QpoResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How mu and sigma are estimated from daily returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationPolicy {
    /// Sample mean and sample covariance, annualized.
    #[default]
    Simple,
    /// EWMA mean shrunk toward the universe average, Ledoit-Wolf covariance.
    Robust,
}

/// Objective minimized by the classical optimizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassicalObjective {
    /// min w' Sigma w
    MinimumVariance,
    /// min -(rt * return - (1 - rt) * risk)
    #[default]
    RiskReturn,
}

/// Combinatorial search oracle used by the subset selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OracleKind {
    /// Single-bit-flip simulated annealing. Temperatures are relative to the
    /// objective's coefficient scale.
    Annealing {
        sweeps: usize,
        initial_temperature: f64,
        final_temperature: f64,
    },
    /// Enumerate every bitstring (small universes only).
    Exhaustive,
}

impl Default for OracleKind {
    fn default() -> Self {
        OracleKind::Annealing {
            sweeps: 200,
            initial_temperature: 2.0,
            final_temperature: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub policy: EstimationPolicy,
    /// Minimum number of valid daily return rows.
    pub min_observations: usize,
    /// EWMA span in trading days (robust policy).
    pub ewma_span: f64,
    /// Blend weight pulling each mu toward the cross-sectional mean (robust policy).
    pub mean_shrinkage: f64,
    /// Fixed covariance shrinkage intensity; estimated from data when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shrinkage_intensity: Option<f64>,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            policy: EstimationPolicy::Simple,
            min_observations: 30,
            ewma_span: 180.0,
            mean_shrinkage: 0.3,
            shrinkage_intensity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintConfig {
    /// Per-asset weight cap (1.0 = unconstrained, 0.35 for a diversified book).
    pub max_weight: f64,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self { max_weight: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassicalConfig {
    pub objective: ClassicalObjective,
    /// Retain the best-Sharpe result across several randomized starts.
    pub multi_start: bool,
    pub restarts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for ClassicalConfig {
    fn default() -> Self {
        Self {
            objective: ClassicalObjective::RiskReturn,
            multi_start: false,
            restarts: 8,
            seed: None,
            max_iterations: 10_000,
            tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    pub trials: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Strength of the pull toward high-return assets, scaled by risk tolerance.
    pub return_bias: f64,
    /// Std-dev of the Gaussian noise injected by the blend generator.
    pub perturbation: f64,
    /// Weight of the (1 - sum w^2) spread reward in the score.
    pub diversification_weight: f64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            trials: 1000,
            seed: None,
            return_bias: 0.5,
            perturbation: 0.05,
            diversification_weight: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsetConfig {
    pub enabled: bool,
    /// Number of assets to hold.
    pub k: usize,
    pub sample_count: usize,
    /// Multiplier on the risk/return coefficient mass used as the cardinality penalty.
    pub penalty_scale: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub oracle: OracleKind,
}

impl Default for SubsetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k: 3,
            sample_count: 256,
            penalty_scale: 2.0,
            seed: None,
            oracle: OracleKind::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Share deltas within +/- this threshold are reported as HOLD.
    pub min_trade_shares: Decimal,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            min_trade_shares: dec!(0.01),
        }
    }
}

/// Per-invocation engine configuration. Nothing here is shared across requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub estimation: EstimationConfig,
    pub constraints: ConstraintConfig,
    pub classical: ClassicalConfig,
    pub heuristic: HeuristicConfig,
    pub subset: SubsetConfig,
    pub reconciliation: ReconciliationConfig,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Reject settings no optimizer can honour.
    pub fn validate(&self) -> QpoResult<()> {
        let e = &self.estimation;
        if e.min_observations < 2 {
            return Err(invalid(
                "estimation.min_observations",
                "must be at least 2",
            ));
        }
        if !(e.ewma_span >= 1.0) {
            return Err(invalid("estimation.ewma_span", "must be >= 1"));
        }
        if !(0.0..=1.0).contains(&e.mean_shrinkage) {
            return Err(invalid("estimation.mean_shrinkage", "must be in [0, 1]"));
        }
        if let Some(s) = e.shrinkage_intensity {
            if !(0.0..=1.0).contains(&s) {
                return Err(invalid(
                    "estimation.shrinkage_intensity",
                    "must be in [0, 1]",
                ));
            }
        }

        let cap = self.constraints.max_weight;
        if !(cap > 0.0 && cap <= 1.0) {
            return Err(invalid("constraints.max_weight", "must be in (0, 1]"));
        }

        let c = &self.classical;
        if c.max_iterations == 0 {
            return Err(invalid("classical.max_iterations", "must be positive"));
        }
        if !(c.tolerance > 0.0) {
            return Err(invalid("classical.tolerance", "must be positive"));
        }
        if c.multi_start && c.restarts == 0 {
            return Err(invalid(
                "classical.restarts",
                "must be positive when multi_start is enabled",
            ));
        }

        let h = &self.heuristic;
        if h.trials == 0 {
            return Err(invalid("heuristic.trials", "must be positive"));
        }
        if !(0.0..=1.0).contains(&h.return_bias) {
            return Err(invalid("heuristic.return_bias", "must be in [0, 1]"));
        }
        if !(h.perturbation >= 0.0) {
            return Err(invalid("heuristic.perturbation", "must be non-negative"));
        }
        if !(h.diversification_weight >= 0.0) {
            return Err(invalid(
                "heuristic.diversification_weight",
                "must be non-negative",
            ));
        }

        let s = &self.subset;
        if s.enabled {
            if s.k == 0 {
                return Err(invalid("subset.k", "must be at least 1"));
            }
            if s.sample_count == 0 {
                return Err(invalid("subset.sample_count", "must be positive"));
            }
            if !(s.penalty_scale > 1.0) {
                return Err(invalid("subset.penalty_scale", "must be greater than 1"));
            }
            if let OracleKind::Annealing {
                sweeps,
                initial_temperature,
                final_temperature,
            } = s.oracle
            {
                if sweeps == 0 {
                    return Err(invalid("subset.oracle.sweeps", "must be positive"));
                }
                if !(final_temperature > 0.0 && initial_temperature >= final_temperature) {
                    return Err(invalid(
                        "subset.oracle",
                        "temperatures must satisfy initial >= final > 0",
                    ));
                }
            }
        }

        if self.reconciliation.min_trade_shares < Decimal::ZERO {
            return Err(invalid(
                "reconciliation.min_trade_shares",
                "must be non-negative",
            ));
        }

        Ok(())
    }
}

/// Risk tolerance is a caller-supplied scalar in [0, 1].
pub fn validate_risk_tolerance(risk_tolerance: f64) -> QpoResult<()> {
    if !(0.0..=1.0).contains(&risk_tolerance) {
        return Err(invalid(
            "risk_tolerance",
            &format!("must be in [0, 1], got {risk_tolerance}"),
        ));
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> QpoError {
    QpoError::InvalidInput {
        field: field.into(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
