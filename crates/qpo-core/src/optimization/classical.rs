use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Exp;
use tracing::{debug, warn};

use super::constraints::{effective_cap, project_capped_simplex, uniform_weights};
use super::linalg::{dot, mat_vec};
use crate::config::{ClassicalConfig, ClassicalObjective};
use crate::error::QpoError;
use crate::metrics::{compute_metrics, validate_problem, PortfolioMetrics, RISK_EPSILON};
use crate::QpoResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How the solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SolverStatus {
    Converged { iterations: usize },
    /// No start converged; the uniform vector was returned instead.
    FallbackToUniform { iterations: usize },
}

impl SolverStatus {
    pub fn converged(&self) -> bool {
        matches!(self, SolverStatus::Converged { .. })
    }
}

/// Output of the classical constrained optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassicalResult {
    pub weights: Vec<f64>,
    pub metrics: PortfolioMetrics,
    pub objective: ClassicalObjective,
    pub status: SolverStatus,
    /// Number of starting points tried.
    pub starts: usize,
    /// Seed of the randomized starts (multi-start only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Per-asset cap actually enforced.
    pub effective_cap: f64,
    pub warnings: Vec<String>,
}

/// A smooth-enough objective over the capped simplex.
trait Objective {
    fn value(&self, w: &[f64]) -> f64;
    fn gradient(&self, w: &[f64]) -> Vec<f64>;
}

/// w' Sigma w
struct MinimumVariance<'a> {
    sigma: &'a [Vec<f64>],
}

/// -(rt * w'mu - (1 - rt) * sqrt(w' Sigma w))
struct RiskReturn<'a> {
    mu: &'a [f64],
    sigma: &'a [Vec<f64>],
    risk_tolerance: f64,
}

impl Objective for MinimumVariance<'_> {
    fn value(&self, w: &[f64]) -> f64 {
        dot(w, &mat_vec(self.sigma, w))
    }

    fn gradient(&self, w: &[f64]) -> Vec<f64> {
        mat_vec(self.sigma, w).into_iter().map(|v| 2.0 * v).collect()
    }
}

impl Objective for RiskReturn<'_> {
    fn value(&self, w: &[f64]) -> f64 {
        let ret = dot(self.mu, w);
        let risk = dot(w, &mat_vec(self.sigma, w)).max(0.0).sqrt();
        -(self.risk_tolerance * ret - (1.0 - self.risk_tolerance) * risk)
    }

    fn gradient(&self, w: &[f64]) -> Vec<f64> {
        let sigma_w = mat_vec(self.sigma, w);
        let risk = dot(w, &sigma_w).max(0.0).sqrt();
        let rt = self.risk_tolerance;
        self.mu
            .iter()
            .zip(sigma_w.iter())
            .map(|(m, sw)| {
                if risk > RISK_EPSILON {
                    -rt * m + (1.0 - rt) * sw / risk
                } else {
                    -rt * m
                }
            })
            .collect()
    }
}

struct SolveOutcome {
    weights: Vec<f64>,
    iterations: usize,
    converged: bool,
}

const INITIAL_STEP: f64 = 1.0;
const MAX_STEP: f64 = 1e8;
const MIN_STEP: f64 = 1e-20;
/// An accepted step that lowers the objective by no more than this (relative)
/// is rounding noise; the iterate has stalled at the optimum.
const STALL_DECREASE: f64 = 4.0 * f64::EPSILON;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Solve the configured objective subject to sum(w) = 1 and 0 <= w_i <= cap.
///
/// Single-start solves begin at the uniform vector and are deterministic.
/// Multi-start adds seeded random simplex starts and keeps the best-Sharpe
/// converged solution. If nothing converges the uniform vector is returned
/// with `SolverStatus::FallbackToUniform` and a warning.
pub fn optimize_classical(
    mu: &[f64],
    sigma: &[Vec<f64>],
    risk_tolerance: f64,
    max_weight: f64,
    config: &ClassicalConfig,
) -> QpoResult<ClassicalResult> {
    validate_problem(mu, sigma)?;
    let n = mu.len();
    let mut warnings = Vec::new();

    let cap = effective_cap(max_weight, n);
    if cap > max_weight + f64::EPSILON {
        warnings.push(format!(
            "max_weight {max_weight} cannot hold a fully invested portfolio of {n} assets; relaxed to {cap:.6}"
        ));
    }

    if n == 1 {
        let weights = vec![1.0];
        return Ok(ClassicalResult {
            metrics: compute_metrics(&weights, mu, sigma),
            weights,
            objective: config.objective,
            status: SolverStatus::Converged { iterations: 0 },
            starts: 1,
            seed: None,
            effective_cap: cap,
            warnings,
        });
    }

    let objective: Box<dyn Objective + '_> = match config.objective {
        ClassicalObjective::MinimumVariance => Box::new(MinimumVariance { sigma }),
        ClassicalObjective::RiskReturn => Box::new(RiskReturn {
            mu,
            sigma,
            risk_tolerance,
        }),
    };

    let mut starts = vec![uniform_weights(n)];
    let seed = if config.multi_start {
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let exp = Exp::new(1.0).map_err(|e| QpoError::InvalidInput {
            field: "classical.restarts".into(),
            reason: format!("cannot build start sampler: {e}"),
        })?;
        for _ in 1..config.restarts {
            let draws: Vec<f64> = (0..n).map(|_| rng.sample(&exp)).collect();
            let total: f64 = draws.iter().sum();
            starts.push(draws.iter().map(|d| d / total).collect());
        }
        Some(seed)
    } else {
        None
    };

    let mut best: Option<(Vec<f64>, PortfolioMetrics, usize)> = None;
    let mut total_iterations = 0;
    for start in &starts {
        let outcome = projected_gradient(
            objective.as_ref(),
            start,
            cap,
            config.max_iterations,
            config.tolerance,
        );
        total_iterations += outcome.iterations;
        if !outcome.converged {
            debug!(iterations = outcome.iterations, "start did not converge");
            continue;
        }
        let metrics = compute_metrics(&outcome.weights, mu, sigma);
        let better = match &best {
            Some((_, m, _)) => metrics.sharpe_ratio > m.sharpe_ratio,
            None => true,
        };
        if better {
            best = Some((outcome.weights, metrics, outcome.iterations));
        }
    }

    let (weights, metrics, status) = match best {
        Some((w, m, iterations)) => (w, m, SolverStatus::Converged { iterations }),
        None => {
            let msg = format!(
                "Optimizer non-convergence: {:?} solver did not converge in {} iterations across {} start(s); using uniform weights",
                config.objective,
                config.max_iterations,
                starts.len()
            );
            warn!("{msg}");
            warnings.push(msg);
            let w = uniform_weights(n);
            let m = compute_metrics(&w, mu, sigma);
            (
                w,
                m,
                SolverStatus::FallbackToUniform {
                    iterations: total_iterations,
                },
            )
        }
    };

    debug!(objective = ?config.objective, ?status, sharpe = metrics.sharpe_ratio, "classical solve finished");

    Ok(ClassicalResult {
        weights,
        metrics,
        objective: config.objective,
        status,
        starts: starts.len(),
        seed,
        effective_cap: cap,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

/// Projected gradient descent with backtracking line search.
///
/// Stops when the gradient mapping ||w - P(w - t*g)||_inf / t drops below
/// `tolerance * (1 + ||g||_inf)`, or when the iterate stalls: the accepted
/// step is no longer than `tolerance` or no longer lowers the objective.
fn projected_gradient(
    objective: &dyn Objective,
    start: &[f64],
    cap: f64,
    max_iterations: usize,
    tolerance: f64,
) -> SolveOutcome {
    let mut w = project_capped_simplex(start, cap);
    let mut step = INITIAL_STEP;

    for iter in 0..max_iterations {
        let f = objective.value(&w);
        let g = objective.gradient(&w);
        if !f.is_finite() || g.iter().any(|x| !x.is_finite()) {
            return SolveOutcome {
                weights: w,
                iterations: iter,
                converged: false,
            };
        }

        let (trial, d) = loop {
            let shifted: Vec<f64> = w.iter().zip(g.iter()).map(|(wi, gi)| wi - step * gi).collect();
            let trial = project_capped_simplex(&shifted, cap);
            let d: Vec<f64> = trial.iter().zip(w.iter()).map(|(a, b)| a - b).collect();
            let bound = f + dot(&g, &d) + dot(&d, &d) / (2.0 * step);
            if objective.value(&trial) <= bound + 1e-15 * (1.0 + f.abs()) {
                break (trial, d);
            }
            step *= 0.5;
            if step < MIN_STEP {
                return SolveOutcome {
                    weights: w,
                    iterations: iter,
                    converged: false,
                };
            }
        };

        let step_norm = d.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
        let mapping = step_norm / step;
        let g_norm = g.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
        let decrease = f - objective.value(&trial);
        let stalled = step_norm <= tolerance || decrease <= STALL_DECREASE * (1.0 + f.abs());
        if decrease >= 0.0 {
            w = trial;
        }
        if mapping <= tolerance * (1.0 + g_norm) || stalled {
            return SolveOutcome {
                weights: w,
                iterations: iter + 1,
                converged: true,
            };
        }
        step = (step * 2.0).min(MAX_STEP);
    }

    SolveOutcome {
        weights: w,
        iterations: max_iterations,
        converged: false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
