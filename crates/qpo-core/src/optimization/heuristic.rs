use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Exp, Normal};
use tracing::{debug, warn};

use super::constraints::{cap_excess, effective_cap, uniform_weights, CAP_TOLERANCE};
use crate::config::HeuristicConfig;
use crate::error::QpoError;
use crate::metrics::{compute_metrics, concentration_hhi, validate_problem, PortfolioMetrics};
use crate::QpoResult;

/// Score charged to a candidate that breaks the cap, on top of its excess.
pub const CAP_PENALTY: f64 = 1e6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Output of the quantum-inspired Monte Carlo search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicResult {
    pub weights: Vec<f64>,
    pub metrics: PortfolioMetrics,
    /// Score of the retained candidate; the best penalized score when no
    /// candidate was feasible.
    pub best_score: f64,
    pub trials: usize,
    /// Candidates that satisfied the per-asset cap.
    pub feasible_candidates: usize,
    pub seed: u64,
    pub effective_cap: f64,
    pub warnings: Vec<String>,
}

/// Fixed inputs to the scoring function.
struct Scorer<'a> {
    mu: &'a [f64],
    sigma: &'a [Vec<f64>],
    risk_tolerance: f64,
    cap: f64,
    diversification_weight: f64,
}

impl Scorer<'_> {
    fn score(&self, w: &[f64]) -> f64 {
        score_candidate(
            w,
            self.mu,
            self.sigma,
            self.risk_tolerance,
            self.cap,
            self.diversification_weight,
        )
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Composite score: Sharpe + (rt*return - (1-rt)*risk) + lambda*(1 - sum w^2),
/// minus an overwhelming penalty when any weight exceeds the cap.
pub fn score_candidate(
    w: &[f64],
    mu: &[f64],
    sigma: &[Vec<f64>],
    risk_tolerance: f64,
    cap: f64,
    diversification_weight: f64,
) -> f64 {
    let m = compute_metrics(w, mu, sigma);
    let trade_off = risk_tolerance * m.expected_return - (1.0 - risk_tolerance) * m.risk;
    let spread = 1.0 - concentration_hhi(w);
    let mut score = m.sharpe_ratio + trade_off + diversification_weight * spread;
    let excess = cap_excess(w, cap);
    if excess > CAP_TOLERANCE {
        score -= CAP_PENALTY * (1.0 + excess);
    }
    score
}

/// Randomized search over the capped simplex.
///
/// Each trial flips a fair coin between a Dirichlet draw mixed toward
/// high-return assets and a perturbed uniform/return blend, then scores the
/// candidate. Candidates are ranked by (feasible, score): any candidate within
/// the cap beats every over-cap one, whatever their scores. When no feasible
/// candidate was drawn the uniform vector is returned. The random stream per trial does not depend
/// on `trials`, so a longer run with the same seed extends a shorter one.
pub fn optimize_heuristic(
    mu: &[f64],
    sigma: &[Vec<f64>],
    risk_tolerance: f64,
    max_weight: f64,
    config: &HeuristicConfig,
) -> QpoResult<HeuristicResult> {
    validate_problem(mu, sigma)?;
    let n = mu.len();
    let cap = effective_cap(max_weight, n);
    let seed = config.seed.unwrap_or_else(rand::random);
    let mut warnings = Vec::new();

    let scorer = Scorer {
        mu,
        sigma,
        risk_tolerance,
        cap,
        diversification_weight: config.diversification_weight,
    };

    if n == 1 {
        let weights = vec![1.0];
        return Ok(HeuristicResult {
            best_score: scorer.score(&weights),
            metrics: compute_metrics(&weights, mu, sigma),
            weights,
            trials: 0,
            feasible_candidates: 0,
            seed,
            effective_cap: cap,
            warnings,
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let exp = Exp::new(1.0).map_err(sampler_error)?;
    let noise = if config.perturbation > 0.0 {
        Some(Normal::new(0.0, config.perturbation).map_err(sampler_error)?)
    } else {
        None
    };

    let bias = return_biased_distribution(mu);
    let uniform = uniform_weights(n);
    let mix = risk_tolerance * config.return_bias;

    let mut best: Option<(bool, f64, Vec<f64>)> = None;
    let mut feasible = 0usize;

    for _ in 0..config.trials {
        let candidate = if rng.gen_bool(0.5) {
            // (a) Dirichlet(1, ..., 1) pulled toward the return-biased vector
            let draws: Vec<f64> = (0..n).map(|_| rng.sample(&exp)).collect();
            let total: f64 = draws.iter().sum();
            draws
                .iter()
                .zip(bias.iter())
                .map(|(d, b)| (1.0 - mix) * d / total + mix * b)
                .collect::<Vec<f64>>()
        } else {
            // (b) uniform/return blend with Gaussian noise, renormalized
            let raw: Vec<f64> = uniform
                .iter()
                .zip(bias.iter())
                .map(|(u, b)| {
                    let eps = match &noise {
                        Some(dist) => rng.sample(dist),
                        None => 0.0,
                    };
                    ((1.0 - risk_tolerance) * u + risk_tolerance * b + eps).max(0.0)
                })
                .collect();
            let total: f64 = raw.iter().sum();
            if total > 0.0 {
                raw.iter().map(|r| r / total).collect()
            } else {
                uniform.clone()
            }
        };

        let within_cap = cap_excess(&candidate, cap) <= CAP_TOLERANCE;
        if within_cap {
            feasible += 1;
        }
        let score = scorer.score(&candidate);
        let better = match &best {
            Some((best_within, best_score, _)) => (within_cap, score) > (*best_within, *best_score),
            None => true,
        };
        if better {
            best = Some((within_cap, score, candidate));
        }
    }

    let (weights, best_score) = match best {
        Some((true, score, w)) => (w, score),
        other => {
            let msg = format!(
                "Heuristic search drew no candidate within max_weight {cap:.4} in {} trials; using uniform weights",
                config.trials
            );
            warn!("{msg}");
            warnings.push(msg);
            let score = other.map_or(f64::NEG_INFINITY, |(_, score, _)| score);
            (uniform, score)
        }
    };

    let metrics = compute_metrics(&weights, mu, sigma);
    debug!(
        trials = config.trials,
        feasible,
        best_score,
        sharpe = metrics.sharpe_ratio,
        "heuristic search finished"
    );

    Ok(HeuristicResult {
        weights,
        metrics,
        best_score,
        trials: config.trials,
        feasible_candidates: feasible,
        seed,
        effective_cap: cap,
        warnings,
    })
}

/// (mu_i - min mu) + eps, normalized; uniform when all returns are equal.
fn return_biased_distribution(mu: &[f64]) -> Vec<f64> {
    let n = mu.len();
    let min = mu.iter().copied().fold(f64::INFINITY, f64::min);
    let shifted: Vec<f64> = mu.iter().map(|m| m - min + 1e-3).collect();
    let total: f64 = shifted.iter().sum();
    if total > 0.0 && total.is_finite() {
        shifted.iter().map(|s| s / total).collect()
    } else {
        uniform_weights(n)
    }
}

fn sampler_error<E: std::fmt::Display>(e: E) -> QpoError {
    QpoError::InvalidInput {
        field: "heuristic".into(),
        reason: format!("cannot build sampler: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::constraints::is_feasible;

    fn four_asset() -> (Vec<f64>, Vec<Vec<f64>>) {
        (
            vec![0.10, 0.04, 0.07, 0.15],
            vec![
                vec![0.0225, 0.0090, 0.0038, 0.0120],
                vec![0.0090, 0.0400, 0.0250, 0.0060],
                vec![0.0038, 0.0250, 0.0625, 0.0100],
                vec![0.0120, 0.0060, 0.0100, 0.0900],
            ],
        )
    }

    fn seeded(trials: usize, seed: u64) -> HeuristicConfig {
        HeuristicConfig {
            trials,
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_same_seed_same_result() {
        let (mu, sigma) = four_asset();
        let a = optimize_heuristic(&mu, &sigma, 0.5, 1.0, &seeded(500, 11)).unwrap();
        let b = optimize_heuristic(&mu, &sigma, 0.5, 1.0, &seeded(500, 11)).unwrap();
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.best_score, b.best_score);
    }

    #[test]
    fn test_more_trials_never_lower_score() {
        let (mu, sigma) = four_asset();
        let mut prev = f64::NEG_INFINITY;
        for trials in [10, 50, 200, 1000] {
            let r = optimize_heuristic(&mu, &sigma, 0.7, 1.0, &seeded(trials, 3)).unwrap();
            assert!(r.best_score >= prev, "{trials}: {} < {prev}", r.best_score);
            prev = r.best_score;
        }
    }

    #[test]
    fn test_weights_feasible_with_cap() {
        let (mu, sigma) = four_asset();
        let r = optimize_heuristic(&mu, &sigma, 0.9, 0.35, &seeded(2000, 5)).unwrap();
        assert!(is_feasible(&r.weights, 0.35), "{:?}", r.weights);
        assert!(r.feasible_candidates > 0);
    }

    #[test]
    fn test_no_feasible_candidate_returns_uniform() {
        // cap == 1/n: only the exact uniform vector is feasible
        let (mu, sigma) = four_asset();
        let cfg = HeuristicConfig {
            trials: 50,
            seed: Some(9),
            perturbation: 0.2,
            ..Default::default()
        };
        let r = optimize_heuristic(&mu, &sigma, 1.0, 0.25, &cfg).unwrap();
        assert_eq!(r.weights, vec![0.25; 4]);
        assert_eq!(r.feasible_candidates, 0);
        assert_eq!(r.warnings.len(), 1);
    }

    #[test]
    fn test_feasible_candidate_beats_higher_scoring_over_cap_one() {
        // near-zero risk: Sharpe dwarfs the cap penalty for concentrated draws
        let mu = vec![0.1, 0.2, 0.3];
        let sigma = vec![
            vec![1e-20, 0.0, 0.0],
            vec![0.0, 1e-20, 0.0],
            vec![0.0, 0.0, 1e-20],
        ];
        let r = optimize_heuristic(&mu, &sigma, 0.8, 0.4, &seeded(2000, 1)).unwrap();
        assert!(r.feasible_candidates > 0);
        assert!(r.warnings.is_empty(), "{:?}", r.warnings);
        assert!(is_feasible(&r.weights, 0.4), "{:?}", r.weights);
        assert_eq!(r.best_score, score_candidate(&r.weights, &mu, &sigma, 0.8, 0.4, 0.1));
    }

    #[test]
    fn test_single_asset() {
        let r = optimize_heuristic(&[0.1], &[vec![0.04]], 0.5, 0.35, &seeded(100, 1)).unwrap();
        assert_eq!(r.weights, vec![1.0]);
    }

    #[test]
    fn test_penalty_dominates() {
        let (mu, sigma) = four_asset();
        let over = score_candidate(&[0.7, 0.1, 0.1, 0.1], &mu, &sigma, 0.5, 0.35, 0.1);
        let ok = score_candidate(&[0.25; 4], &mu, &sigma, 0.5, 0.35, 0.1);
        assert!(over < ok - 1e5);
    }

    #[test]
    fn test_return_bias_orders_by_mu() {
        let b = return_biased_distribution(&[0.1, 0.3, 0.2]);
        assert!(b[1] > b[2] && b[2] > b[0]);
        let total: f64 = b.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(return_biased_distribution(&[0.1, 0.1]), vec![0.5, 0.5]);
    }
}
