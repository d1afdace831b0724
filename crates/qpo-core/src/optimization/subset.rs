//! Cardinality-constrained portfolio: choose exactly k of N assets with a
//! search oracle over a penalized binary quadratic objective, then weight the
//! chosen assets with the classical optimizer.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::classical::{optimize_classical, SolverStatus};
use super::linalg::sub_problem;
use super::oracle::{build_oracle, BinaryQuadraticObjective, SearchOracle};
use crate::config::{ClassicalConfig, SubsetConfig};
use crate::error::QpoError;
use crate::metrics::{compute_metrics, validate_problem, PortfolioMetrics, RISK_EPSILON};
use crate::types::Ticker;
use crate::QpoResult;

/// Floor on the cardinality penalty so an all-zero objective still has one.
pub const MIN_PENALTY: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Most frequent valid bitstring from the oracle.
    Oracle,
    /// The oracle produced no bitstring of weight k.
    Fallback,
    /// N <= k; every asset is held and no search ran.
    FullUniverse,
}

/// Which assets were chosen and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub indices: Vec<usize>,
    pub method: SelectionMethod,
    /// Share of oracle samples with exactly k assets.
    pub valid_sample_fraction: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_energy: Option<f64>,
    pub penalty: f64,
    pub warnings: Vec<String>,
}

/// Full output of the subset strategy, weights expanded to the whole universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsetResult {
    pub selected_tickers: Vec<Ticker>,
    pub selected_indices: Vec<usize>,
    pub method: SelectionMethod,
    pub oracle: String,
    pub valid_sample_fraction: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_energy: Option<f64>,
    pub penalty: f64,
    pub seed: u64,
    pub weights: Vec<f64>,
    pub metrics: PortfolioMetrics,
    pub status: SolverStatus,
    pub effective_cap: f64,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Objective
// ---------------------------------------------------------------------------

/// Build `E(x) = (1-rt) x'Sigma x - rt mu'x + P (sum x - k)^2` in
/// linear/upper-triangular form and return it with the penalty P.
///
/// P is `penalty_scale` times the absolute coefficient mass of the
/// risk/return part. Any two bitstrings differ in risk/return energy by at
/// most that mass, so with `penalty_scale > 1` every bitstring of the wrong
/// weight has strictly higher energy than every bitstring of weight k.
#[allow(clippy::needless_range_loop)]
pub fn build_selection_objective(
    mu: &[f64],
    sigma: &[Vec<f64>],
    k: usize,
    risk_tolerance: f64,
    penalty_scale: f64,
) -> (BinaryQuadraticObjective, f64) {
    let n = mu.len();
    let rt = risk_tolerance;
    let mut q = BinaryQuadraticObjective::zeros(n);

    for i in 0..n {
        q.linear[i] = (1.0 - rt) * sigma[i][i] - rt * mu[i];
        for j in (i + 1)..n {
            q.quadratic[i][j] = (1.0 - rt) * (sigma[i][j] + sigma[j][i]);
        }
    }

    let mut mass: f64 = q.linear.iter().map(|a| a.abs()).sum();
    for i in 0..n {
        for j in (i + 1)..n {
            mass += q.quadratic[i][j].abs();
        }
    }
    let penalty = (penalty_scale * mass).max(MIN_PENALTY);

    let kf = k as f64;
    for i in 0..n {
        q.linear[i] += penalty * (1.0 - 2.0 * kf);
        for j in (i + 1)..n {
            q.quadratic[i][j] += 2.0 * penalty;
        }
    }
    q.offset = penalty * kf * kf;

    (q, penalty)
}

/// The k assets with the highest mu_i / max(sigma_ii, 1e-12); ties keep the
/// lower index. Result is in universe order.
pub fn fallback_selection(mu: &[f64], sigma: &[Vec<f64>], k: usize) -> Vec<usize> {
    let ratio = |i: usize| mu[i] / sigma[i][i].max(RISK_EPSILON);
    let mut order: Vec<usize> = (0..mu.len()).collect();
    order.sort_by(|&a, &b| ratio(b).total_cmp(&ratio(a)).then(a.cmp(&b)));
    let mut chosen: Vec<usize> = order.into_iter().take(k).collect();
    chosen.sort_unstable();
    chosen
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Choose exactly `min(k, N)` assets.
#[allow(clippy::too_many_arguments)]
pub fn select_assets(
    mu: &[f64],
    sigma: &[Vec<f64>],
    k: usize,
    risk_tolerance: f64,
    penalty_scale: f64,
    sample_count: usize,
    oracle: &dyn SearchOracle,
    rng: &mut StdRng,
) -> QpoResult<Selection> {
    validate_problem(mu, sigma)?;
    if k == 0 {
        return Err(QpoError::InvalidInput {
            field: "subset.k".into(),
            reason: "must be at least 1".into(),
        });
    }
    let n = mu.len();

    if n <= k {
        debug!(n, k, "universe no larger than k; holding every asset");
        return Ok(Selection {
            indices: (0..n).collect(),
            method: SelectionMethod::FullUniverse,
            valid_sample_fraction: 1.0,
            best_energy: None,
            penalty: 0.0,
            warnings: Vec::new(),
        });
    }

    let (objective, penalty) =
        build_selection_objective(mu, sigma, k, risk_tolerance, penalty_scale);
    let samples = oracle.search(&objective, sample_count, rng)?;
    let valid = samples.count_with_weight(k);
    let valid_sample_fraction = if samples.total > 0 {
        valid as f64 / samples.total as f64
    } else {
        0.0
    };

    let mut warnings = Vec::new();
    let (indices, method) = match samples.most_frequent_with_weight(k, &objective) {
        Some((bits, count)) => {
            debug!(oracle = oracle.name(), bits = %bits, count, "selected assets");
            (bits.selected_indices(), SelectionMethod::Oracle)
        }
        None => {
            let msg = format!(
                "{} oracle returned no selection of exactly {k} assets in {} samples; using top-{k} return/variance ranking",
                oracle.name(),
                samples.total
            );
            warn!("{msg}");
            warnings.push(msg);
            (fallback_selection(mu, sigma, k), SelectionMethod::Fallback)
        }
    };

    let mut bits = vec![false; n];
    for &i in &indices {
        bits[i] = true;
    }
    let best_energy = objective.energy(&bits);

    Ok(Selection {
        indices,
        method,
        valid_sample_fraction,
        best_energy: Some(best_energy),
        penalty,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Select assets with the configured oracle, then weight them classically.
pub fn optimize_subset(
    tickers: &[Ticker],
    mu: &[f64],
    sigma: &[Vec<f64>],
    risk_tolerance: f64,
    max_weight: f64,
    subset: &SubsetConfig,
    classical: &ClassicalConfig,
) -> QpoResult<SubsetResult> {
    let oracle = build_oracle(&subset.oracle);
    optimize_subset_with_oracle(
        tickers,
        mu,
        sigma,
        risk_tolerance,
        max_weight,
        subset,
        classical,
        oracle.as_ref(),
    )
}

/// Same as [`optimize_subset`] with a caller-supplied oracle.
#[allow(clippy::too_many_arguments)]
pub fn optimize_subset_with_oracle(
    tickers: &[Ticker],
    mu: &[f64],
    sigma: &[Vec<f64>],
    risk_tolerance: f64,
    max_weight: f64,
    subset: &SubsetConfig,
    classical: &ClassicalConfig,
    oracle: &dyn SearchOracle,
) -> QpoResult<SubsetResult> {
    validate_problem(mu, sigma)?;
    if tickers.len() != mu.len() {
        return Err(QpoError::DimensionMismatch {
            field: "tickers".into(),
            expected: mu.len(),
            actual: tickers.len(),
        });
    }

    let seed = subset.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let selection = select_assets(
        mu,
        sigma,
        subset.k,
        risk_tolerance,
        subset.penalty_scale,
        subset.sample_count,
        oracle,
        &mut rng,
    )?;

    let (sub_mu, sub_sigma) = sub_problem(mu, sigma, &selection.indices);
    let weighted = optimize_classical(&sub_mu, &sub_sigma, risk_tolerance, max_weight, classical)?;

    let mut weights = vec![0.0; mu.len()];
    for (&i, w) in selection.indices.iter().zip(weighted.weights.iter()) {
        weights[i] = *w;
    }
    let metrics = compute_metrics(&weights, mu, sigma);

    let mut warnings = selection.warnings;
    warnings.extend(weighted.warnings);

    debug!(
        method = ?selection.method,
        selected = selection.indices.len(),
        sharpe = metrics.sharpe_ratio,
        "subset strategy finished"
    );

    Ok(SubsetResult {
        selected_tickers: selection
            .indices
            .iter()
            .map(|&i| tickers[i].clone())
            .collect(),
        selected_indices: selection.indices,
        method: selection.method,
        oracle: oracle.name().to_string(),
        valid_sample_fraction: selection.valid_sample_fraction,
        best_energy: selection.best_energy,
        penalty: selection.penalty,
        seed,
        weights,
        metrics,
        status: weighted.status,
        effective_cap: weighted.effective_cap,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleKind;
    use crate::optimization::constraints::is_feasible;
    use crate::optimization::oracle::{Bitstring, ExhaustiveOracle, SampleDistribution};

    fn five_asset() -> (Vec<Ticker>, Vec<f64>, Vec<Vec<f64>>) {
        let tickers = ["AAA", "BBB", "CCC", "DDD", "EEE"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        let mu = vec![0.10, 0.04, 0.07, 0.15, 0.12];
        let sigma = vec![
            vec![0.0225, 0.0090, 0.0038, 0.0120, 0.0050],
            vec![0.0090, 0.0400, 0.0250, 0.0060, 0.0040],
            vec![0.0038, 0.0250, 0.0625, 0.0100, 0.0070],
            vec![0.0120, 0.0060, 0.0100, 0.0900, 0.0150],
            vec![0.0050, 0.0040, 0.0070, 0.0150, 0.0400],
        ];
        (tickers, mu, sigma)
    }

    fn mask(m: u32, n: usize) -> Vec<bool> {
        (0..n).map(|i| m >> i & 1 == 1).collect()
    }

    fn direct_energy(x: &[bool], mu: &[f64], sigma: &[Vec<f64>], k: usize, rt: f64, p: f64) -> f64 {
        let xf: Vec<f64> = x.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect();
        let n = xf.len();
        let mut risk = 0.0;
        for i in 0..n {
            for j in 0..n {
                risk += sigma[i][j] * xf[i] * xf[j];
            }
        }
        let ret: f64 = mu.iter().zip(xf.iter()).map(|(m, x)| m * x).sum();
        let count: f64 = xf.iter().sum();
        (1.0 - rt) * risk - rt * ret + p * (count - k as f64).powi(2)
    }

    /// Always answers with every asset selected.
    struct AllOnesOracle;

    impl SearchOracle for AllOnesOracle {
        fn name(&self) -> &'static str {
            "all_ones"
        }

        fn search(
            &self,
            objective: &BinaryQuadraticObjective,
            sample_count: usize,
            _rng: &mut StdRng,
        ) -> QpoResult<SampleDistribution> {
            let mut dist = SampleDistribution::default();
            dist.record(Bitstring(vec![true; objective.n()]), sample_count);
            Ok(dist)
        }
    }

    fn exhaustive_config(k: usize) -> SubsetConfig {
        SubsetConfig {
            k,
            seed: Some(4),
            oracle: OracleKind::Exhaustive,
            ..Default::default()
        }
    }

    #[test]
    fn test_reduced_form_matches_direct_energy() {
        let (_, mu, sigma) = five_asset();
        let (q, p) = build_selection_objective(&mu, &sigma, 2, 0.6, 2.0);
        for m in 0..32 {
            let x = mask(m, 5);
            let want = direct_energy(&x, &mu, &sigma, 2, 0.6, p);
            assert!((q.energy(&x) - want).abs() < 1e-9, "{m}");
        }
    }

    #[test]
    fn test_penalty_dominates_every_violation() {
        let (_, mu, sigma) = five_asset();
        for rt in [0.0, 0.5, 1.0] {
            let (q, _) = build_selection_objective(&mu, &sigma, 3, rt, 1.01);
            let mut worst_valid = f64::NEG_INFINITY;
            let mut best_invalid = f64::INFINITY;
            for m in 0..32 {
                let x = mask(m, 5);
                let e = q.energy(&x);
                if m.count_ones() == 3 {
                    worst_valid = worst_valid.max(e);
                } else {
                    best_invalid = best_invalid.min(e);
                }
            }
            assert!(best_invalid > worst_valid, "rt={rt}");
        }
    }

    #[test]
    fn test_unit_penalty_scale_can_tie() {
        // rt = 1: mass 3, weight-one {0} scores 1, weight-two {1, 2} scores -2 + P
        let mu = vec![-1.0, 1.0, 1.0];
        let sigma = vec![vec![0.0; 3]; 3];
        let gap = |scale: f64| {
            let (q, _) = build_selection_objective(&mu, &sigma, 1, 1.0, scale);
            q.energy(&[false, true, true]) - q.energy(&[true, false, false])
        };
        assert!(gap(1.0).abs() < 1e-12);
        assert!(gap(1.5) > 1.0);
    }

    #[test]
    fn test_exhaustive_selection_matches_brute_force() {
        let (_, mu, sigma) = five_asset();
        let mut rng = StdRng::seed_from_u64(0);
        let sel = select_assets(&mu, &sigma, 2, 0.7, 2.0, 64, &ExhaustiveOracle, &mut rng).unwrap();
        assert_eq!(sel.method, SelectionMethod::Oracle);
        assert_eq!(sel.indices.len(), 2);
        assert_eq!(sel.valid_sample_fraction, 1.0);

        let best = (0..32u32)
            .filter(|m| m.count_ones() == 2)
            .min_by(|a, b| {
                direct_energy(&mask(*a, 5), &mu, &sigma, 2, 0.7, 0.0)
                    .total_cmp(&direct_energy(&mask(*b, 5), &mu, &sigma, 2, 0.7, 0.0))
            })
            .unwrap();
        let want: Vec<usize> = (0..5).filter(|i| best >> i & 1 == 1).collect();
        assert_eq!(sel.indices, want);
    }

    #[test]
    fn test_invalid_oracle_output_falls_back() {
        let (_, mu, sigma) = five_asset();
        let mut rng = StdRng::seed_from_u64(0);
        let sel = select_assets(&mu, &sigma, 2, 0.5, 2.0, 16, &AllOnesOracle, &mut rng).unwrap();
        assert_eq!(sel.method, SelectionMethod::Fallback);
        assert_eq!(sel.valid_sample_fraction, 0.0);
        // mu/var: 4.44, 1.0, 1.12, 1.67, 3.0
        assert_eq!(sel.indices, vec![0, 4]);
        assert_eq!(sel.warnings.len(), 1);
    }

    #[test]
    fn test_fallback_ties_keep_lower_index() {
        let sigma = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]];
        assert_eq!(fallback_selection(&[0.1, 0.1, 0.1], &sigma, 2), vec![0, 1]);
    }

    #[test]
    fn test_small_universe_holds_everything() {
        let (tickers, mu, sigma) = five_asset();
        let r = optimize_subset(
            &tickers[..2],
            &mu[..2],
            &[sigma[0][..2].to_vec(), sigma[1][..2].to_vec()],
            0.5,
            1.0,
            &exhaustive_config(3),
            &ClassicalConfig::default(),
        )
        .unwrap();
        assert_eq!(r.method, SelectionMethod::FullUniverse);
        assert_eq!(r.selected_indices, vec![0, 1]);
        assert!(is_feasible(&r.weights, 1.0));
    }

    #[test]
    fn test_weights_expand_to_full_universe() {
        let (tickers, mu, sigma) = five_asset();
        let r = optimize_subset(
            &tickers,
            &mu,
            &sigma,
            0.6,
            0.5,
            &exhaustive_config(3),
            &ClassicalConfig::default(),
        )
        .unwrap();
        assert_eq!(r.weights.len(), 5);
        assert_eq!(r.selected_tickers.len(), 3);
        assert!(is_feasible(&r.weights, 0.5), "{:?}", r.weights);
        for (i, w) in r.weights.iter().enumerate() {
            if !r.selected_indices.contains(&i) {
                assert_eq!(*w, 0.0);
            }
        }
    }

    #[test]
    fn test_annealing_selection_is_reproducible() {
        let (tickers, mu, sigma) = five_asset();
        let cfg = SubsetConfig {
            k: 2,
            seed: Some(21),
            sample_count: 64,
            ..Default::default()
        };
        let a = optimize_subset(&tickers, &mu, &sigma, 0.5, 1.0, &cfg, &ClassicalConfig::default())
            .unwrap();
        let b = optimize_subset(&tickers, &mu, &sigma, 0.5, 1.0, &cfg, &ClassicalConfig::default())
            .unwrap();
        assert_eq!(a.selected_indices, b.selected_indices);
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.selected_indices.len(), 2);
    }

    #[test]
    fn test_ticker_length_checked() {
        let (tickers, mu, sigma) = five_asset();
        let err = optimize_subset(
            &tickers[..4],
            &mu,
            &sigma,
            0.5,
            1.0,
            &exhaustive_config(2),
            &ClassicalConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, QpoError::DimensionMismatch { .. }));
    }
}
