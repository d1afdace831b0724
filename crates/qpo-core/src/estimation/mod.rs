pub mod covariance;
pub mod returns;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{EstimationConfig, EstimationPolicy};
use crate::error::QpoError;
use crate::market_data::PriceTable;
use crate::types::Ticker;
use crate::QpoResult;

/// Trading days per year used to annualize daily statistics.
pub const TRADING_DAYS: f64 = 252.0;

/// Annualized estimates aligned to `tickers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEstimates {
    pub tickers: Vec<Ticker>,
    /// mu
    pub expected_returns: Vec<f64>,
    /// sigma
    pub covariance_matrix: Vec<Vec<f64>>,
    /// Valid daily return rows the estimates were built from.
    pub observations: usize,
    pub policy: EstimationPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shrinkage_intensity: Option<f64>,
}

/// Turn a price history into annualized (mu, sigma) under the configured policy.
pub fn estimate(prices: &PriceTable, config: &EstimationConfig) -> QpoResult<MarketEstimates> {
    let returns = returns::daily_returns(prices, config.min_observations)?;

    let (mu_daily, sigma_daily, shrinkage_intensity) = match config.policy {
        EstimationPolicy::Simple => (
            covariance::sample_mean(&returns),
            covariance::sample_covariance(&returns),
            None,
        ),
        EstimationPolicy::Robust => {
            let ewma = covariance::ewma_mean(&returns, config.ewma_span);
            let grand = ewma.iter().sum::<f64>() / ewma.len() as f64;
            let delta = config.mean_shrinkage;
            let mu = ewma
                .iter()
                .map(|m| (1.0 - delta) * m + delta * grand)
                .collect();
            let (sigma, k) = covariance::ledoit_wolf(&returns, config.shrinkage_intensity);
            (mu, sigma, Some(k))
        }
    };

    let expected_returns: Vec<f64> = mu_daily.iter().map(|m| m * TRADING_DAYS).collect();
    let covariance_matrix: Vec<Vec<f64>> = sigma_daily
        .iter()
        .map(|row| row.iter().map(|c| c * TRADING_DAYS).collect())
        .collect();

    debug!(
        policy = ?config.policy,
        observations = returns.len(),
        shrinkage = ?shrinkage_intensity,
        "estimated market statistics"
    );

    let estimates = MarketEstimates {
        tickers: prices.tickers().to_vec(),
        expected_returns,
        covariance_matrix,
        observations: returns.len(),
        policy: config.policy,
        shrinkage_intensity,
    };
    validate_estimates(&estimates.expected_returns, &estimates.covariance_matrix)?;
    Ok(estimates)
}

/// Everything handed to an optimizer must be finite, square, symmetric and
/// have a non-negative diagonal.
#[allow(clippy::needless_range_loop)]
pub fn validate_estimates(mu: &[f64], sigma: &[Vec<f64>]) -> QpoResult<()> {
    crate::metrics::validate_problem(mu, sigma)?;
    let n = mu.len();
    if let Some(i) = mu.iter().position(|m| !m.is_finite()) {
        return Err(QpoError::DataQuality(format!(
            "expected return {i} is not finite"
        )));
    }
    for i in 0..n {
        for j in 0..n {
            if !sigma[i][j].is_finite() {
                return Err(QpoError::DataQuality(format!(
                    "covariance entry [{i},{j}] is not finite"
                )));
            }
        }
        if sigma[i][i] < 0.0 {
            return Err(QpoError::DataQuality(format!(
                "negative variance on diagonal {i}"
            )));
        }
        for j in (i + 1)..n {
            let scale = sigma[i][j].abs().max(sigma[j][i].abs()).max(1.0);
            if (sigma[i][j] - sigma[j][i]).abs() > 1e-9 * scale {
                return Err(QpoError::DataQuality(format!(
                    "covariance not symmetric at [{i},{j}]"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::linalg::is_positive_definite;
    use chrono::{Duration, NaiveDate};

    /// Deterministic pseudo-random walk; no rand dependency in fixtures.
    fn synthetic_prices(n_assets: usize, days: usize) -> PriceTable {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let dates = (0..days).map(|i| start + Duration::days(i as i64)).collect();
        let tickers = (0..n_assets).map(|j| format!("T{j}")).collect();
        let columns: Vec<Vec<f64>> = (0..n_assets)
            .map(|j| {
                let mut p = 100.0;
                (0..days)
                    .map(|t| {
                        let x = ((t * 7 + j * 13) % 17) as f64 / 17.0 - 0.5;
                        let y = ((t * 3 + j * 5) % 11) as f64 / 11.0 - 0.5;
                        p *= 1.0 + 0.02 * x + 0.01 * y + 0.0002 * j as f64;
                        p
                    })
                    .collect()
            })
            .collect();
        PriceTable::from_columns(tickers, dates, &columns).unwrap()
    }

    #[test]
    fn test_simple_policy_annualizes() {
        let prices = synthetic_prices(2, 60);
        let cfg = EstimationConfig::default();
        let est = estimate(&prices, &cfg).unwrap();
        let r = returns::daily_returns(&prices, 30).unwrap();
        let m = covariance::sample_mean(&r);
        assert!((est.expected_returns[0] - m[0] * 252.0).abs() < 1e-12);
        assert_eq!(est.observations, 59);
        assert!(est.shrinkage_intensity.is_none());
    }

    #[test]
    fn test_robust_mu_pulled_toward_universe_mean() {
        let prices = synthetic_prices(3, 80);
        let mut cfg = EstimationConfig {
            policy: EstimationPolicy::Robust,
            mean_shrinkage: 0.0,
            ..Default::default()
        };
        let raw = estimate(&prices, &cfg).unwrap().expected_returns;
        cfg.mean_shrinkage = 1.0;
        let pooled = estimate(&prices, &cfg).unwrap().expected_returns;
        let grand = raw.iter().sum::<f64>() / 3.0;
        for m in &pooled {
            assert!((m - grand).abs() < 1e-12);
        }
    }

    #[test]
    fn test_robust_covariance_better_conditioned_when_assets_near_observations() {
        // 12 assets, 12 return rows: the sample covariance is rank deficient
        let prices = synthetic_prices(12, 13);
        let base = EstimationConfig {
            min_observations: 10,
            ..Default::default()
        };
        let simple = estimate(&prices, &base).unwrap();
        let robust = estimate(
            &prices,
            &EstimationConfig {
                policy: EstimationPolicy::Robust,
                shrinkage_intensity: Some(0.2),
                ..base
            },
        )
        .unwrap();
        assert!(!is_positive_definite(&simple.covariance_matrix));
        assert!(is_positive_definite(&robust.covariance_matrix));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let err = validate_estimates(&[0.1], &[vec![f64::NAN]]).unwrap_err();
        assert!(matches!(err, QpoError::DataQuality(_)));
    }

    #[test]
    fn test_validate_rejects_dimension_mismatch() {
        let err = validate_estimates(&[0.1, 0.2], &[vec![0.1]]).unwrap_err();
        assert!(matches!(err, QpoError::DimensionMismatch { .. }));
    }
}
