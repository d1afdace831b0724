use serde::{Deserialize, Serialize};

use crate::error::QpoError;
use crate::optimization::linalg::dot;
use crate::QpoResult;

/// Risk below this is treated as zero when forming ratios.
pub const RISK_EPSILON: f64 = 1e-12;

/// Derived portfolio statistics. Never stored, recomputed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub expected_return: f64,
    pub risk: f64,
    pub sharpe_ratio: f64,
}

/// Return, risk and Sharpe for a weight vector.
///
/// Negative variance from floating-point error is clamped to zero before the
/// square root, so risk is never negative. Sharpe is zero when risk is.
pub fn compute_metrics(weights: &[f64], mu: &[f64], sigma: &[Vec<f64>]) -> PortfolioMetrics {
    let expected_return = dot(mu, weights);
    let risk = portfolio_variance(weights, sigma).max(0.0).sqrt();
    let sharpe_ratio = if risk > RISK_EPSILON {
        expected_return / risk
    } else {
        0.0
    };
    PortfolioMetrics {
        expected_return,
        risk,
        sharpe_ratio,
    }
}

/// w' Sigma w, unclamped.
pub fn portfolio_variance(weights: &[f64], sigma: &[Vec<f64>]) -> f64 {
    sigma
        .iter()
        .zip(weights.iter())
        .map(|(row, wi)| wi * dot(row, weights))
        .sum()
}

/// Herfindahl-Hirschman index of the weights.
pub fn concentration_hhi(weights: &[f64]) -> f64 {
    weights.iter().map(|w| w * w).sum()
}

/// 1 / HHI; zero for an all-zero vector.
pub fn effective_num_assets(weights: &[f64]) -> f64 {
    let hhi = concentration_hhi(weights);
    if hhi > 0.0 {
        1.0 / hhi
    } else {
        0.0
    }
}

/// Relative Sharpe improvement of the heuristic over the classical result, in percent.
pub fn improvement_percent(heuristic_sharpe: f64, classical_sharpe: f64) -> f64 {
    if classical_sharpe.abs() <= RISK_EPSILON {
        0.0
    } else {
        (heuristic_sharpe - classical_sharpe) / classical_sharpe.abs() * 100.0
    }
}

/// mu and sigma must describe the same number of assets.
pub fn validate_problem(mu: &[f64], sigma: &[Vec<f64>]) -> QpoResult<()> {
    let n = mu.len();
    if n == 0 {
        return Err(QpoError::InvalidInput {
            field: "expected_returns".into(),
            reason: "at least one asset required".into(),
        });
    }
    if sigma.len() != n {
        return Err(QpoError::DimensionMismatch {
            field: "covariance_matrix rows".into(),
            expected: n,
            actual: sigma.len(),
        });
    }
    if let Some(row) = sigma.iter().find(|row| row.len() != n) {
        return Err(QpoError::DimensionMismatch {
            field: "covariance_matrix columns".into(),
            expected: n,
            actual: row.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_asset() -> (Vec<f64>, Vec<Vec<f64>>) {
        (
            vec![0.08, 0.12],
            vec![vec![0.04, 0.01], vec![0.01, 0.09]],
        )
    }

    #[test]
    fn test_metrics_two_asset() {
        let (mu, sigma) = two_asset();
        let m = compute_metrics(&[0.5, 0.5], &mu, &sigma);
        assert!((m.expected_return - 0.10).abs() < 1e-12);
        // 0.25*0.04 + 0.25*0.09 + 2*0.25*0.01 = 0.0375
        assert!((m.risk - 0.0375_f64.sqrt()).abs() < 1e-12);
        assert!((m.sharpe_ratio - 0.10 / 0.0375_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weights() {
        let (mu, sigma) = two_asset();
        let m = compute_metrics(&[0.0, 0.0], &mu, &sigma);
        assert_eq!(m.expected_return, 0.0);
        assert_eq!(m.risk, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_negative_variance_clamped() {
        // not PSD: w' Sigma w < 0 for w = [0.5, 0.5]
        let sigma = vec![vec![1e-18, -1e-6], vec![-1e-6, 1e-18]];
        let m = compute_metrics(&[0.5, 0.5], &[0.1, 0.1], &sigma);
        assert_eq!(m.risk, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_hhi_and_effective_assets() {
        assert!((concentration_hhi(&[0.25; 4]) - 0.25).abs() < 1e-15);
        assert!((effective_num_assets(&[0.25; 4]) - 4.0).abs() < 1e-12);
        assert_eq!(effective_num_assets(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_improvement_percent() {
        assert!((improvement_percent(1.2, 1.0) - 20.0).abs() < 1e-9);
        assert!((improvement_percent(-0.5, -1.0) - 50.0).abs() < 1e-9);
        assert_eq!(improvement_percent(1.0, 0.0), 0.0);
    }

    #[test]
    fn test_validate_problem_mismatch() {
        let err = validate_problem(&[0.1, 0.2, 0.3], &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap_err();
        assert!(matches!(err, QpoError::DimensionMismatch { .. }));
    }
}
