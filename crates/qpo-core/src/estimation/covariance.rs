use super::returns::ReturnSeries;

/// Column means.
pub fn sample_mean(returns: &ReturnSeries) -> Vec<f64> {
    let t = returns.len() as f64;
    (0..returns.n_assets)
        .map(|j| returns.rows.iter().map(|r| r[j]).sum::<f64>() / t)
        .collect()
}

/// Unbiased (n - 1) sample covariance.
#[allow(clippy::needless_range_loop)]
pub fn sample_covariance(returns: &ReturnSeries) -> Vec<Vec<f64>> {
    let n = returns.n_assets;
    let t = returns.len();
    let mean = sample_mean(returns);
    let mut cov = vec![vec![0.0; n]; n];
    if t < 2 {
        return cov;
    }
    for row in &returns.rows {
        for i in 0..n {
            let di = row[i] - mean[i];
            for j in i..n {
                cov[i][j] += di * (row[j] - mean[j]);
            }
        }
    }
    let denom = (t - 1) as f64;
    for i in 0..n {
        for j in i..n {
            cov[i][j] /= denom;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

/// Exponentially weighted mean with pandas-style span: alpha = 2 / (span + 1).
/// The most recent observation carries the largest weight.
pub fn ewma_mean(returns: &ReturnSeries, span: f64) -> Vec<f64> {
    let alpha = 2.0 / (span + 1.0);
    let decay = 1.0 - alpha;
    let t = returns.len();
    let weights: Vec<f64> = (0..t).map(|k| decay.powi((t - 1 - k) as i32)).collect();
    let total: f64 = weights.iter().sum();
    (0..returns.n_assets)
        .map(|j| {
            returns
                .rows
                .iter()
                .zip(weights.iter())
                .map(|(r, w)| r[j] * w)
                .sum::<f64>()
                / total
        })
        .collect()
}

/// Ledoit-Wolf shrinkage toward the scaled identity m*I, m = trace(S)/N.
///
/// S is the biased (1/T) sample covariance. Returns the shrunk matrix and the
/// intensity used. When `fixed_intensity` is given it replaces the estimate.
#[allow(clippy::needless_range_loop)]
pub fn ledoit_wolf(returns: &ReturnSeries, fixed_intensity: Option<f64>) -> (Vec<Vec<f64>>, f64) {
    let n = returns.n_assets;
    let t = returns.len();
    let mean = sample_mean(returns);
    let centered: Vec<Vec<f64>> = returns
        .rows
        .iter()
        .map(|r| r.iter().zip(mean.iter()).map(|(x, m)| x - m).collect())
        .collect();

    let tf = t as f64;
    let mut s = vec![vec![0.0; n]; n];
    for x in &centered {
        for i in 0..n {
            for j in i..n {
                s[i][j] += x[i] * x[j];
            }
        }
    }
    for i in 0..n {
        for j in i..n {
            s[i][j] /= tf;
            s[j][i] = s[i][j];
        }
    }

    let m = (0..n).map(|i| s[i][i]).sum::<f64>() / n as f64;

    // d^2 = ||S - mI||_F^2
    let mut d2 = 0.0;
    for i in 0..n {
        for j in 0..n {
            let target = if i == j { m } else { 0.0 };
            d2 += (s[i][j] - target).powi(2);
        }
    }

    let intensity = match fixed_intensity {
        Some(v) => v,
        None if d2 <= f64::EPSILON * f64::EPSILON => 0.0,
        None => {
            // b_bar^2 = (1/T^2) sum_t ||x_t x_t' - S||_F^2
            let mut b_bar2 = 0.0;
            for x in &centered {
                for i in 0..n {
                    for j in 0..n {
                        b_bar2 += (x[i] * x[j] - s[i][j]).powi(2);
                    }
                }
            }
            b_bar2 /= tf * tf;
            b_bar2.min(d2) / d2
        }
    };

    let shrunk = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    let target = if i == j { m } else { 0.0 };
                    intensity * target + (1.0 - intensity) * s[i][j]
                })
                .collect()
        })
        .collect();

    (shrunk, intensity)
}
