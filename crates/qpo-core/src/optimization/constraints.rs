//! The feasible set shared by every optimizer: the capped simplex
//! { w : sum(w) = 1, 0 <= w_i <= cap }.

/// Tolerance used when checking a weight vector against its cap.
pub const CAP_TOLERANCE: f64 = 1e-9;

/// Equal weights for n assets.
pub fn uniform_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

/// The cap actually enforced: a cap below 1/n admits no fully invested
/// portfolio, so it is raised to 1/n.
pub fn effective_cap(cap: f64, n: usize) -> f64 {
    if n == 0 {
        return cap;
    }
    cap.max(1.0 / n as f64).min(1.0)
}

/// Long-only, fully invested (within 1e-6) and under the cap.
pub fn is_feasible(w: &[f64], cap: f64) -> bool {
    let sum: f64 = w.iter().sum();
    (sum - 1.0).abs() <= 1e-6
        && w.iter()
            .all(|wi| *wi >= -CAP_TOLERANCE && *wi <= cap + CAP_TOLERANCE)
}

/// Largest amount by which any weight exceeds the cap (0 when none does).
pub fn cap_excess(w: &[f64], cap: f64) -> f64 {
    w.iter().map(|wi| wi - cap).fold(0.0, f64::max)
}

/// Euclidean projection onto the capped simplex.
///
/// Solves for the shift tau with sum(clamp(v_i - tau, 0, cap)) = 1 by
/// bisection. Requires `cap * n >= 1`.
pub fn project_capped_simplex(v: &[f64], cap: f64) -> Vec<f64> {
    let n = v.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1.0];
    }

    let mass = |tau: f64| -> f64 { v.iter().map(|x| (x - tau).clamp(0.0, cap)).sum() };

    let max_v = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_v = v.iter().copied().fold(f64::INFINITY, f64::min);
    // mass(lo) = n * cap >= 1, mass(hi) = 0
    let mut lo = min_v - cap;
    let mut hi = max_v;

    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if mass(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= f64::EPSILON * (1.0 + lo.abs().max(hi.abs())) {
            break;
        }
    }

    let tau = 0.5 * (lo + hi);
    let mut w: Vec<f64> = v.iter().map(|x| (x - tau).clamp(0.0, cap)).collect();

    // Absorb the bisection residual into the coordinates strictly inside the box.
    let residual = 1.0 - w.iter().sum::<f64>();
    if residual.abs() > 0.0 {
        let free: Vec<usize> = (0..n)
            .filter(|&i| {
                if residual > 0.0 {
                    w[i] < cap
                } else {
                    w[i] > 0.0
                }
            })
            .collect();
        if !free.is_empty() {
            let share = residual / free.len() as f64;
            for i in free {
                w[i] = (w[i] + share).clamp(0.0, cap);
            }
        }
    }
    w
}
