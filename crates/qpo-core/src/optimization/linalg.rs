//! Small dense helpers over `Vec<Vec<f64>>`; universes are tens of assets.

/// Dot product.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Matrix-vector multiplication.
pub fn mat_vec(mat: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    mat.iter().map(|row| dot(row, v)).collect()
}

/// Cholesky succeeds with pivots above a relative tolerance.
#[allow(clippy::needless_range_loop)]
pub fn is_positive_definite(mat: &[Vec<f64>]) -> bool {
    let n = mat.len();
    if n == 0 {
        return false;
    }
    let scale = (0..n).map(|i| mat[i][i].abs()).fold(0.0, f64::max);
    if scale <= 0.0 {
        return false;
    }
    let tol = 1e-10 * scale;
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let s: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let pivot = mat[i][i] - s;
                if pivot <= tol {
                    return false;
                }
                l[i][i] = pivot.sqrt();
            } else {
                l[i][j] = (mat[i][j] - s) / l[j][j];
            }
        }
    }
    true
}

/// Restrict (mu, sigma) to the given asset indices, keeping their order.
pub fn sub_problem(mu: &[f64], sigma: &[Vec<f64>], indices: &[usize]) -> (Vec<f64>, Vec<Vec<f64>>) {
    let sub_mu = indices.iter().map(|&i| mu[i]).collect();
    let sub_sigma = indices
        .iter()
        .map(|&i| indices.iter().map(|&j| sigma[i][j]).collect())
        .collect();
    (sub_mu, sub_sigma)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mat_vec() {
        let m = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert_eq!(mat_vec(&m, &[1.0, 1.0]), vec![3.0, 7.0]);
    }

    #[test]
    fn test_positive_definite() {
        assert!(is_positive_definite(&[vec![2.0, 1.0], vec![1.0, 2.0]]));
        assert!(!is_positive_definite(&[vec![1.0, 1.0], vec![1.0, 1.0]]));
        assert!(!is_positive_definite(&[vec![0.0]]));
    }

    #[test]
    fn test_sub_problem_keeps_order() {
        let mu = vec![0.1, 0.2, 0.3];
        let sigma = vec![
            vec![1.0, 0.1, 0.2],
            vec![0.1, 2.0, 0.3],
            vec![0.2, 0.3, 3.0],
        ];
        let (m, s) = sub_problem(&mu, &sigma, &[0, 2]);
        assert_eq!(m, vec![0.1, 0.3]);
        assert_eq!(s, vec![vec![1.0, 0.2], vec![0.2, 3.0]]);
    }
}
