//! Combinatorial search oracles for binary quadratic objectives.
//!
//! An oracle approximately minimizes `E(x) = offset + sum_i a_i x_i +
//! sum_{i<j} b_ij x_i x_j` over bitstrings and reports how often it sampled
//! each bitstring. The subset selector only relies on that contract, so any
//! solver (annealing, enumeration, a circuit sampler) can stand behind it.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::OracleKind;
use crate::error::QpoError;
use crate::QpoResult;

/// Enumeration is limited to 2^20 states.
pub const MAX_EXHAUSTIVE_ASSETS: usize = 20;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One inclusion flag per asset, in universe order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Bitstring(pub Vec<bool>);

/// Quadratic binary objective. Only the strict upper triangle of
/// `quadratic` is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryQuadraticObjective {
    pub linear: Vec<f64>,
    pub quadratic: Vec<Vec<f64>>,
    pub offset: f64,
}

/// How often each bitstring was sampled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleDistribution {
    pub counts: BTreeMap<Bitstring, usize>,
    pub total: usize,
}

/// Anything that can approximately minimize a binary quadratic objective.
pub trait SearchOracle {
    fn name(&self) -> &'static str;

    fn search(
        &self,
        objective: &BinaryQuadraticObjective,
        sample_count: usize,
        rng: &mut StdRng,
    ) -> QpoResult<SampleDistribution>;
}

/// Independent single-bit-flip Metropolis runs along a geometric cooling
/// schedule; each run contributes its lowest-energy state as one sample.
#[derive(Debug, Clone)]
pub struct SimulatedAnnealingOracle {
    pub sweeps: usize,
    /// Relative to the largest absolute coefficient of the objective.
    pub initial_temperature: f64,
    pub final_temperature: f64,
}

/// Enumerates every state and puts all samples on the minimizers.
#[derive(Debug, Clone, Default)]
pub struct ExhaustiveOracle;

// ---------------------------------------------------------------------------
// Bitstring / objective / distribution
// ---------------------------------------------------------------------------

impl Bitstring {
    pub fn hamming_weight(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(|(i, _)| i)
            .collect()
    }

    fn from_mask(mask: u64, n: usize) -> Self {
        Bitstring((0..n).map(|i| mask >> i & 1 == 1).collect())
    }
}

impl fmt::Display for Bitstring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            f.write_str(if *b { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl BinaryQuadraticObjective {
    pub fn zeros(n: usize) -> Self {
        Self {
            linear: vec![0.0; n],
            quadratic: vec![vec![0.0; n]; n],
            offset: 0.0,
        }
    }

    pub fn n(&self) -> usize {
        self.linear.len()
    }

    /// Coefficient of x_i x_j for i != j.
    fn pair(&self, i: usize, j: usize) -> f64 {
        if i < j {
            self.quadratic[i][j]
        } else {
            self.quadratic[j][i]
        }
    }

    pub fn energy(&self, x: &[bool]) -> f64 {
        let n = self.n();
        let mut e = self.offset;
        for i in 0..n {
            if !x[i] {
                continue;
            }
            e += self.linear[i];
            for j in (i + 1)..n {
                if x[j] {
                    e += self.quadratic[i][j];
                }
            }
        }
        e
    }

    /// Energy change from flipping bit i.
    pub fn flip_delta(&self, x: &[bool], i: usize) -> f64 {
        let field: f64 = self.linear[i]
            + (0..self.n())
                .filter(|&j| j != i && x[j])
                .map(|j| self.pair(i, j))
                .sum::<f64>();
        if x[i] {
            -field
        } else {
            field
        }
    }

    /// Largest absolute coefficient; 1 when everything is zero.
    pub fn coefficient_scale(&self) -> f64 {
        let n = self.n();
        let mut scale = self.linear.iter().fold(0.0_f64, |m, a| m.max(a.abs()));
        for i in 0..n {
            for j in (i + 1)..n {
                scale = scale.max(self.quadratic[i][j].abs());
            }
        }
        if scale > 0.0 {
            scale
        } else {
            1.0
        }
    }
}

impl SampleDistribution {
    pub fn record(&mut self, bits: Bitstring, count: usize) {
        *self.counts.entry(bits).or_insert(0) += count;
        self.total += count;
    }

    /// Samples whose Hamming weight is exactly `k`.
    pub fn count_with_weight(&self, k: usize) -> usize {
        self.counts
            .iter()
            .filter(|(b, _)| b.hamming_weight() == k)
            .map(|(_, c)| *c)
            .sum()
    }

    /// Most frequent bitstring of weight `k`; ties go to lower energy, then
    /// to lexicographic order.
    pub fn most_frequent_with_weight(
        &self,
        k: usize,
        objective: &BinaryQuadraticObjective,
    ) -> Option<(&Bitstring, usize)> {
        let mut best: Option<(&Bitstring, usize, f64)> = None;
        for (bits, &count) in self.counts.iter().filter(|(b, _)| b.hamming_weight() == k) {
            let energy = objective.energy(&bits.0);
            let better = match best {
                None => true,
                Some((_, c, e)) => count > c || (count == c && energy < e),
            };
            if better {
                best = Some((bits, count, energy));
            }
        }
        best.map(|(b, c, _)| (b, c))
    }
}

// ---------------------------------------------------------------------------
// Oracles
// ---------------------------------------------------------------------------

impl SearchOracle for SimulatedAnnealingOracle {
    fn name(&self) -> &'static str {
        "simulated_annealing"
    }

    fn search(
        &self,
        objective: &BinaryQuadraticObjective,
        sample_count: usize,
        rng: &mut StdRng,
    ) -> QpoResult<SampleDistribution> {
        let n = objective.n();
        let mut dist = SampleDistribution::default();
        if n == 0 {
            return Ok(dist);
        }

        let scale = objective.coefficient_scale();
        let t0 = self.initial_temperature * scale;
        let t1 = self.final_temperature * scale;
        let sweeps = self.sweeps.max(1);
        let ratio = if sweeps > 1 {
            (t1 / t0).powf(1.0 / (sweeps - 1) as f64)
        } else {
            1.0
        };

        for _ in 0..sample_count {
            let mut x: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.5)).collect();
            let mut energy = objective.energy(&x);
            let mut best_x = x.clone();
            let mut best_energy = energy;
            let mut temperature = t0;

            for _ in 0..sweeps {
                for i in 0..n {
                    let delta = objective.flip_delta(&x, i);
                    let accept = delta <= 0.0 || rng.gen::<f64>() < (-delta / temperature).exp();
                    if accept {
                        x[i] = !x[i];
                        energy += delta;
                        if energy < best_energy {
                            best_energy = energy;
                            best_x.clone_from(&x);
                        }
                    }
                }
                temperature *= ratio;
            }
            dist.record(Bitstring(best_x), 1);
        }
        Ok(dist)
    }
}

impl SearchOracle for ExhaustiveOracle {
    fn name(&self) -> &'static str {
        "exhaustive"
    }

    fn search(
        &self,
        objective: &BinaryQuadraticObjective,
        sample_count: usize,
        _rng: &mut StdRng,
    ) -> QpoResult<SampleDistribution> {
        let n = objective.n();
        if n > MAX_EXHAUSTIVE_ASSETS {
            return Err(QpoError::InvalidInput {
                field: "subset.oracle".into(),
                reason: format!(
                    "exhaustive search supports at most {MAX_EXHAUSTIVE_ASSETS} assets, got {n}"
                ),
            });
        }

        let mut minimizers: Vec<u64> = Vec::new();
        let mut min_energy = f64::INFINITY;
        for mask in 0..(1u64 << n) {
            let bits = Bitstring::from_mask(mask, n);
            let e = objective.energy(&bits.0);
            let tol = 1e-12 * (1.0 + e.abs());
            if e < min_energy - tol {
                min_energy = e;
                minimizers.clear();
                minimizers.push(mask);
            } else if (e - min_energy).abs() <= tol {
                minimizers.push(mask);
            }
        }

        let mut dist = SampleDistribution::default();
        let share = sample_count / minimizers.len();
        let mut remainder = sample_count % minimizers.len();
        for mask in minimizers {
            let extra = if remainder > 0 {
                remainder -= 1;
                1
            } else {
                0
            };
            dist.record(Bitstring::from_mask(mask, n), share + extra);
        }
        Ok(dist)
    }
}

/// Instantiate the configured oracle.
pub fn build_oracle(kind: &OracleKind) -> Box<dyn SearchOracle> {
    match kind {
        OracleKind::Annealing {
            sweeps,
            initial_temperature,
            final_temperature,
        } => Box::new(SimulatedAnnealingOracle {
            sweeps: *sweeps,
            initial_temperature: *initial_temperature,
            final_temperature: *final_temperature,
        }),
        OracleKind::Exhaustive => Box::new(ExhaustiveOracle),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Minimum at x = 101 (energy -3).
    fn toy() -> BinaryQuadraticObjective {
        let mut q = BinaryQuadraticObjective::zeros(3);
        q.linear = vec![-1.0, 1.0, -1.0];
        q.quadratic[0][2] = -1.0;
        q.quadratic[0][1] = 2.0;
        q
    }

    #[test]
    fn test_energy_and_flip_delta_agree() {
        let q = toy();
        let x = vec![true, false, true];
        assert_eq!(q.energy(&x), -3.0);
        for i in 0..3 {
            let mut y = x.clone();
            y[i] = !y[i];
            assert!((q.energy(&y) - q.energy(&x) - q.flip_delta(&x, i)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_exhaustive_finds_minimum() {
        let mut rng = StdRng::seed_from_u64(0);
        let dist = ExhaustiveOracle.search(&toy(), 100, &mut rng).unwrap();
        assert_eq!(dist.total, 100);
        let (bits, count) = dist.most_frequent_with_weight(2, &toy()).unwrap();
        assert_eq!(bits.to_string(), "101");
        assert_eq!(count, 100);
    }

    #[test]
    fn test_annealing_finds_minimum() {
        let oracle = SimulatedAnnealingOracle {
            sweeps: 100,
            initial_temperature: 2.0,
            final_temperature: 0.01,
        };
        let mut rng = StdRng::seed_from_u64(17);
        let dist = oracle.search(&toy(), 50, &mut rng).unwrap();
        assert_eq!(dist.total, 50);
        let (bits, _) = dist.most_frequent_with_weight(2, &toy()).unwrap();
        assert_eq!(bits.selected_indices(), vec![0, 2]);
    }

    #[test]
    fn test_exhaustive_rejects_large_universe() {
        let mut rng = StdRng::seed_from_u64(0);
        let q = BinaryQuadraticObjective::zeros(MAX_EXHAUSTIVE_ASSETS + 1);
        assert!(ExhaustiveOracle.search(&q, 10, &mut rng).is_err());
    }

    #[test]
    fn test_exhaustive_splits_ties() {
        let mut rng = StdRng::seed_from_u64(0);
        let dist = ExhaustiveOracle
            .search(&BinaryQuadraticObjective::zeros(2), 10, &mut rng)
            .unwrap();
        assert_eq!(dist.counts.len(), 4);
        assert_eq!(dist.total, 10);
    }

    #[test]
    fn test_bitstring_display_and_weight() {
        let b = Bitstring(vec![true, false, true, true]);
        assert_eq!(b.to_string(), "1011");
        assert_eq!(b.hamming_weight(), 3);
        assert_eq!(b.selected_indices(), vec![0, 2, 3]);
    }
}
