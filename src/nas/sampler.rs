//! Discretization of continuous architecture weights
//!
//! Turns the relaxed `[edge, operation]` weight matrix into discrete
//! architectures: the deterministic arg-max choice and temperature-scaled
//! categorical draws, with uniqueness across a batch of candidates.

use std::collections::HashSet;
use std::fmt;

use ndarray::{Array2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::search_space::Primitive;
use crate::error::{Result, SearchError};
use crate::training::loss::softmax_rows;

/// One chosen operation per edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchitectureSample {
    /// Operation index chosen for each edge
    pub choices: Vec<usize>,
    /// Number of candidate operations per edge
    pub num_operations: usize,
}

impl ArchitectureSample {
    pub fn num_edges(&self) -> usize {
        self.choices.len()
    }

    /// One-hot weight matrix `[edge, operation]`
    pub fn to_weights(&self) -> Array2<f64> {
        let mut weights = Array2::zeros((self.choices.len(), self.num_operations));
        for (edge, &op) in self.choices.iter().enumerate() {
            weights[[edge, op]] = 1.0;
        }
        weights
    }
}

impl fmt::Display for ArchitectureSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.choices.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Per edge the operation with the highest weight.
///
/// The `none` operation is skipped unless it is the only candidate; ties go
/// to the lowest index.
pub fn discretize_max(weights: &Array2<f64>, primitives: &[Primitive]) -> ArchitectureSample {
    let only_none = primitives.iter().all(|p| p.is_none());
    let choices = weights
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best: Option<(usize, f64)> = None;
            for (op, &w) in row.iter().enumerate() {
                let skip = !only_none && primitives.get(op).map_or(false, |p| p.is_none());
                if skip {
                    continue;
                }
                match best {
                    Some((_, bw)) if w <= bw => {}
                    _ => best = Some((op, w)),
                }
            }
            best.map_or(0, |(op, _)| op)
        })
        .collect();

    ArchitectureSample {
        choices,
        num_operations: weights.ncols(),
    }
}

/// Draw one operation per edge from `softmax(weights / temperature)`
pub fn discretize_sample<R: Rng>(
    weights: &Array2<f64>,
    temperature: f64,
    rng: &mut R,
) -> Result<ArchitectureSample> {
    if !(temperature > 0.0 && temperature.is_finite()) {
        return Err(SearchError::ConfigError(format!(
            "sampling temperature must be positive, got {}",
            temperature
        )));
    }

    let probs = softmax_rows(&weights.mapv(|w| w / temperature));
    let mut choices = Vec::with_capacity(probs.nrows());
    for row in probs.axis_iter(Axis(0)) {
        let dist = WeightedIndex::<f64>::new(row.iter().copied())
            .map_err(|_| SearchError::divergence("architecture sampling", row.sum()))?;
        choices.push(dist.sample(rng));
    }

    Ok(ArchitectureSample {
        choices,
        num_operations: weights.ncols(),
    })
}

/// Produces batches of pairwise distinct candidate architectures
#[derive(Debug, Clone)]
pub struct ArchitectureSampler {
    temperature: f64,
    max_attempts: usize,
}

impl ArchitectureSampler {
    /// Create a sampler; `max_attempts` caps the draws spent on each new candidate
    pub fn new(temperature: f64, max_attempts: usize) -> Self {
        Self {
            temperature,
            max_attempts,
        }
    }

    /// `n` distinct candidates: the arg-max architecture first, then novel draws
    pub fn sample_unique<R: Rng>(
        &self,
        weights: &Array2<f64>,
        primitives: &[Primitive],
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<ArchitectureSample>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        if !space_holds(weights.ncols(), weights.nrows(), n) {
            return Err(SearchError::SampleSpaceExhausted {
                requested: n,
                found: 0,
                attempts: 0,
            });
        }

        let first = discretize_max(weights, primitives);
        let mut seen: HashSet<ArchitectureSample> = HashSet::new();
        seen.insert(first.clone());
        let mut samples = vec![first];
        let mut total_attempts = 0;

        while samples.len() < n {
            let mut accepted = false;
            for _ in 0..self.max_attempts {
                total_attempts += 1;
                let candidate = discretize_sample(weights, self.temperature, rng)?;
                if seen.insert(candidate.clone()) {
                    samples.push(candidate);
                    accepted = true;
                    break;
                }
            }
            if !accepted {
                return Err(SearchError::SampleSpaceExhausted {
                    requested: n,
                    found: samples.len(),
                    attempts: total_attempts,
                });
            }
        }

        debug!(requested = n, draws = total_attempts, "Sampled unique architectures");
        Ok(samples)
    }
}

/// Whether `num_operations ^ num_edges >= n`
fn space_holds(num_operations: usize, num_edges: usize, n: usize) -> bool {
    let mut size: usize = 1;
    for _ in 0..num_edges {
        size = size.saturating_mul(num_operations);
        if size >= n {
            return true;
        }
    }
    size >= n
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn prims() -> Vec<Primitive> {
        vec![Primitive::None, Primitive::Add, Primitive::Mult]
    }

    #[test]
    fn test_max_skips_none() {
        let weights = array![[5.0, 1.0, 2.0], [0.0, 3.0, 1.0]];
        let sample = discretize_max(&weights, &prims());
        assert_eq!(sample.choices, vec![2, 1]);
    }

    #[test]
    fn test_max_none_only() {
        let weights = array![[0.3], [0.1]];
        let sample = discretize_max(&weights, &[Primitive::None]);
        assert_eq!(sample.choices, vec![0, 0]);
    }

    #[test]
    fn test_max_is_idempotent() {
        let weights = array![[0.1, 0.4, 0.2], [0.9, 0.0, 0.5]];
        let first = discretize_max(&weights, &prims());
        let second = discretize_max(&first.to_weights(), &prims());
        assert_eq!(first, second);
    }

    #[test]
    fn test_one_hot_weights() {
        let sample = ArchitectureSample {
            choices: vec![1, 0],
            num_operations: 3,
        };
        let w = sample.to_weights();
        assert_eq!(w, array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_low_temperature_follows_max() {
        let weights = array![[0.0, 1.0, 3.0], [0.0, 4.0, 1.0]];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let sample = discretize_sample(&weights, 0.01, &mut rng).unwrap();
        assert_eq!(sample.choices, vec![2, 1]);
    }

    #[test]
    fn test_invalid_temperature() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        assert!(discretize_sample(&array![[0.0, 1.0]], 0.0, &mut rng).is_err());
    }

    #[test]
    fn test_non_finite_weights_diverge() {
        let weights = array![[0.0, f64::NAN], [1.0, 0.0]];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        assert!(matches!(
            discretize_sample(&weights, 1.0, &mut rng),
            Err(SearchError::Divergence { .. })
        ));
    }

    #[test]
    fn test_unique_samples() {
        let weights = Array2::zeros((3, 3));
        let sampler = ArchitectureSampler::new(1.0, 100);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let samples = sampler.sample_unique(&weights, &prims(), 10, &mut rng).unwrap();

        assert_eq!(samples.len(), 10);
        assert_eq!(samples[0], discretize_max(&weights, &prims()));
        let distinct: HashSet<_> = samples.iter().cloned().collect();
        assert_eq!(distinct.len(), 10);
    }

    #[test]
    fn test_whole_space_can_be_drawn() {
        // 2 operations on 2 edges: exactly four architectures
        let weights = Array2::zeros((2, 2));
        let sampler = ArchitectureSampler::new(1.0, 1000);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let samples = sampler
            .sample_unique(&weights, &[Primitive::Add, Primitive::Mult], 4, &mut rng)
            .unwrap();
        assert_eq!(samples.iter().cloned().collect::<HashSet<_>>().len(), 4);
    }

    #[test]
    fn test_space_too_small() {
        let weights = Array2::zeros((1, 2));
        let sampler = ArchitectureSampler::new(1.0, 100);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let result = sampler.sample_unique(&weights, &[Primitive::Add, Primitive::Mult], 3, &mut rng);
        assert!(matches!(result, Err(SearchError::SampleSpaceExhausted { requested: 3, .. })));
    }

    #[test]
    fn test_retry_cap() {
        // Nearly all mass on one architecture: the second candidate never shows up
        let weights = array![[0.0, 1000.0]];
        let sampler = ArchitectureSampler::new(1.0, 5);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let result = sampler.sample_unique(&weights, &[Primitive::Add, Primitive::Mult], 2, &mut rng);
        assert!(matches!(
            result,
            Err(SearchError::SampleSpaceExhausted { found: 1, attempts: 5, .. })
        ));
    }
}
