//! Architecture weight updates
//!
//! The architect owns the optimizer over the architecture weights and
//! computes their gradient on a validation batch, either first-order or with
//! the unrolled one-step approximation.

use ndarray::Array2;
use tracing::debug;

use super::network::SearchNetwork;
use crate::batch::Batch;
use crate::error::{Result, SearchError};
use crate::training::loss::{softmax_rows, Criterion};
use crate::training::optimizer::{Adam, Sgd};
use crate::training::scheduler::CosineAnnealing;

/// Updates the architecture weights of a network
pub trait Architect<N: SearchNetwork> {
    /// One architecture update from a validation batch.
    ///
    /// `lr` and `weight_optimizer` describe the current network weight
    /// update and are used by the unrolled approximation.
    fn step(
        &mut self,
        network: &mut N,
        batch: &Batch,
        criterion: Criterion,
        lr: f64,
        weight_optimizer: &Sgd,
        unrolled: bool,
    ) -> Result<()>;

    /// Current architecture learning rate
    fn learning_rate(&self) -> f64;

    /// Advance the architecture learning rate schedule, if any
    fn on_epoch_end(&mut self);
}

/// Adam-based architect with a parameter-count complexity penalty
#[derive(Debug, Clone)]
pub struct DartsArchitect {
    optimizer: Adam,
    regularization_strength: f64,
    schedule: Option<CosineAnnealing>,
}

impl DartsArchitect {
    pub fn new(learning_rate: f64, weight_decay: f64, regularization_strength: f64) -> Self {
        Self {
            optimizer: Adam::new(learning_rate, (0.5, 0.999), weight_decay),
            regularization_strength,
            schedule: None,
        }
    }

    /// Cosine-anneal the architecture learning rate down to `lr_min` over `budget` epochs
    pub fn with_cosine_schedule(mut self, lr_min: f64, budget: usize) -> Self {
        self.schedule = Some(CosineAnnealing::new(self.optimizer.learning_rate(), lr_min, budget));
        self
    }

    pub fn regularization_strength(&self) -> f64 {
        self.regularization_strength
    }

    /// Gradient of `strength * sum_e sum_o softmax(alpha_e)_o * count_o`
    fn complexity_gradient<N: SearchNetwork>(&self, network: &N) -> Array2<f64> {
        let weights = network.architecture_weights();
        let mut grad = Array2::zeros(weights.raw_dim());
        if self.regularization_strength == 0.0 || network.is_architecture_fixed() {
            return grad;
        }

        let counts: Vec<f64> = network.operation_param_counts().iter().map(|&c| c as f64).collect();
        let probs = softmax_rows(weights);
        for (edge, row) in probs.rows().into_iter().enumerate() {
            let expected: f64 = row.iter().zip(&counts).map(|(p, c)| p * c).sum();
            for (op, &p) in row.iter().enumerate() {
                grad[[edge, op]] = self.regularization_strength * p * (counts[op] - expected);
            }
        }
        grad
    }

    fn first_order<N: SearchNetwork>(&self, network: &N, batch: &Batch, criterion: Criterion) -> Result<Array2<f64>> {
        let grads = network.gradients(&batch.inputs, &batch.targets, criterion)?;
        grads.architecture.ok_or_else(fixed_architecture_error)
    }

    fn unrolled<N: SearchNetwork>(
        &self,
        network: &mut N,
        batch: &Batch,
        criterion: Criterion,
        lr: f64,
        weight_optimizer: &Sgd,
    ) -> Result<Array2<f64>> {
        let original = network.params();
        let mask = network.decay_mask();

        // Virtual step w' = w - lr * (momentum * buf + dw + decay * w)
        let grads = network.gradients(&batch.inputs, &batch.targets, criterion)?;
        let mut update = weight_optimizer.decayed_gradient(&original, &grads.params, &mask)?;
        if let Some(buf) = weight_optimizer.momentum_buffer() {
            if buf.len() == update.len() {
                update.scaled_add(weight_optimizer.momentum(), buf);
            }
        }
        let mut virtual_params = original.clone();
        virtual_params.scaled_add(-lr, &update);
        network.set_params(&virtual_params)?;

        let virtual_grads = network.gradients(&batch.inputs, &batch.targets, criterion);
        let virtual_grads = match virtual_grads {
            Ok(g) => g,
            Err(e) => {
                network.set_params(&original)?;
                return Err(e);
            }
        };
        let mut d_alpha = match virtual_grads.architecture {
            Some(d) => d,
            None => {
                network.set_params(&original)?;
                return Err(fixed_architecture_error());
            }
        };

        // Finite-difference Hessian-vector product around the original weights
        let vector = virtual_grads.params;
        let norm = vector.dot(&vector).sqrt();
        if norm > 0.0 {
            let r = 0.01 / norm;
            let mut shifted = original.clone();

            shifted.scaled_add(r, &vector);
            network.set_params(&shifted)?;
            let plus = self.first_order(network, batch, criterion);

            shifted.scaled_add(-2.0 * r, &vector);
            network.set_params(&shifted)?;
            let minus = self.first_order(network, batch, criterion);

            network.set_params(&original)?;
            let implicit = (plus? - minus?) / (2.0 * r);
            d_alpha.scaled_add(-lr, &implicit);
        } else {
            network.set_params(&original)?;
        }

        Ok(d_alpha)
    }
}

fn fixed_architecture_error() -> SearchError {
    SearchError::ConfigError("architecture step on a network with a fixed architecture".to_string())
}

impl<N: SearchNetwork> Architect<N> for DartsArchitect {
    fn step(
        &mut self,
        network: &mut N,
        batch: &Batch,
        criterion: Criterion,
        lr: f64,
        weight_optimizer: &Sgd,
        unrolled: bool,
    ) -> Result<()> {
        let mut grad = if unrolled {
            self.unrolled(network, batch, criterion, lr, weight_optimizer)?
        } else {
            self.first_order(network, batch, criterion)?
        };
        grad += &self.complexity_gradient(network);

        if let Some(bad) = grad.iter().find(|g| !g.is_finite()) {
            return Err(SearchError::divergence("architecture update", *bad));
        }

        self.optimizer.step(network.architecture_weights_mut(), &grad)?;
        debug!(
            unrolled,
            arch_lr = self.optimizer.learning_rate(),
            steps = self.optimizer.steps(),
            "Architecture step"
        );
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    fn on_epoch_end(&mut self) {
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.step();
            self.optimizer.set_learning_rate(schedule.current_lr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nas::network::{MixedOpNetwork, MixedOpNetworkBuilder, NetworkFactory};
    use crate::nas::search_space::Primitive;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn setup() -> (MixedOpNetwork, Batch) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let net = MixedOpNetworkBuilder::new(1, 1, vec![Primitive::None, Primitive::Add, Primitive::Linear])
            .build(1, &mut rng)
            .unwrap();
        let batch = Batch {
            inputs: array![[0.5], [-1.0], [2.0]],
            targets: array![[1.0], [-2.0], [4.0]],
        };
        (net, batch)
    }

    #[test]
    fn test_first_order_step_moves_only_architecture() {
        let (mut net, batch) = setup();
        let params = net.params();
        let alphas = net.architecture_weights().clone();
        let mut architect = DartsArchitect::new(3e-3, 1e-4, 0.0);
        let opt = Sgd::new(0.025, 0.9, 3e-4);

        architect
            .step(&mut net, &batch, Criterion::MeanSquaredError, 0.025, &opt, false)
            .unwrap();

        assert_ne!(net.architecture_weights(), &alphas);
        assert_eq!(net.params(), params);
    }

    #[test]
    fn test_unrolled_step_restores_weights() {
        let (mut net, batch) = setup();
        let params = net.params();
        let alphas = net.architecture_weights().clone();
        let mut architect = DartsArchitect::new(3e-3, 1e-4, 0.0);
        let opt = Sgd::new(0.025, 0.9, 3e-4);

        architect
            .step(&mut net, &batch, Criterion::MeanSquaredError, 0.025, &opt, true)
            .unwrap();

        assert_ne!(net.architecture_weights(), &alphas);
        assert_eq!(net.params(), params);
    }

    #[test]
    fn test_complexity_penalty_favors_cheap_operations() {
        let (net, _) = setup();
        let architect = DartsArchitect::new(3e-3, 0.0, 1.0);
        let grad = architect.complexity_gradient(&net);

        // Positive gradient (pushed down) on the two-parameter linear op
        for edge in 0..grad.nrows() {
            assert!(grad[[edge, 2]] > 0.0);
            assert!(grad[[edge, 0]] < 0.0);
            assert!(grad.row(edge).sum().abs() < 1e-12);
        }
    }

    #[test]
    fn test_fixed_architecture_rejected() {
        let (mut net, batch) = setup();
        net.fix_architecture(true, None).unwrap();
        let mut architect = DartsArchitect::new(3e-3, 0.0, 0.0);
        let opt = Sgd::new(0.025, 0.0, 0.0);
        let result = architect.step(&mut net, &batch, Criterion::MeanSquaredError, 0.025, &opt, false);
        assert!(matches!(result, Err(SearchError::ConfigError(_))));
    }

    #[test]
    fn test_cosine_architecture_lr() {
        let mut architect = DartsArchitect::new(0.01, 0.0, 0.0).with_cosine_schedule(0.001, 2);
        <DartsArchitect as Architect<MixedOpNetwork>>::on_epoch_end(&mut architect);
        <DartsArchitect as Architect<MixedOpNetwork>>::on_epoch_end(&mut architect);
        let lr = <DartsArchitect as Architect<MixedOpNetwork>>::learning_rate(&architect);
        assert!((lr - 0.001).abs() < 1e-12);
    }
}
