//! Bi-level training step and held-out inference

use rand::Rng;
use tracing::{debug, info};

use crate::batch::DataQueue;
use crate::error::Result;
use crate::nas::architect::Architect;
use crate::nas::network::SearchNetwork;
use crate::training::loss::Criterion;
use crate::training::optimizer::{clip_grad_norm, Sgd};

/// Running average weighted by batch size
#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    sum: f64,
    count: usize,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64, n: usize) {
        self.sum += value * n as f64;
        self.count += n;
    }

    /// Average so far; NaN before the first update
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Loop counts and knobs of one training step
#[derive(Debug, Clone)]
pub struct StepSettings {
    /// Rounds of (architecture update, parameter updates)
    pub arch_updates: usize,
    /// Parameter updates per round
    pub param_updates: usize,
    /// Maximum gradient norm
    pub grad_clip: f64,
    /// Use the unrolled architecture gradient
    pub unrolled: bool,
    /// Parameter updates between progress messages
    pub report_freq: usize,
}

/// One bi-level training step.
///
/// With an architect, runs `arch_updates` rounds of one architecture update
/// on a validation batch followed by `param_updates` network weight updates
/// on training batches. Without one, runs a single round of weight updates.
/// Returns the batch-size weighted average training loss.
#[allow(clippy::too_many_arguments)]
pub fn bilevel_step<N, A, R>(
    network: &mut N,
    mut architect: Option<&mut A>,
    train_queue: &DataQueue,
    valid_queue: &DataQueue,
    criterion: Criterion,
    optimizer: &mut Sgd,
    lr: f64,
    settings: &StepSettings,
    rng: &mut R,
) -> Result<f64>
where
    N: SearchNetwork,
    A: Architect<N> + ?Sized,
    R: Rng,
{
    optimizer.set_learning_rate(lr);
    let rounds = if architect.is_some() { settings.arch_updates } else { 1 };
    let mask = network.decay_mask();
    let mut meter = AverageMeter::new();
    let mut updates = 0;

    for _ in 0..rounds {
        if let Some(architect) = architect.as_deref_mut() {
            let batch = valid_queue.random_batch(rng);
            architect.step(network, &batch, criterion, lr, optimizer, settings.unrolled)?;
        }

        for _ in 0..settings.param_updates {
            let batch = train_queue.random_batch(rng);
            let grads = network.gradients(&batch.inputs, &batch.targets, criterion)?;

            let mut grad = grads.params;
            clip_grad_norm(&mut grad, settings.grad_clip);
            let mut params = network.params();
            optimizer.step(&mut params, &grad, &mask)?;
            network.set_params(&params)?;
            network.apply_output_decay(lr);

            meter.update(grads.loss, batch.len());
            updates += 1;
            if settings.report_freq > 0 && updates % settings.report_freq == 0 {
                debug!(update = updates, loss = meter.avg(), "Parameter updates");
            }
        }
    }

    Ok(meter.avg())
}

/// Average loss over a full pass of `queue` without any update.
///
/// `report_freq` of `None` runs silently.
pub fn infer<N: SearchNetwork>(
    network: &N,
    queue: &DataQueue,
    criterion: Criterion,
    report_freq: Option<usize>,
) -> Result<f64> {
    let mut meter = AverageMeter::new();
    for (step, batch) in queue.batches().enumerate() {
        let loss = network.loss(&batch.inputs, &batch.targets, criterion)?;
        meter.update(loss, batch.len());
        if let Some(freq) = report_freq {
            if freq > 0 && step % freq == 0 {
                info!(step, loss = meter.avg(), "Validation");
            }
        }
    }
    Ok(meter.avg())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nas::architect::DartsArchitect;
    use crate::nas::network::{MixedOpNetwork, MixedOpNetworkBuilder, NetworkFactory};
    use crate::nas::search_space::Primitive;
    use crate::utils::data_loader::Dataset;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn queue(seed: u64) -> DataQueue {
        let x = Array2::from_shape_fn((16, 1), |(i, _)| (i as f64 + seed as f64) / 8.0 - 1.0);
        let y = x.mapv(|v| 2.0 * v + 0.5);
        DataQueue::new(Dataset::new(x, y).unwrap(), 4).unwrap()
    }

    fn network(rng: &mut Xoshiro256PlusPlus) -> MixedOpNetwork {
        MixedOpNetworkBuilder::new(1, 1, vec![Primitive::None, Primitive::Add, Primitive::Linear])
            .build(1, rng)
            .unwrap()
    }

    fn settings(arch_updates: usize, param_updates: usize) -> StepSettings {
        StepSettings {
            arch_updates,
            param_updates,
            grad_clip: 5.0,
            unrolled: false,
            report_freq: 10,
        }
    }

    #[test]
    fn test_average_meter() {
        let mut meter = AverageMeter::new();
        assert!(meter.avg().is_nan());
        meter.update(1.0, 1);
        meter.update(4.0, 3);
        assert!((meter.avg() - 3.25).abs() < 1e-12);
        assert_eq!(meter.count(), 4);
    }

    #[test]
    fn test_architecture_only_round() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let mut net = network(&mut rng);
        let params = net.params();
        let alphas = net.architecture_weights().clone();
        let mut architect = DartsArchitect::new(3e-3, 1e-4, 0.0);
        let mut opt = Sgd::new(0.025, 0.9, 3e-4);

        bilevel_step(
            &mut net,
            Some(&mut architect),
            &queue(0),
            &queue(3),
            Criterion::MeanSquaredError,
            &mut opt,
            0.025,
            &settings(1, 0),
            &mut rng,
        )
        .unwrap();

        assert_ne!(net.architecture_weights(), &alphas);
        assert_eq!(net.params(), params);
    }

    #[test]
    fn test_parameter_only_round() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut net = network(&mut rng);
        let params = net.params();
        let alphas = net.architecture_weights().clone();
        let mut opt = Sgd::new(0.025, 0.9, 3e-4);

        let loss = bilevel_step(
            &mut net,
            None::<&mut DartsArchitect>,
            &queue(0),
            &queue(3),
            Criterion::MeanSquaredError,
            &mut opt,
            0.05,
            &settings(3, 5),
            &mut rng,
        )
        .unwrap();

        assert!(loss.is_finite());
        assert_eq!(net.architecture_weights(), &alphas);
        assert_ne!(net.params(), params);
        assert_eq!(opt.learning_rate(), 0.05);
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mut net = network(&mut rng);
        let train = queue(0);
        let before = infer(&net, &train, Criterion::MeanSquaredError, None).unwrap();
        let mut opt = Sgd::new(0.05, 0.9, 0.0);

        for _ in 0..20 {
            bilevel_step(
                &mut net,
                None::<&mut DartsArchitect>,
                &train,
                &train,
                Criterion::MeanSquaredError,
                &mut opt,
                0.05,
                &settings(1, 10),
                &mut rng,
            )
            .unwrap();
        }

        let after = infer(&net, &train, Criterion::MeanSquaredError, None).unwrap();
        assert!(after < before);
    }
}
