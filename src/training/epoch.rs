//! Epoch scheduler
//!
//! Drives a fixed epoch budget: cosine-annealed learning rate, one
//! training step per epoch, a full validation pass, and the metric log.

use rand::Rng;
use tracing::{debug, info};

use crate::batch::DataQueue;
use crate::error::Result;
use crate::nas::architect::{Architect, DartsArchitect};
use crate::nas::network::SearchNetwork;
use crate::training::loss::{softmax_rows, Criterion};
use crate::training::metrics::MetricLog;
use crate::training::optimizer::Sgd;
use crate::training::scheduler::CosineAnnealing;
use crate::training::step::{bilevel_step, infer, StepSettings};

/// Runs training for a fixed number of epochs
#[derive(Debug, Clone)]
pub struct EpochScheduler {
    budget: usize,
    settings: StepSettings,
    criterion: Criterion,
    silent: bool,
}

impl EpochScheduler {
    pub fn new(budget: usize, settings: StepSettings, criterion: Criterion) -> Self {
        Self {
            budget,
            settings,
            criterion,
            silent: false,
        }
    }

    /// Demote per-epoch progress to debug level
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Relaxed search: architecture and weight updates every epoch
    #[allow(clippy::too_many_arguments)]
    pub fn run_search<N, A, R>(
        &self,
        network: &mut N,
        architect: &mut A,
        optimizer: &mut Sgd,
        schedule: &mut CosineAnnealing,
        train_queue: &DataQueue,
        valid_queue: &DataQueue,
        rng: &mut R,
    ) -> Result<MetricLog>
    where
        N: SearchNetwork,
        A: Architect<N> + ?Sized,
        R: Rng,
    {
        self.run(network, Some(architect), optimizer, schedule, train_queue, valid_queue, rng)
    }

    /// Weight-only training of a network with a frozen architecture
    pub fn run_fixed<N, R>(
        &self,
        network: &mut N,
        optimizer: &mut Sgd,
        schedule: &mut CosineAnnealing,
        train_queue: &DataQueue,
        valid_queue: &DataQueue,
        rng: &mut R,
    ) -> Result<MetricLog>
    where
        N: SearchNetwork,
        R: Rng,
    {
        self.run(
            network,
            None::<&mut DartsArchitect>,
            optimizer,
            schedule,
            train_queue,
            valid_queue,
            rng,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn run<N, A, R>(
        &self,
        network: &mut N,
        mut architect: Option<&mut A>,
        optimizer: &mut Sgd,
        schedule: &mut CosineAnnealing,
        train_queue: &DataQueue,
        valid_queue: &DataQueue,
        rng: &mut R,
    ) -> Result<MetricLog>
    where
        N: SearchNetwork,
        A: Architect<N> + ?Sized,
        R: Rng,
    {
        let shape = architect.as_ref().map(|_| network.architecture_weights().dim());
        let mut log = MetricLog::new(self.budget, shape);

        for epoch in 0..self.budget {
            let lr = schedule.current_lr();
            let arch_lr = architect.as_deref().map(|a| a.learning_rate());

            let train_loss = bilevel_step(
                network,
                architect.as_deref_mut(),
                train_queue,
                valid_queue,
                self.criterion,
                optimizer,
                lr,
                &self.settings,
                rng,
            )?;

            let report_freq = if self.silent { None } else { Some(self.settings.report_freq) };
            let valid_loss = infer(network, valid_queue, self.criterion, report_freq)?;

            schedule.step();
            log.record(epoch, train_loss, valid_loss, lr)?;
            if let Some(architect) = architect.as_deref_mut() {
                architect.on_epoch_end();
                if let Some(arch_lr) = arch_lr {
                    log.record_architecture(epoch, arch_lr, &softmax_rows(network.architecture_weights()))?;
                }
            }

            if self.silent {
                debug!(epoch, lr, train_loss, valid_loss, "Epoch complete");
            } else if arch_lr.is_some() {
                let genotype = network.render(&network.discretize_max()).join("; ");
                info!(epoch, lr, ?arch_lr, train_loss, valid_loss, genotype = %genotype, "Epoch complete");
            } else {
                info!(epoch, lr, train_loss, valid_loss, "Epoch complete");
            }
        }

        Ok(log)
    }
}
