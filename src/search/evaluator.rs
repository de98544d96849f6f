//! Architecture evaluation
//!
//! Discretizes a relaxed network into unique candidate architectures,
//! retrains each with its architecture frozen, and records the held-out
//! loss of every candidate in a summary table.

use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::{debug, info};

use super::config::{CandidateInit, SearchConfig, SearchConfiguration};
use crate::batch::DataQueue;
use crate::error::Result;
use crate::nas::network::{NetworkFactory, SearchNetwork};
use crate::nas::sampler::{ArchitectureSample, ArchitectureSampler};
use crate::tracking::storage::{ArtifactStore, EvaluationRecord};
use crate::training::epoch::EpochScheduler;
use crate::training::optimizer::Sgd;
use crate::training::scheduler::CosineAnnealing;
use crate::training::step::infer;

/// Retrains and scores candidate architectures of one configuration
pub struct ArchitectureEvaluator<'a, F: NetworkFactory, S: ArtifactStore> {
    config: &'a SearchConfig,
    factory: &'a F,
    store: &'a S,
}

impl<'a, F: NetworkFactory, S: ArtifactStore> ArchitectureEvaluator<'a, F, S> {
    pub fn new(config: &'a SearchConfig, factory: &'a F, store: &'a S) -> Self {
        Self { config, factory, store }
    }

    /// Evaluate `n_samples` candidates drawn from `relaxed`; returns the summary table name
    pub fn evaluate(
        &self,
        relaxed: &F::Network,
        configuration: &SearchConfiguration,
        train_queue: &DataQueue,
        valid_queue: &DataQueue,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<String> {
        let eval = &self.config.evaluation;
        let sampler = ArchitectureSampler::new(eval.temperature, eval.max_resample_attempts);
        let samples = sampler.sample_unique(
            relaxed.architecture_weights(),
            relaxed.primitives(),
            eval.n_samples,
            rng,
        )?;

        let table = configuration.artifact_name("model_eval", &self.config.search_id);
        self.store.create_table(&table)?;

        for (index, sample) in samples.iter().enumerate() {
            let record = self.evaluate_candidate(relaxed, configuration, index, sample, train_queue, valid_queue, rng)?;
            info!(
                config = %configuration,
                sample = index,
                architecture = %sample,
                held_out_loss = record.held_out_loss,
                "Candidate evaluated"
            );
            self.store.append_row(&table, &record)?;
        }

        Ok(table)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_candidate(
        &self,
        relaxed: &F::Network,
        configuration: &SearchConfiguration,
        index: usize,
        sample: &ArchitectureSample,
        train_queue: &DataQueue,
        valid_queue: &DataQueue,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<EvaluationRecord> {
        let training = &self.config.training;

        let mut candidate = match self.config.evaluation.init {
            CandidateInit::WarmStart => relaxed.clone(),
            CandidateInit::ColdStart => self.factory.build(configuration.graph_size, rng)?,
        };
        candidate.fix_architecture(true, Some(&sample.to_weights()))?;

        let mut optimizer = Sgd::new(training.learning_rate, training.momentum, training.weight_decay);
        let mut schedule = CosineAnnealing::new(training.learning_rate, training.learning_rate_min, training.epochs);
        debug!(sample = index, equations = ?candidate.render(sample), "Retraining candidate");

        EpochScheduler::new(training.epochs, self.config.evaluation_step(), self.config.criterion)
            .silent()
            .run_fixed(&mut candidate, &mut optimizer, &mut schedule, train_queue, valid_queue, rng)?;

        let held_out_loss = infer(&candidate, valid_queue, self.config.criterion, None)?;

        let model_file = format!(
            "{}_sample{}",
            configuration.artifact_name("model", &self.config.search_id),
            index
        );
        let architecture_file = format!(
            "{}_sample{}",
            configuration.artifact_name("architecture", &self.config.search_id),
            index
        );
        self.store.save(&model_file, &candidate)?;
        self.store.save(&architecture_file, sample)?;

        Ok(EvaluationRecord {
            model_file,
            architecture_file,
            graph_size: configuration.graph_size,
            held_out_loss,
        })
    }
}
