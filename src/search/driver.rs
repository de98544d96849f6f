//! Meta-search driver
//!
//! Runs the relaxed search and candidate evaluation for every configuration
//! of the grid, in declared order, isolating per-configuration failures.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::config::{SearchConfig, SearchConfiguration};
use super::evaluator::ArchitectureEvaluator;
use super::registry::SummaryRegistry;
use super::selector::{select_best, BestModel};
use crate::batch::DataQueue;
use crate::error::Result;
use crate::nas::architect::DartsArchitect;
use crate::nas::network::{NetworkFactory, SearchNetwork};
use crate::tracking::storage::ArtifactStore;
use crate::training::epoch::EpochScheduler;
use crate::training::metrics::MetricLog;
use crate::training::optimizer::Sgd;
use crate::training::scheduler::CosineAnnealing;
use crate::utils::data_loader::Dataset;

/// Lifecycle of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Idle,
    Initializing,
    RelaxedSearching,
    Evaluating,
    Done,
}

/// Outcome of one successful configuration
#[derive(Debug, Clone)]
pub struct ConfigurationRun {
    pub configuration: SearchConfiguration,
    pub metric_log: MetricLog,
    pub summary_table: String,
}

/// A configuration that was abandoned
#[derive(Debug, Clone)]
pub struct ConfigurationFailure {
    pub configuration: SearchConfiguration,
    pub error: String,
}

/// Result of a sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub registry: SummaryRegistry,
    pub runs: Vec<ConfigurationRun>,
    pub failures: Vec<ConfigurationFailure>,
}

/// Sweeps the configuration grid
pub struct MetaSearch<F: NetworkFactory, S: ArtifactStore> {
    config: SearchConfig,
    factory: F,
    store: S,
    state: SearchState,
}

impl<F: NetworkFactory, S: ArtifactStore> MetaSearch<F, S> {
    /// Create a driver; the configuration is validated up front
    pub fn new(config: SearchConfig, factory: F, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            store,
            state: SearchState::Idle,
        })
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Split `dataset` and run every configuration of the grid
    pub fn run(&mut self, dataset: &Dataset) -> Result<SweepReport> {
        let (train, valid) = dataset.split(self.config.training.train_portion)?;
        let train_queue = DataQueue::new(train, self.config.training.batch_size)?;
        let valid_queue = DataQueue::new(valid, self.config.training.batch_size)?;

        let configurations = self.config.grid.configurations();
        info!(
            search_id = %self.config.search_id,
            configurations = configurations.len(),
            train = train_queue.len(),
            valid = valid_queue.len(),
            "Starting meta-search"
        );

        let mut report = SweepReport::default();
        for configuration in configurations {
            match self.run_configuration(&configuration, &train_queue, &valid_queue) {
                Ok(run) => {
                    report.registry.register(run.summary_table.clone());
                    report.runs.push(run);
                }
                Err(e) => {
                    error!(config = %configuration, error = %e, "Configuration failed");
                    report.failures.push(ConfigurationFailure {
                        configuration,
                        error: e.to_string(),
                    });
                }
            }
            self.state = SearchState::Idle;
        }

        self.state = SearchState::Done;
        info!(
            completed = report.runs.len(),
            failed = report.failures.len(),
            "Meta-search finished"
        );
        Ok(report)
    }

    /// Reload the best model over every table of `registry`
    pub fn select_best(&self, registry: &SummaryRegistry) -> Result<BestModel<F::Network>> {
        select_best(&self.store, registry)
    }

    fn run_configuration(
        &mut self,
        configuration: &SearchConfiguration,
        train_queue: &DataQueue,
        valid_queue: &DataQueue,
    ) -> Result<ConfigurationRun> {
        let training = &self.config.training;
        let arch = &self.config.architect;

        self.state = SearchState::Initializing;
        info!(config = %configuration, "Initializing configuration");
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(configuration.seed);
        let mut network = self.factory.build(configuration.graph_size, &mut rng)?;
        let mut optimizer = Sgd::new(training.learning_rate, training.momentum, training.weight_decay);
        let mut schedule = CosineAnnealing::new(training.learning_rate, training.learning_rate_min, training.epochs);
        let mut architect = DartsArchitect::new(
            arch.learning_rate,
            arch.weight_decay,
            configuration.regularization_strength,
        );
        if let Some(lr_min) = arch.learning_rate_min {
            architect = architect.with_cosine_schedule(lr_min, training.epochs);
        }

        self.state = SearchState::RelaxedSearching;
        let metric_log = EpochScheduler::new(training.epochs, self.config.search_step(), self.config.criterion)
            .run_search(
                &mut network,
                &mut architect,
                &mut optimizer,
                &mut schedule,
                train_queue,
                valid_queue,
                &mut rng,
            )?;

        let search_id = &self.config.search_id;
        self.store
            .save(&configuration.artifact_name("model_relaxed", search_id), &network)?;
        self.store.save(
            &configuration.artifact_name("architecture_weights", search_id),
            network.architecture_weights(),
        )?;
        self.store
            .save(&configuration.artifact_name("metrics", search_id), &metric_log)?;

        self.state = SearchState::Evaluating;
        let summary_table = ArchitectureEvaluator::new(&self.config, &self.factory, &self.store).evaluate(
            &network,
            configuration,
            train_queue,
            valid_queue,
            &mut rng,
        )?;

        Ok(ConfigurationRun {
            configuration: *configuration,
            metric_log,
            summary_table,
        })
    }
}
