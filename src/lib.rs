//! darts-search - Differentiable architecture meta-search
//!
//! Searches the computation graph of a small predictive model by continuous
//! relaxation: every graph edge mixes a set of candidate operations, and the
//! mixture weights are trained alongside the network weights. The relaxed
//! result is discretized into concrete candidate models, which are retrained
//! and compared on held-out data across a grid of regularization strengths,
//! graph sizes and seeds.
//!
//! # Modules
//!
//! - [`nas`] - Primitive operations, the search network, architect and sampler
//! - [`training`] - Criteria, optimizers, schedules, training step, epoch scheduler
//! - [`search`] - Sweep configuration, driver, evaluator, registry, selector
//! - [`batch`] - Minibatch queues
//! - [`tracking`] - Artifact and summary table storage
//! - [`utils`] - Dataset loading and splitting
//! - [`cli`] - Command-line interface

pub mod error;

pub mod batch;
pub mod cli;
pub mod nas;
pub mod search;
pub mod tracking;
pub mod training;
pub mod utils;

pub use error::{Result, SearchError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Result, SearchError};

    // Search space and networks
    pub use crate::nas::{
        ArchitectureSample, ArchitectureSampler, Architect, DartsArchitect, MixedOpNetwork, MixedOpNetworkBuilder,
        NetworkFactory, Primitive, SearchNetwork,
    };

    // Training
    pub use crate::training::{Criterion, CosineAnnealing, EpochScheduler, MetricLog, Sgd, StepSettings};

    // Orchestration
    pub use crate::search::{
        BestModel, CandidateInit, MetaSearch, SearchConfig, SearchConfiguration, SummaryRegistry, SweepReport,
    };

    // Data and storage
    pub use crate::batch::{Batch, DataQueue};
    pub use crate::tracking::{ArtifactStore, EvaluationRecord, LocalStorage};
    pub use crate::utils::{DataLoader, Dataset};
}
