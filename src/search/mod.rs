//! Meta-parameter search orchestration
//!
//! - [`config`] - Sweep configuration and the configuration grid
//! - [`driver`] - Runs relaxed search and evaluation per configuration
//! - [`evaluator`] - Retrains and scores discrete candidates
//! - [`registry`] - Summary tables produced by a sweep
//! - [`selector`] - Global best-model selection

pub mod config;
pub mod driver;
pub mod evaluator;
pub mod registry;
pub mod selector;

pub use config::{
    ArchitectConfig, CandidateInit, EvaluationConfig, GridConfig, SearchConfig, SearchConfiguration, TrainingConfig,
};
pub use driver::{ConfigurationFailure, ConfigurationRun, MetaSearch, SearchState, SweepReport};
pub use evaluator::ArchitectureEvaluator;
pub use registry::SummaryRegistry;
pub use selector::{find_best_record, select_best, BestModel};
