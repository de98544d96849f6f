//! Training machinery
//!
//! Provides the pieces that train a search network:
//! - Loss criteria with output gradients
//! - SGD and Adam optimizers, gradient clipping
//! - Cosine learning rate annealing
//! - The bi-level training step and held-out inference
//! - The epoch scheduler and its per-epoch metric log

pub mod epoch;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod scheduler;
pub mod step;

pub use epoch::EpochScheduler;
pub use loss::Criterion;
pub use metrics::MetricLog;
pub use optimizer::{clip_grad_norm, Adam, Sgd};
pub use scheduler::CosineAnnealing;
pub use step::{bilevel_step, infer, AverageMeter, StepSettings};
