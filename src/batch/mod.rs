//! Minibatching

mod queue;

pub use queue::{Batch, DataQueue};
