//! Learning rate schedules

use serde::{Deserialize, Serialize};

/// Cosine annealing from `eta_max` to `eta_min` over `t_max` epochs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosineAnnealing {
    eta_max: f64,
    eta_min: f64,
    t_max: usize,
    epoch: usize,
}

impl CosineAnnealing {
    pub fn new(eta_max: f64, eta_min: f64, t_max: usize) -> Self {
        Self {
            eta_max,
            eta_min,
            t_max,
            epoch: 0,
        }
    }

    /// Learning rate at an arbitrary epoch
    pub fn lr_at(&self, epoch: usize) -> f64 {
        if self.t_max == 0 {
            return self.eta_max;
        }
        let progress = std::f64::consts::PI * epoch as f64 / self.t_max as f64;
        self.eta_min + 0.5 * (self.eta_max - self.eta_min) * (1.0 + progress.cos())
    }

    /// Learning rate for the current epoch
    pub fn current_lr(&self) -> f64 {
        self.lr_at(self.epoch)
    }

    /// Advance one epoch
    pub fn step(&mut self) {
        self.epoch += 1;
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn eta_min(&self) -> f64 {
        self.eta_min
    }
}
