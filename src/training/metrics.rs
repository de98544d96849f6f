//! Per-epoch metric log for a relaxed search run

use ndarray::{s, Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Fixed-size per-epoch series, NaN until the epoch is recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricLog {
    /// Average training loss of the epoch's training step
    pub train_loss: Array1<f64>,
    /// Full-pass validation loss after the epoch
    pub valid_loss: Array1<f64>,
    /// Network parameter learning rate used in the epoch
    pub param_lr: Array1<f64>,
    /// Architecture learning rate, when an architect is attached
    pub arch_lr: Option<Array1<f64>>,
    /// Softmax of the architecture weights per epoch `[epoch, edge, operation]`
    pub architecture_weights: Option<Array3<f64>>,
}

impl MetricLog {
    /// Create an empty log for `budget` epochs.
    ///
    /// `architecture_shape` enables the architecture series (learning rate
    /// and weight snapshots) for a relaxed search.
    pub fn new(budget: usize, architecture_shape: Option<(usize, usize)>) -> Self {
        Self {
            train_loss: Array1::from_elem(budget, f64::NAN),
            valid_loss: Array1::from_elem(budget, f64::NAN),
            param_lr: Array1::from_elem(budget, f64::NAN),
            arch_lr: architecture_shape.map(|_| Array1::from_elem(budget, f64::NAN)),
            architecture_weights: architecture_shape
                .map(|(edges, ops)| Array3::from_elem((budget, edges, ops), f64::NAN)),
        }
    }

    /// Epoch budget the log was sized for
    pub fn budget(&self) -> usize {
        self.train_loss.len()
    }

    /// Record the losses and parameter learning rate of an epoch
    pub fn record(&mut self, epoch: usize, train_loss: f64, valid_loss: f64, param_lr: f64) -> Result<()> {
        self.check_epoch(epoch)?;
        self.train_loss[epoch] = train_loss;
        self.valid_loss[epoch] = valid_loss;
        self.param_lr[epoch] = param_lr;
        Ok(())
    }

    /// Record the architecture learning rate and weight snapshot of an epoch
    pub fn record_architecture(&mut self, epoch: usize, arch_lr: f64, weights: &Array2<f64>) -> Result<()> {
        self.check_epoch(epoch)?;
        if let Some(series) = self.arch_lr.as_mut() {
            series[epoch] = arch_lr;
        }
        if let Some(snapshots) = self.architecture_weights.as_mut() {
            let mut slot = snapshots.slice_mut(s![epoch, .., ..]);
            if slot.dim() != weights.dim() {
                return Err(SearchError::ShapeError {
                    expected: format!("{:?}", slot.dim()),
                    actual: format!("{:?}", weights.dim()),
                });
            }
            slot.assign(weights);
        }
        Ok(())
    }

    /// Number of leading epochs that have been recorded
    pub fn completed_epochs(&self) -> usize {
        self.valid_loss.iter().take_while(|v| !v.is_nan()).count()
    }

    /// Validation loss of the last recorded epoch
    pub fn last_valid_loss(&self) -> Option<f64> {
        self.completed_epochs()
            .checked_sub(1)
            .map(|epoch| self.valid_loss[epoch])
    }

    fn check_epoch(&self, epoch: usize) -> Result<()> {
        if epoch >= self.budget() {
            return Err(SearchError::ShapeError {
                expected: format!("epoch below {}", self.budget()),
                actual: format!("epoch {}", epoch),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nan_initialized() {
        let log = MetricLog::new(4, None);
        assert_eq!(log.budget(), 4);
        assert!(log.train_loss.iter().all(|v| v.is_nan()));
        assert!(log.arch_lr.is_none());
        assert!(log.architecture_weights.is_none());
        assert_eq!(log.completed_epochs(), 0);
        assert_eq!(log.last_valid_loss(), None);
    }

    #[test]
    fn test_record_epochs() {
        let mut log = MetricLog::new(3, Some((2, 2)));
        log.record(0, 1.0, 0.9, 0.025).unwrap();
        log.record_architecture(0, 3e-3, &array![[0.1, 0.2], [0.3, 0.4]]).unwrap();
        log.record(1, 0.8, 0.7, 0.02).unwrap();

        assert_eq!(log.completed_epochs(), 2);
        assert_eq!(log.last_valid_loss(), Some(0.7));
        assert_eq!(log.arch_lr.as_ref().unwrap()[0], 3e-3);
        assert_eq!(log.architecture_weights.as_ref().unwrap()[[0, 1, 0]], 0.3);
        assert!(log.train_loss[2].is_nan());
    }

    #[test]
    fn test_out_of_range() {
        let mut log = MetricLog::new(1, Some((1, 2)));
        assert!(log.record(1, 0.0, 0.0, 0.0).is_err());
        assert!(log.record_architecture(0, 0.0, &array![[1.0, 2.0, 3.0]]).is_err());
    }
}
