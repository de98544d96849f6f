//! Minibatch queues over a dataset

use ndarray::{Array2, Axis};
use rand::Rng;

use crate::error::{Result, SearchError};
use crate::utils::data_loader::Dataset;

/// A minibatch of input and target rows
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Array2<f64>,
    pub targets: Array2<f64>,
}

impl Batch {
    /// Number of patterns in the batch
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }
}

/// Queue that hands out minibatches of a dataset
#[derive(Debug, Clone)]
pub struct DataQueue {
    dataset: Dataset,
    batch_size: usize,
}

impl DataQueue {
    /// Create a new queue
    pub fn new(dataset: Dataset, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(SearchError::ConfigError("batch size must be positive".to_string()));
        }
        Ok(Self { dataset, batch_size })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of patterns behind the queue
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Draw one random minibatch of distinct rows.
    ///
    /// Successive draws are independent, so the same row can appear in
    /// consecutive batches.
    pub fn random_batch<R: Rng>(&self, rng: &mut R) -> Batch {
        let n = self.dataset.len();
        let amount = self.batch_size.min(n);
        let indices = rand::seq::index::sample(rng, n, amount).into_vec();
        self.gather(&indices)
    }

    /// Sequential pass over the whole dataset
    pub fn batches(&self) -> impl Iterator<Item = Batch> + '_ {
        let n = self.dataset.len();
        (0..n).step_by(self.batch_size).map(move |start| {
            let end = (start + self.batch_size).min(n);
            let indices: Vec<usize> = (start..end).collect();
            self.gather(&indices)
        })
    }

    fn gather(&self, indices: &[usize]) -> Batch {
        Batch {
            inputs: self.dataset.inputs().select(Axis(0), indices),
            targets: self.dataset.targets().select(Axis(0), indices),
        }
    }
}
