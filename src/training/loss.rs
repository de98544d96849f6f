//! Training criteria
//!
//! Loss functions together with their gradient with respect to the network output.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Loss function used for both parameter and architecture updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Mean squared error over every output element (regression)
    MeanSquaredError,
    /// Softmax cross entropy; targets hold class indices in their first column
    CrossEntropy,
}

impl Default for Criterion {
    fn default() -> Self {
        Self::MeanSquaredError
    }
}

impl Criterion {
    /// Loss value only
    pub fn loss(&self, output: &Array2<f64>, targets: &Array2<f64>) -> Result<f64> {
        self.evaluate(output, targets).map(|(loss, _)| loss)
    }

    /// Loss value and gradient with respect to `output`
    pub fn evaluate(&self, output: &Array2<f64>, targets: &Array2<f64>) -> Result<(f64, Array2<f64>)> {
        if output.nrows() != targets.nrows() || output.nrows() == 0 {
            return Err(SearchError::ShapeError {
                expected: format!("{} target rows", output.nrows()),
                actual: format!("{} target rows", targets.nrows()),
            });
        }

        match self {
            Self::MeanSquaredError => {
                if output.dim() != targets.dim() {
                    return Err(SearchError::ShapeError {
                        expected: format!("{:?}", output.dim()),
                        actual: format!("{:?}", targets.dim()),
                    });
                }
                let diff = output - targets;
                let n = diff.len() as f64;
                let loss = diff.mapv(|d| d * d).sum() / n;
                let grad = diff.mapv(|d| 2.0 * d / n);
                Ok((loss, grad))
            }
            Self::CrossEntropy => {
                let n = output.nrows() as f64;
                let n_classes = output.ncols();
                let mut grad = softmax_rows(output);
                let mut loss = 0.0;
                for (i, mut row) in grad.axis_iter_mut(Axis(0)).enumerate() {
                    let class = class_index(targets[[i, 0]], n_classes)?;
                    let p = row[class];
                    loss -= if p.is_nan() { p } else { p.max(f64::MIN_POSITIVE).ln() };
                    row[class] -= 1.0;
                }
                grad.mapv_inplace(|g| g / n);
                Ok((loss / n, grad))
            }
        }
    }
}

/// Row-wise softmax.
///
/// A row holding a non-finite logit comes out as all NaN, so callers see the
/// divergence instead of a made-up distribution.
pub fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        if row.iter().any(|x| !x.is_finite()) {
            row.fill(f64::NAN);
            continue;
        }
        let max_val = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|x| (x - max_val).exp());
        let sum: f64 = row.sum();
        row.mapv_inplace(|x| x / sum);
    }
    out
}

fn class_index(value: f64, n_classes: usize) -> Result<usize> {
    if value < 0.0 || value.fract() != 0.0 || value as usize >= n_classes {
        return Err(SearchError::DataError(format!(
            "class target {} is not an index below {}",
            value, n_classes
        )));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mse() {
        let output = array![[1.0], [3.0]];
        let targets = array![[0.0], [1.0]];
        let (loss, grad) = Criterion::MeanSquaredError.evaluate(&output, &targets).unwrap();

        assert!((loss - 2.5).abs() < 1e-12);
        assert!((grad[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((grad[[1, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_mse_shape_mismatch() {
        let output = array![[1.0, 2.0]];
        let targets = array![[0.0]];
        assert!(Criterion::MeanSquaredError.loss(&output, &targets).is_err());
    }

    #[test]
    fn test_cross_entropy() {
        let output = array![[0.0, 0.0], [10.0, -10.0]];
        let targets = array![[1.0], [0.0]];
        let (loss, grad) = Criterion::CrossEntropy.evaluate(&output, &targets).unwrap();

        let expected = (2.0f64.ln() + (1.0 + (-20.0f64).exp()).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-9);
        // Gradient rows of softmax - onehot sum to zero
        for row in grad.rows() {
            assert!(row.sum().abs() < 1e-12);
        }
    }

    #[test]
    fn test_cross_entropy_invalid_class() {
        let output = array![[0.0, 0.0]];
        let targets = array![[2.0]];
        assert!(Criterion::CrossEntropy.loss(&output, &targets).is_err());
    }

    #[test]
    fn test_softmax_rows() {
        let probs = softmax_rows(&array![[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]]);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!(probs[[0, 2]] > probs[[0, 1]]);
    }

    #[test]
    fn test_softmax_non_finite_row() {
        let probs = softmax_rows(&array![[0.0, f64::NAN], [1.0, 2.0]]);
        assert!(probs.row(0).iter().all(|p| p.is_nan()));
        assert!((probs.row(1).sum() - 1.0).abs() < 1e-12);

        let output = array![[f64::INFINITY, 0.0]];
        let loss = Criterion::CrossEntropy.loss(&output, &array![[0.0]]).unwrap();
        assert!(loss.is_nan());
    }
}
