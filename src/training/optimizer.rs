//! Gradient-based optimizers
//!
//! SGD with momentum for network parameters and Adam for architecture weights.

use ndarray::{Array1, Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Stochastic gradient descent with momentum and masked L2 weight decay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sgd {
    learning_rate: f64,
    momentum: f64,
    weight_decay: f64,
    momentum_buffer: Option<Array1<f64>>,
}

impl Sgd {
    /// Create a new optimizer
    pub fn new(learning_rate: f64, momentum: f64, weight_decay: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            weight_decay,
            momentum_buffer: None,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    pub fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    /// Momentum buffer from the previous step, if any step has been taken
    pub fn momentum_buffer(&self) -> Option<&Array1<f64>> {
        self.momentum_buffer.as_ref()
    }

    /// Gradient plus weight decay on the entries selected by `decay_mask`
    pub fn decayed_gradient(
        &self,
        params: &Array1<f64>,
        grad: &Array1<f64>,
        decay_mask: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        check_len(params.len(), grad.len())?;
        check_len(params.len(), decay_mask.len())?;

        let mut d_p = grad.clone();
        if self.weight_decay != 0.0 {
            Zip::from(&mut d_p)
                .and(params)
                .and(decay_mask)
                .for_each(|d, &p, &m| *d += self.weight_decay * m * p);
        }
        Ok(d_p)
    }

    /// Apply one update to `params` in place
    pub fn step(
        &mut self,
        params: &mut Array1<f64>,
        grad: &Array1<f64>,
        decay_mask: &Array1<f64>,
    ) -> Result<()> {
        let d_p = self.decayed_gradient(params, grad, decay_mask)?;

        let update = if self.momentum != 0.0 {
            let buffer = match self.momentum_buffer.take() {
                Some(buf) if buf.len() == d_p.len() => buf * self.momentum + &d_p,
                _ => d_p,
            };
            self.momentum_buffer = Some(buffer.clone());
            buffer
        } else {
            d_p
        };

        params.scaled_add(-self.learning_rate, &update);
        Ok(())
    }
}

/// Adam optimizer over a 2-D tensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    weight_decay: f64,
    m: Option<Array2<f64>>,
    v: Option<Array2<f64>>,
    t: i32,
}

impl Adam {
    /// Create a new optimizer with the given betas
    pub fn new(learning_rate: f64, betas: (f64, f64), weight_decay: f64) -> Self {
        Self {
            learning_rate,
            beta1: betas.0,
            beta2: betas.1,
            epsilon: 1e-8,
            weight_decay,
            m: None,
            v: None,
            t: 0,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    /// Number of steps taken
    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Apply one update to `params` in place
    pub fn step(&mut self, params: &mut Array2<f64>, grad: &Array2<f64>) -> Result<()> {
        if params.dim() != grad.dim() {
            return Err(SearchError::ShapeError {
                expected: format!("{:?}", params.dim()),
                actual: format!("{:?}", grad.dim()),
            });
        }

        let mut g = grad.clone();
        if self.weight_decay != 0.0 {
            g.scaled_add(self.weight_decay, params);
        }

        let dim = params.raw_dim();
        let mut m = self.m.take().filter(|m| m.dim() == g.dim()).unwrap_or_else(|| Array2::zeros(dim.clone()));
        let mut v = self.v.take().filter(|v| v.dim() == g.dim()).unwrap_or_else(|| Array2::zeros(dim));

        self.t += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        Zip::from(&mut m).and(&g).for_each(|m, &g| *m = b1 * *m + (1.0 - b1) * g);
        Zip::from(&mut v).and(&g).for_each(|v, &g| *v = b2 * *v + (1.0 - b2) * g * g);

        let bias1 = 1.0 - b1.powi(self.t);
        let bias2 = 1.0 - b2.powi(self.t);
        let (lr, eps) = (self.learning_rate, self.epsilon);
        Zip::from(params).and(&m).and(&v).for_each(|p, &m, &v| {
            let m_hat = m / bias1;
            let v_hat = v / bias2;
            *p -= lr * m_hat / (v_hat.sqrt() + eps);
        });

        self.m = Some(m);
        self.v = Some(v);
        Ok(())
    }
}

/// Clip the gradient's L2 norm to `max_norm` in place; returns the norm before clipping
pub fn clip_grad_norm(grad: &mut Array1<f64>, max_norm: f64) -> f64 {
    let total_norm = grad.dot(grad).sqrt();
    let clip_coef = max_norm / (total_norm + 1e-6);
    if clip_coef < 1.0 {
        grad.mapv_inplace(|g| g * clip_coef);
    }
    total_norm
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(SearchError::ShapeError {
            expected: format!("{} parameters", expected),
            actual: format!("{} parameters", actual),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sgd_plain_step() {
        let mut opt = Sgd::new(0.1, 0.0, 0.0);
        let mut params = array![1.0, 2.0];
        opt.step(&mut params, &array![1.0, -1.0], &array![1.0, 1.0]).unwrap();

        assert!((params[0] - 0.9).abs() < 1e-12);
        assert!((params[1] - 2.1).abs() < 1e-12);
        assert!(opt.momentum_buffer().is_none());
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut opt = Sgd::new(1.0, 0.9, 0.0);
        let mut params = array![0.0];
        let mask = array![1.0];
        opt.step(&mut params, &array![1.0], &mask).unwrap();
        opt.step(&mut params, &array![1.0], &mask).unwrap();

        // -1.0 then -(0.9 + 1.0)
        assert!((params[0] + 2.9).abs() < 1e-12);
        assert!((opt.momentum_buffer().unwrap()[0] - 1.9).abs() < 1e-12);
    }

    #[test]
    fn test_sgd_decay_mask() {
        let mut opt = Sgd::new(0.5, 0.0, 0.1);
        let mut params = array![1.0, 1.0];
        opt.step(&mut params, &array![0.0, 0.0], &array![1.0, 0.0]).unwrap();

        assert!(params[0] < 1.0);
        assert_eq!(params[1], 1.0);
    }

    #[test]
    fn test_sgd_length_mismatch() {
        let mut opt = Sgd::new(0.1, 0.0, 0.0);
        let mut params = array![1.0, 2.0];
        assert!(opt.step(&mut params, &array![1.0], &array![1.0, 1.0]).is_err());
    }

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut opt = Adam::new(0.01, (0.5, 0.999), 0.0);
        let mut params = array![[0.0, 0.0]];
        opt.step(&mut params, &array![[1.0, -1.0]]).unwrap();

        // First bias-corrected Adam step has magnitude ~lr
        assert!((params[[0, 0]] + 0.01).abs() < 1e-6);
        assert!((params[[0, 1]] - 0.01).abs() < 1e-6);
        assert_eq!(opt.steps(), 1);
    }

    #[test]
    fn test_clip_grad_norm() {
        let mut grad = array![3.0, 4.0];
        let norm = clip_grad_norm(&mut grad, 1.0);

        assert!((norm - 5.0).abs() < 1e-12);
        assert!((grad.dot(&grad).sqrt() - 1.0).abs() < 1e-5);

        let mut small = array![0.1, 0.1];
        clip_grad_norm(&mut small, 5.0);
        assert_eq!(small, array![0.1, 0.1]);
    }
}
