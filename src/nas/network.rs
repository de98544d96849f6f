//! Mixed-operation search network
//!
//! Continuous relaxation of a small computation graph. The external inputs
//! are the first graph states; every intermediate node sums a mixture of
//! candidate operations over edges from all inputs and all earlier nodes, and
//! a linear output layer maps the node states to the outputs.

use std::fmt::Debug;

use ndarray::{Array1, Array2, Array3, Axis, Zip};
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::sampler::{self, ArchitectureSample};
use super::search_space::{Primitive, MAX_PRIMITIVE_PARAMS};
use crate::error::{Result, SearchError};
use crate::training::loss::{softmax_rows, Criterion};

/// Loss and gradients of one forward/backward pass
#[derive(Debug, Clone)]
pub struct Gradients {
    pub loss: f64,
    /// Gradient over the flat parameter vector
    pub params: Array1<f64>,
    /// Gradient over the architecture weights; `None` when the architecture is fixed
    pub architecture: Option<Array2<f64>>,
}

/// A network whose architecture can be searched and then frozen
pub trait SearchNetwork: Clone + Debug + Serialize + DeserializeOwned {
    /// Network output for a batch of inputs
    fn forward(&self, inputs: &Array2<f64>) -> Result<Array2<f64>>;

    /// Loss plus parameter and architecture gradients for a batch
    fn gradients(&self, inputs: &Array2<f64>, targets: &Array2<f64>, criterion: Criterion) -> Result<Gradients>;

    /// Flat copy of every continuous parameter
    fn params(&self) -> Array1<f64>;

    /// Overwrite the continuous parameters from a flat vector
    fn set_params(&mut self, params: &Array1<f64>) -> Result<()>;

    /// 1.0 where the optimizer's weight decay applies, 0.0 elsewhere
    fn decay_mask(&self) -> Array1<f64>;

    /// Architecture weights `[edge, operation]`
    fn architecture_weights(&self) -> &Array2<f64>;

    fn architecture_weights_mut(&mut self) -> &mut Array2<f64>;

    /// Freeze (or release) the architecture, optionally replacing its weights
    fn fix_architecture(&mut self, fixed: bool, weights: Option<&Array2<f64>>) -> Result<()>;

    fn is_architecture_fixed(&self) -> bool;

    /// Shrink the output layer by `1 - lr * decay`
    fn apply_output_decay(&mut self, lr: f64);

    /// Learnable parameter count of each candidate operation
    fn operation_param_counts(&self) -> Vec<usize>;

    /// Number of intermediate graph nodes
    fn graph_size(&self) -> usize;

    /// Candidate operations, in architecture-weight column order
    fn primitives(&self) -> &[Primitive];

    /// Human readable equations for a discrete architecture
    fn render(&self, sample: &ArchitectureSample) -> Vec<String>;

    /// Loss on a batch without gradients
    fn loss(&self, inputs: &Array2<f64>, targets: &Array2<f64>, criterion: Criterion) -> Result<f64> {
        let output = self.forward(inputs)?;
        let loss = criterion.loss(&output, targets)?;
        if !loss.is_finite() {
            return Err(SearchError::divergence("loss evaluation", loss));
        }
        Ok(loss)
    }

    /// Deterministic discretization of the current architecture weights
    fn discretize_max(&self) -> ArchitectureSample {
        sampler::discretize_max(self.architecture_weights(), self.primitives())
    }

    /// Stochastic discretization of the current architecture weights
    fn discretize_sample<R: Rng>(&self, temperature: f64, rng: &mut R) -> Result<ArchitectureSample> {
        sampler::discretize_sample(self.architecture_weights(), temperature, rng)
    }
}

/// Builds fresh networks of a given graph size
pub trait NetworkFactory {
    type Network: SearchNetwork;

    fn build(&self, graph_size: usize, rng: &mut Xoshiro256PlusPlus) -> Result<Self::Network>;
}

/// Number of edges in a graph with `steps` nodes and `n_inputs` external inputs
pub fn num_edges(n_inputs: usize, steps: usize) -> usize {
    steps * n_inputs + steps * steps.saturating_sub(1) / 2
}

/// Index of the first edge feeding node `node`
fn edge_offset(n_inputs: usize, node: usize) -> usize {
    node * n_inputs + node * node.saturating_sub(1) / 2
}

/// Graph network mixing candidate operations on every edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedOpNetwork {
    n_inputs: usize,
    n_outputs: usize,
    steps: usize,
    primitives: Vec<Primitive>,
    /// Architecture weights `[edge, operation]`
    alphas: Array2<f64>,
    /// Operation parameters `[edge, operation, slot]`
    op_params: Array3<f64>,
    /// Output layer `[output, node]`
    classifier_weight: Array2<f64>,
    classifier_bias: Array1<f64>,
    classifier_weight_decay: f64,
    architecture_fixed: bool,
}

struct ForwardCache {
    states: Vec<Array1<f64>>,
    mixing: Array2<f64>,
    output: Array2<f64>,
}

impl MixedOpNetwork {
    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    /// L2 norm of the output layer weights
    pub fn output_layer_norm(&self) -> f64 {
        self.classifier_weight.iter().map(|w| w * w).sum::<f64>().sqrt()
    }

    fn num_params(&self) -> usize {
        self.op_params.len() + self.classifier_weight.len() + self.classifier_bias.len()
    }

    /// Weights the edge mixture uses: softmax when relaxed, raw when fixed
    fn mixing_weights(&self) -> Array2<f64> {
        if self.architecture_fixed {
            self.alphas.clone()
        } else {
            softmax_rows(&self.alphas)
        }
    }

    fn op_param(&self, edge: usize, op: usize) -> [f64; MAX_PRIMITIVE_PARAMS] {
        [self.op_params[[edge, op, 0]], self.op_params[[edge, op, 1]]]
    }

    fn run(&self, inputs: &Array2<f64>) -> Result<ForwardCache> {
        if inputs.ncols() != self.n_inputs {
            return Err(SearchError::ShapeError {
                expected: format!("{} input columns", self.n_inputs),
                actual: format!("{} input columns", inputs.ncols()),
            });
        }

        let mixing = self.mixing_weights();
        let batch = inputs.nrows();
        let mut states: Vec<Array1<f64>> = inputs.axis_iter(Axis(1)).map(|c| c.to_owned()).collect();

        for node in 0..self.steps {
            let offset = edge_offset(self.n_inputs, node);
            let mut acc = Array1::zeros(batch);
            for (src, state) in states.iter().enumerate() {
                let edge = offset + src;
                for (op, prim) in self.primitives.iter().enumerate() {
                    let w = mixing[[edge, op]];
                    if w == 0.0 || prim.is_none() {
                        continue;
                    }
                    let p = self.op_param(edge, op);
                    Zip::from(&mut acc).and(state).for_each(|a, &x| *a += w * prim.forward(x, p));
                }
            }
            states.push(acc);
        }

        let mut output = Array2::zeros((batch, self.n_outputs));
        for (node, state) in states[self.n_inputs..].iter().enumerate() {
            for out in 0..self.n_outputs {
                let w = self.classifier_weight[[out, node]];
                output.column_mut(out).scaled_add(w, state);
            }
        }
        output += &self.classifier_bias;

        if let Some(bad) = output.iter().find(|v| !v.is_finite()) {
            return Err(SearchError::divergence("forward pass", *bad));
        }

        Ok(ForwardCache { states, mixing, output })
    }

    fn equation_terms(&self, sample: &ArchitectureSample, names: &[String], node: usize) -> Vec<String> {
        let offset = edge_offset(self.n_inputs, node);
        (0..self.n_inputs + node)
            .filter_map(|src| {
                let edge = offset + src;
                let op = *sample.choices.get(edge)?;
                let prim = self.primitives.get(op)?;
                prim.render(&names[src], self.op_param(edge, op))
            })
            .collect()
    }
}

impl SearchNetwork for MixedOpNetwork {
    fn forward(&self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        self.run(inputs).map(|cache| cache.output)
    }

    fn gradients(&self, inputs: &Array2<f64>, targets: &Array2<f64>, criterion: Criterion) -> Result<Gradients> {
        let cache = self.run(inputs)?;
        let (loss, d_output) = criterion.evaluate(&cache.output, targets)?;
        if !loss.is_finite() {
            return Err(SearchError::divergence("loss evaluation", loss));
        }

        let n_in = self.n_inputs;
        let (n_edges, n_ops) = self.alphas.dim();

        // Output layer
        let mut d_weight = Array2::zeros(self.classifier_weight.raw_dim());
        let mut d_states: Vec<Array1<f64>> = cache.states.iter().map(|s| Array1::zeros(s.len())).collect();
        for node in 0..self.steps {
            let state = &cache.states[n_in + node];
            for out in 0..self.n_outputs {
                let g = d_output.column(out);
                d_weight[[out, node]] = g.dot(state);
                d_states[n_in + node].scaled_add(self.classifier_weight[[out, node]], &g);
            }
        }
        let d_bias = d_output.sum_axis(Axis(0));

        // Graph nodes in reverse order
        let mut d_op_params = Array3::<f64>::zeros(self.op_params.raw_dim());
        let mut d_mixing = Array2::<f64>::zeros((n_edges, n_ops));
        for node in (0..self.steps).rev() {
            let offset = edge_offset(n_in, node);
            let g = d_states[n_in + node].clone();
            for src in 0..n_in + node {
                let edge = offset + src;
                let x = &cache.states[src];
                let mut d_src = Array1::zeros(x.len());
                for (op, prim) in self.primitives.iter().enumerate() {
                    if prim.is_none() {
                        continue;
                    }
                    let w = cache.mixing[[edge, op]];
                    let p = self.op_param(edge, op);
                    let mut dw = 0.0;
                    let mut dp = [0.0; MAX_PRIMITIVE_PARAMS];
                    Zip::from(&mut d_src).and(x).and(&g).for_each(|ds, &xv, &gv| {
                        let (dx, dparam) = prim.backward(xv, p);
                        dw += gv * prim.forward(xv, p);
                        dp[0] += gv * dparam[0];
                        dp[1] += gv * dparam[1];
                        *ds += w * gv * dx;
                    });
                    d_mixing[[edge, op]] = dw;
                    d_op_params[[edge, op, 0]] = w * dp[0];
                    d_op_params[[edge, op, 1]] = w * dp[1];
                }
                d_states[src] += &d_src;
            }
        }

        // Softmax Jacobian: dalpha_k = w_k (dw_k - sum_o w_o dw_o)
        let architecture = if self.architecture_fixed {
            None
        } else {
            let mut d_alpha = Array2::zeros((n_edges, n_ops));
            for edge in 0..n_edges {
                let w = cache.mixing.row(edge);
                let dw = d_mixing.row(edge);
                let inner = w.dot(&dw);
                for op in 0..n_ops {
                    d_alpha[[edge, op]] = w[op] * (dw[op] - inner);
                }
            }
            Some(d_alpha)
        };

        let params: Array1<f64> = d_op_params
            .iter()
            .chain(d_weight.iter())
            .chain(d_bias.iter())
            .copied()
            .collect();

        Ok(Gradients {
            loss,
            params,
            architecture,
        })
    }

    fn params(&self) -> Array1<f64> {
        self.op_params
            .iter()
            .chain(self.classifier_weight.iter())
            .chain(self.classifier_bias.iter())
            .copied()
            .collect()
    }

    fn set_params(&mut self, params: &Array1<f64>) -> Result<()> {
        if params.len() != self.num_params() {
            return Err(SearchError::ShapeError {
                expected: format!("{} parameters", self.num_params()),
                actual: format!("{} parameters", params.len()),
            });
        }
        let mut values = params.iter().copied();
        for (dst, src) in self
            .op_params
            .iter_mut()
            .chain(self.classifier_weight.iter_mut())
            .chain(self.classifier_bias.iter_mut())
            .zip(&mut values)
        {
            *dst = src;
        }
        Ok(())
    }

    fn decay_mask(&self) -> Array1<f64> {
        let mut mask = Array1::zeros(self.num_params());
        let (n_edges, n_ops, n_slots) = self.op_params.dim();
        for edge in 0..n_edges {
            for (op, prim) in self.primitives.iter().enumerate().take(n_ops) {
                for slot in 0..prim.num_params().min(n_slots) {
                    mask[(edge * n_ops + op) * n_slots + slot] = 1.0;
                }
            }
        }
        mask
    }

    fn architecture_weights(&self) -> &Array2<f64> {
        &self.alphas
    }

    fn architecture_weights_mut(&mut self) -> &mut Array2<f64> {
        &mut self.alphas
    }

    fn fix_architecture(&mut self, fixed: bool, weights: Option<&Array2<f64>>) -> Result<()> {
        if let Some(weights) = weights {
            if weights.dim() != self.alphas.dim() {
                return Err(SearchError::ShapeError {
                    expected: format!("{:?}", self.alphas.dim()),
                    actual: format!("{:?}", weights.dim()),
                });
            }
            self.alphas.assign(weights);
        }
        self.architecture_fixed = fixed;
        Ok(())
    }

    fn is_architecture_fixed(&self) -> bool {
        self.architecture_fixed
    }

    fn apply_output_decay(&mut self, lr: f64) {
        let factor = 1.0 - lr * self.classifier_weight_decay;
        self.classifier_weight.mapv_inplace(|w| w * factor);
    }

    fn operation_param_counts(&self) -> Vec<usize> {
        self.primitives.iter().map(|p| p.num_params()).collect()
    }

    fn graph_size(&self) -> usize {
        self.steps
    }

    fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    fn render(&self, sample: &ArchitectureSample) -> Vec<String> {
        let mut names: Vec<String> = (1..=self.n_inputs).map(|i| format!("x{}", i)).collect();
        let mut lines = Vec::with_capacity(self.steps + self.n_outputs);

        for node in 0..self.steps {
            let terms = self.equation_terms(sample, &names, node);
            let name = format!("k{}", node + 1);
            let rhs = if terms.is_empty() { "0".to_string() } else { terms.join(" + ") };
            lines.push(format!("{} = {}", name, rhs));
            names.push(name);
        }

        for out in 0..self.n_outputs {
            let terms: Vec<String> = (0..self.steps)
                .map(|node| format!("{:.4} * {}", self.classifier_weight[[out, node]], names[self.n_inputs + node]))
                .collect();
            lines.push(format!(
                "y{} = {} + {:.4}",
                out + 1,
                terms.join(" + "),
                self.classifier_bias[out]
            ));
        }
        lines
    }
}

/// Factory for [`MixedOpNetwork`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedOpNetworkBuilder {
    pub n_inputs: usize,
    pub n_outputs: usize,
    pub primitives: Vec<Primitive>,
    /// Decay applied to the output layer after each parameter update
    pub classifier_weight_decay: f64,
}

impl MixedOpNetworkBuilder {
    pub fn new(n_inputs: usize, n_outputs: usize, primitives: Vec<Primitive>) -> Self {
        Self {
            n_inputs,
            n_outputs,
            primitives,
            classifier_weight_decay: 0.0,
        }
    }

    pub fn with_classifier_weight_decay(mut self, decay: f64) -> Self {
        self.classifier_weight_decay = decay;
        self
    }
}

impl NetworkFactory for MixedOpNetworkBuilder {
    type Network = MixedOpNetwork;

    fn build(&self, graph_size: usize, rng: &mut Xoshiro256PlusPlus) -> Result<MixedOpNetwork> {
        if graph_size == 0 {
            return Err(SearchError::ConfigError("graph size must be at least 1".to_string()));
        }
        if self.n_inputs == 0 || self.n_outputs == 0 {
            return Err(SearchError::ConfigError("network needs inputs and outputs".to_string()));
        }
        if self.primitives.is_empty() {
            return Err(SearchError::ConfigError("primitive set is empty".to_string()));
        }

        let n_edges = num_edges(self.n_inputs, graph_size);
        let n_ops = self.primitives.len();

        let alphas = Array2::from_shape_fn((n_edges, n_ops), |_| (rng.gen::<f64>() - 0.5) * 1e-3);

        let mut op_params = Array3::zeros((n_edges, n_ops, MAX_PRIMITIVE_PARAMS));
        for edge in 0..n_edges {
            for (op, prim) in self.primitives.iter().enumerate() {
                for slot in 0..prim.num_params() {
                    op_params[[edge, op, slot]] = rng.gen_range(-1.0..1.0);
                }
            }
        }

        let bound = 1.0 / (graph_size as f64).sqrt();
        let classifier_weight =
            Array2::from_shape_fn((self.n_outputs, graph_size), |_| rng.gen_range(-bound..bound));
        let classifier_bias = Array1::from_shape_fn(self.n_outputs, |_| rng.gen_range(-bound..bound));

        Ok(MixedOpNetwork {
            n_inputs: self.n_inputs,
            n_outputs: self.n_outputs,
            steps: graph_size,
            primitives: self.primitives.clone(),
            alphas,
            op_params,
            classifier_weight,
            classifier_bias,
            classifier_weight_decay: self.classifier_weight_decay,
            architecture_fixed: false,
        })
    }
}
