//! Search configuration

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::nas::search_space::Primitive;
use crate::training::loss::Criterion;
use crate::training::step::StepSettings;

/// One point of the meta-parameter grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchConfiguration {
    /// Weight of the architecture complexity penalty
    pub regularization_strength: f64,
    /// Number of intermediate graph nodes
    pub graph_size: usize,
    /// Seed of every random source of the configuration
    pub seed: u64,
}

impl SearchConfiguration {
    /// Deterministic artifact name for this configuration
    pub fn artifact_name(&self, prefix: &str, search_id: &str) -> String {
        format!(
            "{}_v_{}_wd_{}_k_{}_s_{}",
            prefix, search_id, self.regularization_strength, self.graph_size, self.seed
        )
    }
}

impl fmt::Display for SearchConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "regularization={} graph_size={} seed={}",
            self.regularization_strength, self.graph_size, self.seed
        )
    }
}

/// How candidate models are initialized before retraining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateInit {
    /// Start from a copy of the relaxed search weights
    WarmStart,
    /// Start from freshly initialized weights
    ColdStart,
}

impl Default for CandidateInit {
    fn default() -> Self {
        Self::WarmStart
    }
}

/// Meta-parameter grid
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub regularization_strengths: Vec<f64>,
    pub graph_sizes: Vec<usize>,
    pub seeds: Vec<u64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            regularization_strengths: vec![0.0, 1e-4],
            graph_sizes: vec![1, 2, 3],
            seeds: vec![0],
        }
    }
}

impl GridConfig {
    /// Full cross product: regularization outermost, seed innermost
    pub fn configurations(&self) -> Vec<SearchConfiguration> {
        let mut configs =
            Vec::with_capacity(self.regularization_strengths.len() * self.graph_sizes.len() * self.seeds.len());
        for &regularization_strength in &self.regularization_strengths {
            for &graph_size in &self.graph_sizes {
                for &seed in &self.seeds {
                    configs.push(SearchConfiguration {
                        regularization_strength,
                        graph_size,
                        seed,
                    });
                }
            }
        }
        configs
    }
}

/// Network weight training
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Epoch budget for both relaxed search and candidate retraining
    pub epochs: usize,
    pub batch_size: usize,
    /// Leading share of the data used for training
    pub train_portion: f64,
    pub learning_rate: f64,
    /// Floor of the cosine schedule
    pub learning_rate_min: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub grad_clip: f64,
    /// Rounds of (architecture update, parameter updates) per epoch
    pub arch_updates: usize,
    /// Parameter updates per round
    pub param_updates: usize,
    /// Decay of the output layer after every parameter update
    pub classifier_weight_decay: f64,
    pub report_freq: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 64,
            train_portion: 0.8,
            learning_rate: 0.025,
            learning_rate_min: 0.01,
            momentum: 0.9,
            weight_decay: 3e-4,
            grad_clip: 5.0,
            arch_updates: 1,
            param_updates: 10,
            classifier_weight_decay: 1e-2,
            report_freq: 10,
        }
    }
}

/// Architecture weight training
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectConfig {
    pub learning_rate: f64,
    /// Cosine-anneal the architecture learning rate down to this value
    pub learning_rate_min: Option<f64>,
    pub weight_decay: f64,
    /// Use the unrolled (second-order) gradient approximation
    pub unrolled: bool,
}

impl Default for ArchitectConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-3,
            learning_rate_min: None,
            weight_decay: 1e-4,
            unrolled: false,
        }
    }
}

/// Candidate sampling and retraining
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Candidates per configuration, the arg-max architecture included
    pub n_samples: usize,
    /// Softmax temperature of stochastic draws
    pub temperature: f64,
    /// Draw cap for each new unique candidate
    pub max_resample_attempts: usize,
    pub init: CandidateInit,
    /// Parameter updates per epoch when retraining; defaults to the search value
    pub param_updates: Option<usize>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            n_samples: 3,
            temperature: 1.0,
            max_resample_attempts: 100,
            init: CandidateInit::WarmStart,
            param_updates: None,
        }
    }
}

/// Complete configuration of a meta-search sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Version tag embedded in every artifact name
    pub search_id: String,
    /// Candidate operation names
    pub primitives: Vec<String>,
    pub criterion: Criterion,
    pub grid: GridConfig,
    pub training: TrainingConfig,
    pub architect: ArchitectConfig,
    pub evaluation: EvaluationConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_id: "search".to_string(),
            primitives: Primitive::default_set().iter().map(|p| p.name().to_string()).collect(),
            criterion: Criterion::default(),
            grid: GridConfig::default(),
            training: TrainingConfig::default(),
            architect: ArchitectConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SearchError::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_search_id(mut self, search_id: impl Into<String>) -> Self {
        self.search_id = search_id.into();
        self
    }

    pub fn with_primitives<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.primitives = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn with_grid(mut self, regularization_strengths: Vec<f64>, graph_sizes: Vec<usize>, seeds: Vec<u64>) -> Self {
        self.grid = GridConfig {
            regularization_strengths,
            graph_sizes,
            seeds,
        };
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.training.epochs = epochs;
        self
    }

    pub fn with_n_samples(mut self, n_samples: usize) -> Self {
        self.evaluation.n_samples = n_samples;
        self
    }

    pub fn with_candidate_init(mut self, init: CandidateInit) -> Self {
        self.evaluation.init = init;
        self
    }

    /// Parsed primitive set
    pub fn primitive_set(&self) -> Result<Vec<Primitive>> {
        Primitive::parse_list(&self.primitives)
    }

    /// Step settings of the relaxed search
    pub fn search_step(&self) -> StepSettings {
        StepSettings {
            arch_updates: self.training.arch_updates,
            param_updates: self.training.param_updates,
            grad_clip: self.training.grad_clip,
            unrolled: self.architect.unrolled,
            report_freq: self.training.report_freq,
        }
    }

    /// Step settings of candidate retraining
    pub fn evaluation_step(&self) -> StepSettings {
        StepSettings {
            arch_updates: 1,
            param_updates: self.evaluation.param_updates.unwrap_or(self.training.param_updates),
            grad_clip: self.training.grad_clip,
            unrolled: false,
            report_freq: self.training.report_freq,
        }
    }

    /// Reject invalid settings before any training starts
    pub fn validate(&self) -> Result<()> {
        if self.search_id.is_empty() || self.search_id.contains(['/', '\\']) {
            return Err(config_error(format!("invalid search id '{}'", self.search_id)));
        }

        let primitives = self.primitive_set()?;
        if primitives.is_empty() {
            return Err(config_error("primitive list is empty"));
        }
        for (i, p) in primitives.iter().enumerate() {
            if primitives[..i].contains(p) {
                return Err(config_error(format!("primitive '{}' listed twice", p)));
            }
        }

        let grid = &self.grid;
        if grid.regularization_strengths.is_empty() || grid.graph_sizes.is_empty() || grid.seeds.is_empty() {
            return Err(config_error("every grid list needs at least one value"));
        }
        if let Some(bad) = grid
            .regularization_strengths
            .iter()
            .find(|r| !r.is_finite() || **r < 0.0)
        {
            return Err(config_error(format!("regularization strength {} is not a finite non-negative value", bad)));
        }
        if grid.graph_sizes.contains(&0) {
            return Err(config_error("graph sizes must be at least 1"));
        }
        // Repeated grid values would share artifact names and summary tables
        if let Some(r) = first_duplicate(&grid.regularization_strengths) {
            return Err(config_error(format!("regularization strength {} listed twice", r)));
        }
        if let Some(k) = first_duplicate(&grid.graph_sizes) {
            return Err(config_error(format!("graph size {} listed twice", k)));
        }
        if let Some(seed) = first_duplicate(&grid.seeds) {
            return Err(config_error(format!("seed {} listed twice", seed)));
        }

        let t = &self.training;
        if t.batch_size == 0 {
            return Err(config_error("batch size must be positive"));
        }
        if !(t.train_portion > 0.0 && t.train_portion < 1.0) {
            return Err(config_error(format!("train portion {} is outside (0, 1)", t.train_portion)));
        }
        if !(t.learning_rate > 0.0) || t.learning_rate_min < 0.0 || t.learning_rate_min > t.learning_rate {
            return Err(config_error(format!(
                "learning rates must satisfy 0 <= min ({}) <= max ({}), max > 0",
                t.learning_rate_min, t.learning_rate
            )));
        }
        if t.momentum < 0.0 || t.weight_decay < 0.0 || t.classifier_weight_decay < 0.0 {
            return Err(config_error("momentum and decays must be non-negative"));
        }
        if !(t.grad_clip > 0.0) {
            return Err(config_error("gradient clip must be positive"));
        }

        let a = &self.architect;
        if !(a.learning_rate > 0.0) || a.weight_decay < 0.0 {
            return Err(config_error("architecture learning rate must be positive"));
        }
        if let Some(min) = a.learning_rate_min {
            if min < 0.0 || min > a.learning_rate {
                return Err(config_error(format!(
                    "architecture learning rate floor {} exceeds {}",
                    min, a.learning_rate
                )));
            }
        }

        let e = &self.evaluation;
        if e.n_samples == 0 {
            return Err(config_error("n_samples must be at least 1"));
        }
        if !(e.temperature > 0.0 && e.temperature.is_finite()) {
            return Err(config_error(format!("sampling temperature {} must be positive", e.temperature)));
        }
        if e.max_resample_attempts == 0 {
            return Err(config_error("max_resample_attempts must be at least 1"));
        }

        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> SearchError {
    SearchError::ConfigError(msg.into())
}

fn first_duplicate<T: PartialEq>(values: &[T]) -> Option<&T> {
    values
        .iter()
        .enumerate()
        .find(|(i, v)| values[..*i].contains(v))
        .map(|(_, v)| v)
}
