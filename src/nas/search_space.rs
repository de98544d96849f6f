//! Primitive Operation Search Space
//!
//! Defines the candidate operations that can sit on a graph edge.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Maximum number of learnable parameters any primitive carries
pub const MAX_PRIMITIVE_PARAMS: usize = 2;

/// Types of operations in the search space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    /// No connection (outputs zero)
    None,
    /// Identity
    Add,
    /// Negation
    Subtract,
    /// Learnable scaling `a * x`
    Mult,
    /// Learnable affine map `a * x + b`
    Linear,
    /// Exponential
    Exp,
    /// Logistic sigmoid
    Logistic,
    /// Rectified linear unit
    Relu,
    /// Sine
    Sin,
    /// Cosine
    Cos,
    /// Hyperbolic tangent
    Tanh,
    /// Square
    Pow2,
    /// Cube
    Pow3,
    /// Absolute value
    Abs,
}

impl Primitive {
    /// Every primitive the search space knows about
    pub fn all() -> Vec<Self> {
        vec![
            Self::None,
            Self::Add,
            Self::Subtract,
            Self::Mult,
            Self::Linear,
            Self::Exp,
            Self::Logistic,
            Self::Relu,
            Self::Sin,
            Self::Cos,
            Self::Tanh,
            Self::Pow2,
            Self::Pow3,
            Self::Abs,
        ]
    }

    /// Default operation set for equation discovery on tabular data
    pub fn default_set() -> Vec<Self> {
        vec![
            Self::None,
            Self::Add,
            Self::Subtract,
            Self::Mult,
            Self::Linear,
            Self::Exp,
            Self::Logistic,
            Self::Relu,
            Self::Sin,
        ]
    }

    /// Parse a list of primitive names, failing on the first unknown one
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<Self>> {
        names.iter().map(|name| name.as_ref().parse()).collect()
    }

    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Mult => "mult",
            Self::Linear => "linear",
            Self::Exp => "exp",
            Self::Logistic => "logistic",
            Self::Relu => "relu",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tanh => "tanh",
            Self::Pow2 => "pow2",
            Self::Pow3 => "pow3",
            Self::Abs => "abs",
        }
    }

    /// Whether this is the designated no-op
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Number of learnable parameters the operation uses
    pub fn num_params(&self) -> usize {
        match self {
            Self::Mult => 1,
            Self::Linear => 2,
            _ => 0,
        }
    }

    /// Apply the operation to a scalar input
    pub fn forward(&self, x: f64, params: [f64; MAX_PRIMITIVE_PARAMS]) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Add => x,
            Self::Subtract => -x,
            Self::Mult => params[0] * x,
            Self::Linear => params[0] * x + params[1],
            Self::Exp => x.exp(),
            Self::Logistic => logistic(x),
            Self::Relu => x.max(0.0),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tanh => x.tanh(),
            Self::Pow2 => x * x,
            Self::Pow3 => x * x * x,
            Self::Abs => x.abs(),
        }
    }

    /// Derivatives of the output with respect to the input and each parameter
    pub fn backward(
        &self,
        x: f64,
        params: [f64; MAX_PRIMITIVE_PARAMS],
    ) -> (f64, [f64; MAX_PRIMITIVE_PARAMS]) {
        match self {
            Self::None => (0.0, [0.0, 0.0]),
            Self::Add => (1.0, [0.0, 0.0]),
            Self::Subtract => (-1.0, [0.0, 0.0]),
            Self::Mult => (params[0], [x, 0.0]),
            Self::Linear => (params[0], [x, 1.0]),
            Self::Exp => (x.exp(), [0.0, 0.0]),
            Self::Logistic => {
                let s = logistic(x);
                (s * (1.0 - s), [0.0, 0.0])
            }
            Self::Relu => (if x > 0.0 { 1.0 } else { 0.0 }, [0.0, 0.0]),
            Self::Sin => (x.cos(), [0.0, 0.0]),
            Self::Cos => (-x.sin(), [0.0, 0.0]),
            Self::Tanh => {
                let t = x.tanh();
                (1.0 - t * t, [0.0, 0.0])
            }
            Self::Pow2 => (2.0 * x, [0.0, 0.0]),
            Self::Pow3 => (3.0 * x * x, [0.0, 0.0]),
            Self::Abs => {
                let d = if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                (d, [0.0, 0.0])
            }
        }
    }

    /// Render the operation applied to `arg` as an expression
    pub fn render(&self, arg: &str, params: [f64; MAX_PRIMITIVE_PARAMS]) -> Option<String> {
        let expr = match self {
            Self::None => return None,
            Self::Add => arg.to_string(),
            Self::Subtract => format!("-({})", arg),
            Self::Mult => format!("{:.4} * {}", params[0], arg),
            Self::Linear => format!("({:.4} * {} + {:.4})", params[0], arg, params[1]),
            Self::Pow2 => format!("({})^2", arg),
            Self::Pow3 => format!("({})^3", arg),
            _ => format!("{}({})", self.name(), arg),
        };
        Some(expr)
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Primitive {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        Self::all()
            .into_iter()
            .find(|p| p.name() == needle)
            .ok_or_else(|| SearchError::UnknownPrimitive(s.to_string()))
    }
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
