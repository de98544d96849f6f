//! Differentiable architecture search
//!
//! - [`search_space`] - Candidate primitive operations
//! - [`network`] - The mixed-operation search network
//! - [`architect`] - Architecture weight updates
//! - [`sampler`] - Discretization into concrete architectures

pub mod architect;
pub mod network;
pub mod sampler;
pub mod search_space;

pub use architect::{Architect, DartsArchitect};
pub use network::{Gradients, MixedOpNetwork, MixedOpNetworkBuilder, NetworkFactory, SearchNetwork};
pub use sampler::{discretize_max, discretize_sample, ArchitectureSample, ArchitectureSampler};
pub use search_space::Primitive;
