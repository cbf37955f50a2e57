//! Model Module - Reconstruction pipelines and their parameters
//!
//! Weights are read once at startup, turned into typed stage groups and
//! registered under their wire identifiers. Nothing in here is mutated
//! after [`ModelRegistry::load`] returns.

pub mod architecture;
pub mod layers;
pub mod params;
pub mod registry;

#[cfg(test)]
pub mod testing;


// Re-export common types
pub use architecture::{InferenceError, ModelKind, Pipeline};
pub use params::ParameterStore;
pub use registry::{ModelRegistry, UnknownModelError};
