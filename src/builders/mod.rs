//! Builders to construct the compute core from configuration.

pub mod core_builder;

pub use core_builder::{ComputeCore, ComputeCoreBuilder};
