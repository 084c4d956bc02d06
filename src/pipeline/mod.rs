//! Allocation runs around the core allocator.
//!
//! - **Intake**: JSONL participant records → allocations
//! - **Simulation**: synthetic cohort from configured prevalences → allocations

mod intake;
mod simulation;

pub use intake::*;
pub use simulation::*;
