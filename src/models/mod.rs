//! Core data models for minimiser.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Two arms, validated categories, append-only ledger
//! - B_i (Beliefs): Participant input wrapped in Result
//! - I^R (Resolvable): Randomisation options from config

mod config;
mod error;
mod participant;

pub use config::*;
pub use error::*;
pub use participant::*;
