//! minimiser - Two-arm minimisation for stratified trial allocation.
//!
//! ## Architecture
//!
//! - **Schema**: Stratification variables and their allowed categories
//! - **Allocator**: Tally, ledger and the allocation decision
//! - **Report**: Per-arm category counts and balance tables
//! - **Store**: Ledger snapshots and JSONL export
//! - **Pipeline**: JSONL intake and synthetic cohorts
//!
//! ## Allocation
//!
//! Each participant is either assigned by a fair coin (with the configured
//! true-randomization probability) or sent to the arm currently holding
//! fewer participants that share its categories, ties broken by coin.
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (two arms, validated profiles)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Randomness behind an injectable source

pub mod allocator;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod store;

// Re-exports for convenience
pub use allocator::{
    Allocator, ChaChaSource, RandomSource, ScriptedSource, SharedAllocator, SourceState,
};
pub use models::{
    Allocation, AllocationError, AllocationMethod, Arm, Characteristics, Config, Enrollment,
    MinimiserError, ParticipantId, Result, SchemaError, TrialConfig, ValidationError,
};
pub use report::{BalanceReport, CharacteristicsByArm};
pub use schema::Schema;
pub use store::{export_jsonl, LedgerStore};
