//! Two-arm minimisation with a biased coin.
//!
//! Allocation flow for each participant:
//! 1. Reject duplicates and schema mismatches (no state touched)
//! 2. First participant: single random draw, optionally seeded from the id
//! 3. Biased coin: with probability p, fair coin flip
//! 4. Otherwise minimisation: arm with the lower imbalance score, ties by coin
//! 5. Commit to ledger and tally together
//!
//! Epistemic foundation:
//! - K_i: The allocator is the only writer of its tally and ledger
//! - K_i: A rejected call leaves both exactly as they were
//! - I^R: p, id seeding and the random source are caller-configurable

mod random;
mod shared;
mod tally;

pub use random::*;
pub use shared::*;
pub use tally::*;

use crate::models::{
    Allocation, AllocationError, AllocationMethod, Arm, Characteristics, ConfigError, Enrollment,
    MinimiserError, ParticipantId, TrialConfig,
};
use crate::report::{BalanceReport, CharacteristicsByArm};
use crate::schema::{Profile, Schema};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Minimisation allocator owning the tally and the participant ledger.
pub struct Allocator {
    schema: Schema,
    options: TrialConfig,
    tally: Tally,
    ledger: Vec<Enrollment>,
    enrolled: HashSet<ParticipantId>,
    source: Box<dyn RandomSource>,
}

impl Allocator {
    /// Create an allocator with the default ChaCha source, seeded from
    /// `options.seed` or OS entropy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the options are out of range.
    pub fn new(schema: Schema, options: TrialConfig) -> Result<Self, ConfigError> {
        let source = ChaChaSource::new(options.seed);
        Self::with_source(schema, options, Box::new(source))
    }

    /// Create an allocator drawing from `source`.
    pub fn with_source(
        schema: Schema,
        options: TrialConfig,
        source: Box<dyn RandomSource>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let tally = Tally::new(&schema);
        Ok(Self {
            schema,
            options,
            tally,
            ledger: Vec::new(),
            enrolled: HashSet::new(),
            source,
        })
    }

    /// Rebuild an allocator from a saved ledger and source position.
    ///
    /// With `state` the ChaCha source continues exactly where the saved
    /// allocator stopped. A non-empty ledger saved without a state cannot
    /// be resumed deterministically, so the source falls back to entropy
    /// rather than replaying the configured seed.
    pub fn restore(
        schema: Schema,
        options: TrialConfig,
        entries: Vec<Enrollment>,
        state: Option<SourceState>,
    ) -> crate::models::Result<Self> {
        let source = match (&state, entries.is_empty()) {
            (None, false) => {
                warn!("Ledger has no random source state; drawing from entropy");
                ChaChaSource::new(None)
            }
            _ => ChaChaSource::new(options.seed),
        };
        Self::restore_with_source(schema, options, entries, Box::new(source), state)
    }

    /// Rebuild an allocator from a saved ledger, drawing from `source`.
    ///
    /// `source` is resumed from `state` when given, then entries are
    /// replayed in order into the tally without making new decisions. Fails
    /// with `MinimiserError::LedgerMismatch` on the first entry that is a
    /// duplicate or does not fit the schema.
    pub fn restore_with_source(
        schema: Schema,
        options: TrialConfig,
        entries: Vec<Enrollment>,
        mut source: Box<dyn RandomSource>,
        state: Option<SourceState>,
    ) -> crate::models::Result<Self> {
        if let Some(state) = &state {
            source.resume(state);
        }
        let mut allocator = Self::with_source(schema, options, source)?;
        for (position, entry) in entries.into_iter().enumerate() {
            let profile = allocator
                .check(&entry.id, &entry.characteristics)
                .map_err(|source| MinimiserError::LedgerMismatch { position, source })?;
            allocator.commit(entry, &profile);
        }
        info!(participants = allocator.len(), "Restored allocator from ledger");
        Ok(allocator)
    }

    /// Allocate the next participant and return the assigned arm.
    pub fn allocate(
        &mut self,
        id: impl Into<ParticipantId>,
        characteristics: Characteristics,
    ) -> Result<Arm, AllocationError> {
        self.allocate_detailed(id, characteristics).map(|a| a.arm)
    }

    /// Allocate the next participant and report how the arm was chosen.
    ///
    /// # Errors
    ///
    /// - `AllocationError::DuplicateParticipant` if `id` was already allocated
    /// - `AllocationError::Validation` if `characteristics` do not fit the schema
    pub fn allocate_detailed(
        &mut self,
        id: impl Into<ParticipantId>,
        characteristics: Characteristics,
    ) -> Result<Allocation, AllocationError> {
        let id = id.into();
        let profile = self.check(&id, &characteristics).inspect_err(|e| {
            warn!(participant = %id, error = %e, "Allocation rejected");
        })?;

        let (arm, method) = self.choose_arm(&id, &profile);

        let label = self.arm_label(arm);
        info!(participant = %id, arm = label, "Randomised participant {id} to {label}");

        self.commit(
            Enrollment {
                id,
                characteristics,
                arm,
                method,
                allocated_at: Utc::now(),
            },
            &profile,
        );
        Ok(Allocation { arm, method })
    }

    /// Precondition checks; no mutation.
    fn check(
        &self,
        id: &ParticipantId,
        characteristics: &Characteristics,
    ) -> Result<Profile, AllocationError> {
        if self.enrolled.contains(id) {
            return Err(AllocationError::DuplicateParticipant(id.clone()));
        }
        self.schema
            .validate(characteristics)
            .map_err(|source| AllocationError::Validation {
                id: id.clone(),
                source,
            })
    }

    fn choose_arm(&mut self, id: &ParticipantId, profile: &Profile) -> (Arm, AllocationMethod) {
        if self.ledger.is_empty() {
            if self.options.seed_first_with_id {
                self.source.reseed(seed_from_id(id));
            }
            return (self.source.coin_flip(), AllocationMethod::First);
        }

        let u = self.source.next_unit();
        if u < self.options.true_randomization_probability {
            debug!(participant = %id, draw = u, "Biased coin chose random allocation");
            return (self.source.coin_flip(), AllocationMethod::Randomised);
        }

        let scores = [
            self.tally.score(Arm::A, profile),
            self.tally.score(Arm::B, profile),
        ];
        debug!(participant = %id, score_a = scores[0], score_b = scores[1], "Imbalance scores");

        match scores[0].cmp(&scores[1]) {
            std::cmp::Ordering::Less => (Arm::A, AllocationMethod::Minimised { scores }),
            std::cmp::Ordering::Greater => (Arm::B, AllocationMethod::Minimised { scores }),
            std::cmp::Ordering::Equal => {
                (self.source.coin_flip(), AllocationMethod::TieBroken { scores })
            }
        }
    }

    /// Ledger and tally are updated together, after every check has passed.
    fn commit(&mut self, entry: Enrollment, profile: &Profile) {
        self.tally.record(entry.arm, profile);
        self.enrolled.insert(entry.id.clone());
        self.ledger.push(entry);
    }

    /// Counts per arm, variable and category.
    pub fn characteristics_by_arm(&self) -> CharacteristicsByArm {
        self.balance_report().by_arm()
    }

    /// Tabular balance view with per-category differences.
    pub fn balance_report(&self) -> BalanceReport {
        BalanceReport::from_tally(&self.schema, &self.tally, &self.options.arms)
    }

    /// Allocated participants in arrival order.
    pub fn participants(&self) -> &[Enrollment] {
        &self.ledger
    }

    /// Whether `id` has been allocated.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.enrolled.contains(id)
    }

    /// Number of allocated participants.
    pub fn len(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
    }

    /// Current position of the random source, if it can be resumed.
    pub fn source_state(&self) -> Option<SourceState> {
        self.source.state()
    }

    /// Participants allocated to `arm`.
    pub fn arm_total(&self, arm: Arm) -> usize {
        self.tally.variable_total(arm, 0) as usize
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    pub fn options(&self) -> &TrialConfig {
        &self.options
    }

    /// Display label configured for `arm`.
    pub fn arm_label(&self, arm: Arm) -> &str {
        &self.options.arms[arm.index()]
    }
}

impl fmt::Display for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.schema.variables().iter().map(|v| v.name()).collect();
        write!(
            f,
            "Minimiser of {} variables ({}) - {} participants",
            names.len(),
            names.join(", "),
            self.len()
        )
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("schema", &self.schema)
            .field("options", &self.options)
            .field("participants", &self.ledger.len())
            .finish_non_exhaustive()
    }
}
