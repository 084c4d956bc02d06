//! Participant, arm and ledger types for minimiser.
//!
//! K_i: These types represent the data flowing through an allocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mapping from stratification variable name to the participant's category.
pub type Characteristics = BTreeMap<String, String>;

/// Opaque participant identifier.
///
/// Accepts strings or non-negative integers on input; integers are kept in
/// their decimal form so `7` and `"7"` name the same participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawParticipantId")]
pub struct ParticipantId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParticipantId {
    Text(String),
    Number(u64),
}

impl From<RawParticipantId> for ParticipantId {
    fn from(raw: RawParticipantId) -> Self {
        match raw {
            RawParticipantId::Text(s) => Self(s),
            RawParticipantId::Number(n) => Self(n.to_string()),
        }
    }
}

impl ParticipantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for ParticipantId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<u32> for ParticipantId {
    fn from(n: u32) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the two study arms.
///
/// K_i: Exactly two arms, 1:1 allocation. Display labels live in
/// [`TrialConfig::arms`](super::TrialConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Arm {
    A,
    B,
}

impl Arm {
    /// Both arms in index order.
    pub const ALL: [Arm; 2] = [Arm::A, Arm::B];

    /// Position of this arm in per-arm arrays.
    pub fn index(self) -> usize {
        match self {
            Arm::A => 0,
            Arm::B => 1,
        }
    }

    /// The opposite arm.
    pub fn other(self) -> Arm {
        match self {
            Arm::A => Arm::B,
            Arm::B => Arm::A,
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arm::A => f.write_str("A"),
            Arm::B => f.write_str("B"),
        }
    }
}

/// How the arm for a participant was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AllocationMethod {
    /// First participant of the trial: a single fair draw, from a source
    /// reseeded by the id when id seeding is on
    #[serde(alias = "seeded")]
    First,
    /// The biased coin skipped minimisation; fair coin flip
    Randomised,
    /// One arm had the strictly lower imbalance score
    Minimised { scores: [u64; 2] },
    /// Scores were equal; fair coin flip
    TieBroken { scores: [u64; 2] },
}

impl AllocationMethod {
    /// Imbalance scores, when minimisation was consulted.
    pub fn scores(&self) -> Option<[u64; 2]> {
        match self {
            Self::Minimised { scores } | Self::TieBroken { scores } => Some(*scores),
            Self::First | Self::Randomised => None,
        }
    }
}

/// Result of a single allocation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub arm: Arm,
    pub method: AllocationMethod,
}

/// Ledger entry for an allocated participant.
///
/// K_i: Immutable once written; the ledger is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    /// Participant identifier
    pub id: ParticipantId,

    /// Stratification values, validated against the schema
    pub characteristics: Characteristics,

    /// Assigned arm
    pub arm: Arm,

    /// Decision path that produced the arm
    #[serde(flatten)]
    pub method: AllocationMethod,

    /// When the allocation was committed
    pub allocated_at: DateTime<Utc>,
}

/// Incoming participant record (one JSONL line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub characteristics: Characteristics,
}

/// Statistics for an allocation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_records: usize,
    pub total_allocated: usize,
    pub total_duplicates: usize,
    pub total_invalid: usize,
    pub allocated_a: usize,
    pub allocated_b: usize,
    pub runtime_secs: f64,
}

impl RunStats {
    /// Count one allocation.
    pub fn record_arm(&mut self, arm: Arm) {
        self.total_allocated += 1;
        match arm {
            Arm::A => self.allocated_a += 1,
            Arm::B => self.allocated_b += 1,
        }
    }

    /// Fraction of records that were rejected.
    pub fn rejection_rate(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        (self.total_duplicates + self.total_invalid) as f64 / self.total_records as f64
    }
}
