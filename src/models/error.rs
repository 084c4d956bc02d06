//! Error types for minimiser.
//!
//! Epistemic taxonomy:
//! - K_i violated at construction: malformed schema or options (fatal)
//! - B_i falsified per call: participant does not fit the schema, or was
//!   already allocated (recoverable, caller decides)
//! - I^B materialized: filesystem and parse failures around the core

use super::ParticipantId;
use thiserror::Error;

/// Malformed construction-time schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Schema declares no stratification variables")]
    NoVariables,

    #[error("Variable name must not be empty")]
    EmptyVariableName,

    #[error("Variable name '{0}' is reserved")]
    ReservedName(String),

    #[error("Variable '{0}' is declared more than once")]
    DuplicateVariable(String),

    #[error("Variable '{variable}' has {count} categories; at least 2 are required")]
    TooFewCategories { variable: String, count: usize },

    #[error("Variable '{variable}' lists category '{category}' more than once")]
    DuplicateCategory { variable: String, category: String },
}

/// Participant characteristics that do not match the schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing value for variable '{0}'")]
    MissingVariable(String),

    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("Invalid value '{category}' for variable '{variable}' - should be one of {allowed:?}")]
    InvalidCategory {
        variable: String,
        category: String,
        allowed: Vec<String>,
    },
}

/// Errors from a single allocation call.
///
/// Both variants are raised before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("Participant {0} has already been allocated")]
    DuplicateParticipant(ParticipantId),

    #[error("Participant {id}: {source}")]
    Validation {
        id: ParticipantId,
        #[source]
        source: ValidationError,
    },
}

impl AllocationError {
    /// The participant the rejected call was made for.
    pub fn participant(&self) -> &ParticipantId {
        match self {
            Self::DuplicateParticipant(id) | Self::Validation { id, .. } => id,
        }
    }
}

/// Top-level error type for minimiser.
#[derive(Debug, Error)]
pub enum MinimiserError {
    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Construction input is malformed
    // ═══════════════════════════════════════════════════════════════════

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Saved ledger entry {position} cannot be replayed: {source}")]
    LedgerMismatch {
        position: usize,
        #[source]
        source: AllocationError,
    },

    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — A participant was rejected
    // ═══════════════════════════════════════════════════════════════════

    #[error("Allocation rejected: {0}")]
    Allocation(#[from] AllocationError),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Storage around the core failed
    // ═══════════════════════════════════════════════════════════════════

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MinimiserError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if the caller can correct the input and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Allocation(_))
    }
}

/// Result type alias for minimiser.
pub type Result<T> = std::result::Result<T, MinimiserError>;
