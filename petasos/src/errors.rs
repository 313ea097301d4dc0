//! Error types for the petasos engine.
//!
//! Every error raised by argument validation or by an invariant check is
//! returned to the immediate caller. A processor being told to wait is never
//! an error; it is the normal `Ok` outcome of synchronisation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for petasos operations.
#[derive(Debug, Error)]
pub enum PetasosError {
    /// A required argument was missing or empty.
    #[error("{0}")]
    InvalidArgument(#[from] InvalidArgumentError),

    /// The engine's internal state contradicts what the caller claims.
    #[error("{0}")]
    InvariantViolation(#[from] InvariantViolationError),

    /// No parcel exists with the given instance identifier.
    #[error("Parcel not found: {0}")]
    ParcelNotFound(String),

    /// A parcel with the given instance identifier is already registered.
    #[error("Parcel already registered: {0}")]
    DuplicateParcel(String),

    /// Finalisation was requested while downstream continuations are pending.
    #[error("{0}")]
    FinalisationBlocked(#[from] FinalisationBlockedError),

    /// An illegal mutation of a unit of work.
    #[error("{0}")]
    UnitOfWork(#[from] UnitOfWorkError),

    /// The configuration is not usable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias for petasos operations.
pub type PetasosResult<T> = Result<T, PetasosError>;

impl PetasosError {
    /// Returns a stable, machine readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "PETASOS-INVALID-ARGUMENT",
            Self::InvariantViolation(_) => "PETASOS-INVARIANT-VIOLATION",
            Self::ParcelNotFound(_) => "PETASOS-PARCEL-NOT-FOUND",
            Self::DuplicateParcel(_) => "PETASOS-DUPLICATE-PARCEL",
            Self::FinalisationBlocked(_) => "PETASOS-FINALISATION-BLOCKED",
            Self::UnitOfWork(_) => "PETASOS-UOW",
            Self::Config(_) => "PETASOS-CONFIG",
            Self::Serialization(_) => "PETASOS-SERIALIZATION",
        }
    }

    /// Returns true if the error is a caller mistake rather than engine state.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Returns true if the error reports an invariant violation.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::InvalidArgument(err) => {
                map.insert("operation".to_string(), serde_json::json!(err.operation));
                map.insert("argument".to_string(), serde_json::json!(err.argument));
            }
            Self::InvariantViolation(err) => {
                if let Some(ref episode) = err.episode_id {
                    map.insert("episode_id".to_string(), serde_json::json!(episode));
                }
                if let Some(ref parcel) = err.parcel_id {
                    map.insert("parcel_id".to_string(), serde_json::json!(parcel));
                }
            }
            Self::FinalisationBlocked(err) => {
                map.insert("parcel_id".to_string(), serde_json::json!(err.parcel_id));
                map.insert(
                    "pending_processors".to_string(),
                    serde_json::json!(err.pending_processors),
                );
            }
            Self::ParcelNotFound(id) | Self::DuplicateParcel(id) => {
                map.insert("parcel_id".to_string(), serde_json::json!(id));
            }
            Self::UnitOfWork(err) => {
                map.insert("uow_id".to_string(), serde_json::json!(err.uow_id));
            }
            Self::Config(_) | Self::Serialization(_) => {}
        }

        map
    }
}

/// Error raised when a structurally required argument is absent or empty.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Invalid argument '{argument}' for {operation}: {reason}")]
pub struct InvalidArgumentError {
    /// The operation that rejected the argument.
    pub operation: String,
    /// The name of the offending argument.
    pub argument: String,
    /// Why the argument was rejected.
    pub reason: String,
}

impl InvalidArgumentError {
    /// Creates an error for a missing or empty argument.
    #[must_use]
    pub fn missing(operation: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            argument: argument.into(),
            reason: "value is required".to_string(),
        }
    }

    /// Replaces the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Error raised when engine state contradicts the request.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Invariant violation: {message}")]
pub struct InvariantViolationError {
    /// Description of the violated invariant.
    pub message: String,
    /// The episode involved, if known.
    pub episode_id: Option<String>,
    /// The parcel involved, if known.
    pub parcel_id: Option<String>,
}

impl InvariantViolationError {
    /// Creates a new invariant violation.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            episode_id: None,
            parcel_id: None,
        }
    }

    /// Sets the episode involved.
    #[must_use]
    pub fn with_episode(mut self, episode_id: impl Into<String>) -> Self {
        self.episode_id = Some(episode_id.into());
        self
    }

    /// Sets the parcel involved.
    #[must_use]
    pub fn with_parcel(mut self, parcel_id: impl Into<String>) -> Self {
        self.parcel_id = Some(parcel_id.into());
        self
    }
}

/// Error raised when finalisation would orphan pending downstream work.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Finalisation of parcel '{parcel_id}' blocked: awaiting downstream continuation from [{}]", pending_processors.join(", "))]
pub struct FinalisationBlockedError {
    /// The parcel whose finalisation was requested.
    pub parcel_id: String,
    /// Downstream processors that have not yet registered a continuation.
    pub pending_processors: Vec<String>,
}

impl FinalisationBlockedError {
    /// Creates a new finalisation blocked error.
    #[must_use]
    pub fn new(parcel_id: impl Into<String>, mut pending_processors: Vec<String>) -> Self {
        pending_processors.sort();
        Self {
            parcel_id: parcel_id.into(),
            pending_processors,
        }
    }
}

/// Error raised on an illegal unit-of-work mutation.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Unit of work '{uow_id}': {message}")]
pub struct UnitOfWorkError {
    /// The unit of work instance.
    pub uow_id: String,
    /// What went wrong.
    pub message: String,
}

impl UnitOfWorkError {
    /// Creates a new unit-of-work error.
    #[must_use]
    pub fn new(uow_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uow_id: uow_id.into(),
            message: message.into(),
        }
    }
}
