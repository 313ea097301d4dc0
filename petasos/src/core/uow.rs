//! Unit-of-work value object.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::identifier::{EpisodeId, Identifier};
use crate::errors::UnitOfWorkError;

/// Outcome of processing a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UoWOutcome {
    /// Processing has not begun.
    #[default]
    NotStarted,
    /// Processing has begun but produced no final result.
    Incomplete,
    /// Processing succeeded.
    Success,
    /// Processing failed.
    Failed,
}

impl UoWOutcome {
    /// Returns true once the outcome can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for UoWOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Incomplete => write!(f, "incomplete"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A typed payload carried by a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UoWPayload {
    /// The kind of content.
    pub payload_type: Identifier,
    /// The content itself.
    pub content: serde_json::Value,
}

impl UoWPayload {
    /// Creates a new payload.
    #[must_use]
    pub fn new(payload_type: Identifier, content: serde_json::Value) -> Self {
        Self {
            payload_type,
            content,
        }
    }
}

/// One logical item of data moving through the pipeline.
///
/// The instance identifier doubles as the episode identifier: every parcel
/// attempting this unit of work shares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOfWork {
    type_id: Identifier,
    instance_id: Identifier,
    #[serde(default)]
    ingress: Vec<UoWPayload>,
    #[serde(default)]
    egress: Vec<UoWPayload>,
    #[serde(default)]
    outcome: UoWOutcome,
}

impl UnitOfWork {
    /// Creates a unit of work with an explicit instance identifier.
    #[must_use]
    pub fn new(type_id: Identifier, instance_id: Identifier) -> Self {
        Self {
            type_id,
            instance_id,
            ingress: Vec::new(),
            egress: Vec::new(),
            outcome: UoWOutcome::NotStarted,
        }
    }

    /// Creates a unit of work with a freshly generated instance identifier.
    #[must_use]
    pub fn originate(type_id: Identifier) -> Self {
        let instance_id = Identifier::generate(&type_id);
        Self::new(type_id, instance_id)
    }

    /// Adds an ingress payload, ignoring exact duplicates.
    #[must_use]
    pub fn with_ingress(mut self, payload: UoWPayload) -> Self {
        if !self.ingress.contains(&payload) {
            self.ingress.push(payload);
        }
        self
    }

    /// Returns the kind of work.
    #[must_use]
    pub fn type_id(&self) -> &Identifier {
        &self.type_id
    }

    /// Returns this occurrence's identifier.
    #[must_use]
    pub fn instance_id(&self) -> &Identifier {
        &self.instance_id
    }

    /// Returns the episode this unit of work defines.
    #[must_use]
    pub fn episode_id(&self) -> &EpisodeId {
        &self.instance_id
    }

    /// Returns the ingress payloads.
    #[must_use]
    pub fn ingress(&self) -> &[UoWPayload] {
        &self.ingress
    }

    /// Returns the egress payloads.
    #[must_use]
    pub fn egress(&self) -> &[UoWPayload] {
        &self.egress
    }

    /// Returns the processing outcome.
    #[must_use]
    pub fn outcome(&self) -> UoWOutcome {
        self.outcome
    }

    /// Adds an egress payload.
    ///
    /// Egress is frozen once the outcome is terminal.
    pub fn add_egress(&mut self, payload: UoWPayload) -> Result<(), UnitOfWorkError> {
        if self.outcome.is_terminal() {
            return Err(UnitOfWorkError::new(
                self.instance_id.as_str(),
                format!("egress is frozen once the outcome is {}", self.outcome),
            ));
        }
        if !self.egress.contains(&payload) {
            self.egress.push(payload);
        }
        Ok(())
    }

    /// Sets the processing outcome.
    pub fn set_outcome(&mut self, outcome: UoWOutcome) -> Result<(), UnitOfWorkError> {
        if self.outcome.is_terminal() && self.outcome != outcome {
            return Err(UnitOfWorkError::new(
                self.instance_id.as_str(),
                format!("outcome already {}; cannot become {outcome}", self.outcome),
            ));
        }
        self.outcome = outcome;
        Ok(())
    }
}
