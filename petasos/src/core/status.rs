//! Status and mode enums shared across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing status of a parcel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Registered with the engine; not yet running.
    #[default]
    Registered,
    /// Accepted by its processor; preparing to run.
    Initiated,
    /// Running.
    Active,
    /// Completed by this attempt.
    Finished,
    /// A sibling attempt in the same episode finished.
    FinishedElsewhere,
    /// Completed and all downstream continuations are in place.
    Finalised,
    /// A sibling attempt in the same episode was finalised.
    FinalisedElsewhere,
    /// This attempt, or a sibling in the same episode, failed.
    Failed,
    /// Retries are exhausted; the engine gave up on this attempt.
    Abandoned,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Initiated => write!(f, "initiated"),
            Self::Active => write!(f, "active"),
            Self::Finished => write!(f, "finished"),
            Self::FinishedElsewhere => write!(f, "finished_elsewhere"),
            Self::Finalised => write!(f, "finalised"),
            Self::FinalisedElsewhere => write!(f, "finalised_elsewhere"),
            Self::Failed => write!(f, "failed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl ProcessingStatus {
    /// Returns true for the statuses a processor is still expected to drive.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Registered | Self::Initiated | Self::Active)
    }

    /// Returns true for statuses the sweep waits on until `timeout_age`.
    #[must_use]
    pub fn is_awaiting_timeout(&self) -> bool {
        matches!(
            self,
            Self::Registered | Self::Initiated | Self::Active | Self::Finished | Self::FinishedElsewhere
        )
    }

    /// Returns true for the finalised statuses eligible for cleanup.
    #[must_use]
    pub fn is_finalised(&self) -> bool {
        matches!(self, Self::Finalised | Self::FinalisedElsewhere)
    }

    /// Returns true if the attempt will not progress any further by itself.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }
}

/// Finalisation status of a parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalisationStatus {
    /// Not finalised.
    #[default]
    NotFinalised,
    /// Finalisation has been requested.
    FinalisationRegistered,
    /// Finalised.
    Finalised,
}

impl fmt::Display for FinalisationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFinalised => write!(f, "not_finalised"),
            Self::FinalisationRegistered => write!(f, "finalisation_registered"),
            Self::Finalised => write!(f, "finalised"),
        }
    }
}

/// Directive carried on a job card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Do not execute; ask again later.
    #[default]
    Waiting,
    /// Execute (or keep executing).
    Executing,
    /// Work is complete.
    Finished,
    /// Work failed.
    Failed,
    /// The engine has given up on this attempt.
    Abandoned,
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Executing => write!(f, "executing"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl From<ProcessingStatus> for ActivityStatus {
    fn from(status: ProcessingStatus) -> Self {
        match status {
            ProcessingStatus::Registered | ProcessingStatus::Initiated | ProcessingStatus::Active => {
                Self::Executing
            }
            ProcessingStatus::Finished
            | ProcessingStatus::FinishedElsewhere
            | ProcessingStatus::Finalised
            | ProcessingStatus::FinalisedElsewhere => Self::Finished,
            ProcessingStatus::Failed => Self::Failed,
            ProcessingStatus::Abandoned => Self::Abandoned,
        }
    }
}

/// How many instances of one processor may work concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// A single instance.
    Standalone,
    /// Several redundant instances run side by side.
    #[default]
    Concurrent,
    /// Instances are started on demand.
    OnDemand,
}

/// Deployment strategy for focus arbitration, selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResilienceMode {
    /// One engine owns every episode.
    #[default]
    Standalone,
    /// The engine is one member of a cluster.
    Clustered,
}

impl fmt::Display for ResilienceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone => write!(f, "standalone"),
            Self::Clustered => write!(f, "clustered"),
        }
    }
}
