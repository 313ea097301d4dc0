//! Job cards: the handshake token a processor presents to the engine.

use serde::{Deserialize, Serialize};

use super::identifier::{EpisodeId, ParcelId, ProcessorInstanceId, ProcessorTypeId};
use super::status::{ActivityStatus, ConcurrencyMode, ResilienceMode};
use crate::errors::InvalidArgumentError;
use crate::utils::{now_utc, Timestamp};

/// Identity of a processor's present and previous position in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityId {
    /// The processor type presenting the card.
    pub present_processor_type: Option<ProcessorTypeId>,
    /// The processor instance presenting the card.
    pub present_processor_instance: Option<ProcessorInstanceId>,
    /// The processor type that produced the input.
    pub previous_processor_type: Option<ProcessorTypeId>,
    /// The processor instance that produced the input.
    pub previous_processor_instance: Option<ProcessorInstanceId>,
    /// The parcel this card refers to, once registered.
    pub present_parcel_id: Option<ParcelId>,
    /// The episode this card refers to, once registered.
    pub present_episode_id: Option<EpisodeId>,
    /// The upstream parcel.
    pub previous_parcel_id: Option<ParcelId>,
    /// The upstream episode.
    pub previous_episode_id: Option<EpisodeId>,
    /// When the card was created.
    pub created_at: Timestamp,
}

impl ContinuityId {
    /// Creates a continuity identifier for a processor.
    #[must_use]
    pub fn new(processor_type: ProcessorTypeId, processor_instance: ProcessorInstanceId) -> Self {
        Self {
            present_processor_type: Some(processor_type),
            present_processor_instance: Some(processor_instance),
            previous_processor_type: None,
            previous_processor_instance: None,
            present_parcel_id: None,
            present_episode_id: None,
            previous_parcel_id: None,
            previous_episode_id: None,
            created_at: now_utc(),
        }
    }
}

/// The handshake token exchanged between a processor and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCard {
    /// Who is asking and about what.
    pub continuity: ContinuityId,
    /// What the processor believes it is doing.
    pub current_status: ActivityStatus,
    /// What the engine wants the processor to do.
    pub suggested_status: ActivityStatus,
    /// Concurrency mode of the presenting processor.
    pub concurrency_mode: ConcurrencyMode,
    /// Resilience mode the engine runs in.
    pub resilience_mode: ResilienceMode,
    /// Set once the engine has dropped the attempt the card refers to.
    pub to_be_discarded: bool,
    /// When the card was last updated.
    pub updated_at: Timestamp,
}

impl JobCard {
    /// Creates a job card for a processor.
    #[must_use]
    pub fn new(processor_type: ProcessorTypeId, processor_instance: ProcessorInstanceId) -> Self {
        Self {
            continuity: ContinuityId::new(processor_type, processor_instance),
            current_status: ActivityStatus::Waiting,
            suggested_status: ActivityStatus::Waiting,
            concurrency_mode: ConcurrencyMode::default(),
            resilience_mode: ResilienceMode::default(),
            to_be_discarded: false,
            updated_at: now_utc(),
        }
    }

    /// Sets the upstream parcel this card continues from.
    #[must_use]
    pub fn with_upstream(
        mut self,
        previous_processor_type: ProcessorTypeId,
        previous_processor_instance: ProcessorInstanceId,
        previous_parcel_id: ParcelId,
        previous_episode_id: EpisodeId,
    ) -> Self {
        self.continuity.previous_processor_type = Some(previous_processor_type);
        self.continuity.previous_processor_instance = Some(previous_processor_instance);
        self.continuity.previous_parcel_id = Some(previous_parcel_id);
        self.continuity.previous_episode_id = Some(previous_episode_id);
        self
    }

    /// Sets the concurrency mode.
    #[must_use]
    pub fn with_concurrency_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_mode = mode;
        self
    }

    /// Returns the parcel this card refers to, if registered.
    #[must_use]
    pub fn present_parcel_id(&self) -> Option<&ParcelId> {
        self.continuity.present_parcel_id.as_ref()
    }

    /// Returns the episode this card refers to, if registered.
    #[must_use]
    pub fn present_episode_id(&self) -> Option<&EpisodeId> {
        self.continuity.present_episode_id.as_ref()
    }

    /// Returns the upstream parcel, if any.
    #[must_use]
    pub fn previous_parcel_id(&self) -> Option<&ParcelId> {
        self.continuity.previous_parcel_id.as_ref()
    }

    /// Returns the parcel id or an invalid-argument error naming `operation`.
    pub fn require_present_parcel(&self, operation: &str) -> Result<&ParcelId, InvalidArgumentError> {
        self.present_parcel_id()
            .ok_or_else(|| InvalidArgumentError::missing(operation, "job_card.present_parcel_id"))
    }

    /// Returns the processor instance or an invalid-argument error.
    pub fn require_processor_instance(
        &self,
        operation: &str,
    ) -> Result<&ProcessorInstanceId, InvalidArgumentError> {
        self.continuity
            .present_processor_instance
            .as_ref()
            .ok_or_else(|| InvalidArgumentError::missing(operation, "job_card.present_processor_instance"))
    }

    /// Returns the processor type or an invalid-argument error.
    pub fn require_processor_type(&self, operation: &str) -> Result<&ProcessorTypeId, InvalidArgumentError> {
        self.continuity
            .present_processor_type
            .as_ref()
            .ok_or_else(|| InvalidArgumentError::missing(operation, "job_card.present_processor_type"))
    }

    /// Binds the card to a registered parcel.
    pub fn bind_parcel(&mut self, parcel_id: ParcelId, episode_id: EpisodeId) {
        self.continuity.present_parcel_id = Some(parcel_id);
        self.continuity.present_episode_id = Some(episode_id);
        self.touch();
    }

    /// Sets the engine's directive and refreshes the update timestamp.
    pub fn suggest(&mut self, status: ActivityStatus) {
        self.suggested_status = status;
        self.touch();
    }

    /// Refreshes the update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = now_utc();
    }
}
