//! The parcel: one execution attempt of a unit of work.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::identifier::{EpisodeId, Identifier, ParcelId, ProcessorInstanceId, ProcessorTypeId};
use super::status::{FinalisationStatus, ProcessingStatus};
use super::uow::UnitOfWork;
use crate::utils::{now_utc, Timestamp};

/// One execution attempt of a unit of work by one processor instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    /// Unique per attempt.
    pub instance_id: ParcelId,
    /// The processing step this attempt performs.
    pub type_id: ProcessorTypeId,
    /// Links sibling attempts at the same unit of work.
    pub episode_id: EpisodeId,
    /// The processor instance making the attempt.
    pub associated_processor_instance_id: ProcessorInstanceId,
    /// The predecessor attempt in the pipeline.
    pub upstream_parcel_id: Option<ParcelId>,
    /// Successor attempts, populated as they register.
    #[serde(default)]
    pub downstream_parcel_ids: BTreeSet<ParcelId>,
    /// Current processing status.
    pub processing_status: ProcessingStatus,
    /// Current finalisation status.
    pub finalisation_status: FinalisationStatus,
    /// The latest unit of work this attempt reported.
    pub uow: UnitOfWork,
    /// When the attempt was registered.
    pub registered_at: Timestamp,
    /// When the attempt started running.
    pub started_at: Option<Timestamp>,
    /// When the attempt finished.
    pub finished_at: Option<Timestamp>,
    /// When the attempt was finalised.
    pub finalised_at: Option<Timestamp>,
}

impl Parcel {
    /// Creates a freshly registered parcel for `uow`.
    #[must_use]
    pub fn new(
        type_id: ProcessorTypeId,
        processor_instance_id: ProcessorInstanceId,
        upstream_parcel_id: Option<ParcelId>,
        uow: UnitOfWork,
    ) -> Self {
        let instance_id = Identifier::generate(&processor_instance_id);
        Self {
            instance_id,
            type_id,
            episode_id: uow.episode_id().clone(),
            associated_processor_instance_id: processor_instance_id,
            upstream_parcel_id,
            downstream_parcel_ids: BTreeSet::new(),
            processing_status: ProcessingStatus::Registered,
            finalisation_status: FinalisationStatus::NotFinalised,
            uow,
            registered_at: now_utc(),
            started_at: None,
            finished_at: None,
            finalised_at: None,
        }
    }

    /// Overrides the generated instance identifier.
    #[must_use]
    pub fn with_instance_id(mut self, instance_id: ParcelId) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// Returns true while the attempt has not reached a terminal status.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.processing_status.is_in_progress()
    }

    /// Records that the attempt started.
    pub fn mark_started(&mut self, at: Timestamp) {
        self.processing_status = ProcessingStatus::Active;
        self.started_at = Some(at);
    }

    /// Records that the attempt finished, keeping the produced unit of work.
    pub fn mark_finished(&mut self, uow: UnitOfWork, at: Timestamp) {
        self.uow = uow;
        self.processing_status = ProcessingStatus::Finished;
        self.finished_at = Some(at);
    }

    /// Records that the attempt failed.
    pub fn mark_failed(&mut self, uow: UnitOfWork) {
        self.uow = uow;
        self.processing_status = ProcessingStatus::Failed;
    }

    /// Records finalisation.
    pub fn mark_finalised(&mut self, at: Timestamp) {
        self.processing_status = ProcessingStatus::Finalised;
        self.finalisation_status = FinalisationStatus::Finalised;
        self.finalised_at = Some(at);
    }

    /// Clears progress so the attempt can run again from scratch.
    pub fn reset_for_retry(&mut self) {
        self.processing_status = ProcessingStatus::Registered;
        self.finalisation_status = FinalisationStatus::NotFinalised;
        self.started_at = None;
        self.finished_at = None;
        self.finalised_at = None;
    }

    /// Links a successor attempt.
    pub fn add_downstream_parcel(&mut self, downstream: ParcelId) {
        self.downstream_parcel_ids.insert(downstream);
    }
}
