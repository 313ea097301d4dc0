//! Downstream continuation tracking.
//!
//! An upstream parcel may only be finalised once every downstream processor
//! that declared interest in its output has registered its own parcel.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::core::{ParcelId, ProcessorInstanceId};

/// Whether a downstream processor has picked up the work yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationStatus {
    /// Interest declared, no successor parcel yet.
    #[default]
    NotRegistered,
    /// The successor parcel is registered.
    Registered,
}

/// One downstream processor's continuation of an upstream parcel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownstreamContinuation {
    /// Registration status.
    pub status: ContinuationStatus,
    /// The successor parcel, once registered.
    pub downstream_parcel_id: Option<ParcelId>,
}

/// Continuations expected for one upstream parcel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownstreamContinuationRecord {
    continuations: HashMap<ProcessorInstanceId, DownstreamContinuation>,
}

impl DownstreamContinuationRecord {
    /// Declares interest from a downstream processor. Idempotent.
    pub fn add_interest(&mut self, processor: ProcessorInstanceId) {
        self.continuations.entry(processor).or_default();
    }

    /// Marks a downstream processor's continuation as registered.
    pub fn register_continuation(&mut self, processor: ProcessorInstanceId, downstream_parcel_id: ParcelId) {
        let entry = self.continuations.entry(processor).or_default();
        entry.status = ContinuationStatus::Registered;
        entry.downstream_parcel_id = Some(downstream_parcel_id);
    }

    /// Returns the processors that have not yet registered a continuation.
    #[must_use]
    pub fn pending_processors(&self) -> BTreeSet<ProcessorInstanceId> {
        self.continuations
            .iter()
            .filter(|(_, c)| c.status == ContinuationStatus::NotRegistered)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Returns the continuation for one processor.
    #[must_use]
    pub fn continuation(&self, processor: &ProcessorInstanceId) -> Option<&DownstreamContinuation> {
        self.continuations.get(processor)
    }

    /// Returns the number of interested processors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.continuations.len()
    }

    /// Returns true if no processor declared interest.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.continuations.is_empty()
    }
}

/// Thread-safe map of upstream parcel to its continuation record.
#[derive(Debug, Default)]
pub struct DownstreamContinuationTracker {
    records: DashMap<ParcelId, DownstreamContinuationRecord>,
}

impl DownstreamContinuationTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `processor` expects to continue `upstream`.
    pub fn add_interest(&self, upstream: &ParcelId, processor: ProcessorInstanceId) {
        self.records
            .entry(upstream.clone())
            .or_default()
            .add_interest(processor);
    }

    /// Records that `processor` registered `downstream` as the continuation of `upstream`.
    pub fn register_continuation(&self, upstream: &ParcelId, processor: ProcessorInstanceId, downstream: ParcelId) {
        self.records
            .entry(upstream.clone())
            .or_default()
            .register_continuation(processor, downstream);
    }

    /// Returns the processors still owing a continuation of `upstream`.
    #[must_use]
    pub fn pending_processors(&self, upstream: &ParcelId) -> BTreeSet<ProcessorInstanceId> {
        self.records
            .get(upstream)
            .map(|r| r.pending_processors())
            .unwrap_or_default()
    }

    /// Returns true once nothing downstream is pending for `upstream`.
    #[must_use]
    pub fn is_finalisation_candidate(&self, upstream: &ParcelId) -> bool {
        self.pending_processors(upstream).is_empty()
    }

    /// Returns a snapshot of the record for `upstream`.
    #[must_use]
    pub fn record(&self, upstream: &ParcelId) -> Option<DownstreamContinuationRecord> {
        self.records.get(upstream).map(|r| r.clone())
    }

    /// Drops the record for a purged upstream parcel.
    pub fn forget(&self, upstream: &ParcelId) -> Option<DownstreamContinuationRecord> {
        self.records.remove(upstream).map(|(_, r)| r)
    }

    /// Returns the number of tracked upstream parcels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
