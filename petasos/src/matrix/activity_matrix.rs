//! Focus arbitration across redundant processor instances.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::episode::EpisodeStatusSet;
use super::status_element::ParcelStatusElement;
use crate::core::{
    ContinuityId, EpisodeId, Parcel, ParcelId, ProcessingStatus, ProcessorInstanceId,
    ProcessorTypeId, ResilienceMode,
};
use crate::errors::{
    FinalisationBlockedError, InvariantViolationError, PetasosError, PetasosResult,
};
use crate::events::{NoOpParcelEventSink, ParcelEvent, ParcelEventSink};
use crate::registry::ParcelRegistry;
use crate::tracker::DownstreamContinuationTracker;

/// Per-episode status elements, the focus election over them, and the links
/// into the parcel registry and the downstream continuation tracker.
///
/// Every read-modify-write on one episode runs while holding that episode's
/// map entry, so election and propagation are atomic per episode. The
/// registry and tracker live in separate maps and may be touched while an
/// episode entry is held.
pub struct ActivityMatrix {
    pub(super) episodes: DashMap<EpisodeId, EpisodeStatusSet>,
    pub(super) abandoned: DashMap<ParcelId, ParcelStatusElement>,
    pub(super) registry: Arc<ParcelRegistry>,
    pub(super) tracker: Arc<DownstreamContinuationTracker>,
    pub(super) events: Arc<dyn ParcelEventSink>,
    resilience_mode: ResilienceMode,
}

impl std::fmt::Debug for ActivityMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityMatrix")
            .field("episodes", &self.episodes.len())
            .field("abandoned", &self.abandoned.len())
            .field("parcels", &self.registry.len())
            .field("resilience_mode", &self.resilience_mode)
            .finish_non_exhaustive()
    }
}

impl Default for ActivityMatrix {
    fn default() -> Self {
        Self::new(
            Arc::new(ParcelRegistry::new()),
            Arc::new(DownstreamContinuationTracker::new()),
        )
    }
}

impl ActivityMatrix {
    /// Creates a matrix over a registry and a tracker.
    #[must_use]
    pub fn new(registry: Arc<ParcelRegistry>, tracker: Arc<DownstreamContinuationTracker>) -> Self {
        Self {
            episodes: DashMap::new(),
            abandoned: DashMap::new(),
            registry,
            tracker,
            events: Arc::new(NoOpParcelEventSink),
            resilience_mode: ResilienceMode::default(),
        }
    }

    /// Sets the mode focus is elected under.
    #[must_use]
    pub fn with_resilience_mode(mut self, mode: ResilienceMode) -> Self {
        self.resilience_mode = mode;
        self
    }

    /// Returns the mode focus is elected under.
    #[must_use]
    pub fn resilience_mode(&self) -> ResilienceMode {
        self.resilience_mode
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn ParcelEventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Returns the parcel registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ParcelRegistry> {
        &self.registry
    }

    /// Returns the downstream continuation tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<DownstreamContinuationTracker> {
        &self.tracker
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn ParcelEventSink> {
        &self.events
    }

    /// Registers an attempt at an episode and elects focus first-writer-wins.
    ///
    /// Registering a parcel that is already known returns its element
    /// unchanged.
    pub fn register_work_unit_activity(
        &self,
        parcel_id: &ParcelId,
        episode_id: &EpisodeId,
        processor_instance_id: &ProcessorInstanceId,
        processor_type_id: &ProcessorTypeId,
    ) -> ParcelStatusElement {
        let mut set = self
            .episodes
            .entry(episode_id.clone())
            .or_insert_with(|| EpisodeStatusSet::new(episode_id.clone(), self.resilience_mode));

        if let Some(existing) = set.get(parcel_id) {
            debug!(parcel_id = %parcel_id, episode_id = %episode_id, "Parcel already registered");
            return existing.clone();
        }

        let element = set
            .insert_and_elect(ParcelStatusElement::new(
                parcel_id.clone(),
                episode_id.clone(),
                processor_instance_id.clone(),
                processor_type_id.clone(),
            ))
            .clone();

        debug!(
            parcel_id = %parcel_id,
            episode_id = %episode_id,
            processor_instance_id = %processor_instance_id,
            "Registered work unit activity"
        );
        self.events.try_emit(ParcelEvent::Registered {
            parcel_id: parcel_id.clone(),
            episode_id: episode_id.clone(),
            processor_instance_id: processor_instance_id.clone(),
        });
        if element.has_cluster_focus {
            info!(
                parcel_id = %parcel_id,
                episode_id = %episode_id,
                system_wide = element.has_system_wide_focus,
                "Focus granted"
            );
            self.events.try_emit(ParcelEvent::FocusGranted {
                parcel_id: parcel_id.clone(),
                episode_id: episode_id.clone(),
                system_wide: element.has_system_wide_focus,
            });
        }
        element
    }

    /// Copies the upstream identity of a job card onto a parcel's element.
    pub fn record_upstream(
        &self,
        parcel_id: &ParcelId,
        episode_id: &EpisodeId,
        continuity: &ContinuityId,
    ) -> PetasosResult<()> {
        let mut set = self
            .episodes
            .get_mut(episode_id)
            .ok_or_else(|| missing_episode(episode_id, parcel_id))?;
        let element = set
            .get_mut(parcel_id)
            .ok_or_else(|| missing_element(episode_id, parcel_id))?;
        element
            .previous_parcel_id
            .clone_from(&continuity.previous_parcel_id);
        element
            .previous_episode_id
            .clone_from(&continuity.previous_episode_id);
        element
            .previous_processor_instance_id
            .clone_from(&continuity.previous_processor_instance);
        element
            .previous_processor_type_id
            .clone_from(&continuity.previous_processor_type);
        Ok(())
    }

    /// Applies a status change reported by a processor.
    pub fn update_work_unit_activity(
        &self,
        parcel_id: &ParcelId,
        episode_id: &EpisodeId,
        status: ProcessingStatus,
    ) -> PetasosResult<ParcelStatusElement> {
        self.update_work_unit_activity_with(parcel_id, episode_id, status, |_| {})
    }

    /// Applies a status change, running `apply` on the parcel if the caller
    /// holds focus.
    ///
    /// A caller without focus has its parcel forced back to `REGISTERED` and
    /// gets its element back with the entry timestamp refreshed; `apply` is
    /// not run. An abandoned parcel gets its tombstone back. A focused attempt
    /// moving past `REGISTERED` no longer requires a retry.
    pub fn update_work_unit_activity_with(
        &self,
        parcel_id: &ParcelId,
        episode_id: &EpisodeId,
        status: ProcessingStatus,
        apply: impl FnOnce(&mut Parcel),
    ) -> PetasosResult<ParcelStatusElement> {
        self.guarded_update(parcel_id, episode_id, status, || Ok(()), apply)
    }

    /// Moves an attempt to `FINALISED` unless a declared downstream processor
    /// has not registered its continuation yet.
    ///
    /// The pending check and the status change run under the episode's entry,
    /// which [`Self::register_downstream_wup_interest`] also takes.
    pub fn finalise_work_unit_activity(
        &self,
        parcel_id: &ParcelId,
        episode_id: &EpisodeId,
        apply: impl FnOnce(&mut Parcel),
    ) -> PetasosResult<ParcelStatusElement> {
        self.guarded_update(
            parcel_id,
            episode_id,
            ProcessingStatus::Finalised,
            || self.ensure_no_pending_continuations(parcel_id),
            apply,
        )
    }

    fn guarded_update(
        &self,
        parcel_id: &ParcelId,
        episode_id: &EpisodeId,
        status: ProcessingStatus,
        precondition: impl FnOnce() -> PetasosResult<()>,
        apply: impl FnOnce(&mut Parcel),
    ) -> PetasosResult<ParcelStatusElement> {
        if let Some(tombstone) = self.abandoned_element(parcel_id) {
            return Ok(tombstone);
        }

        let mut set = self
            .episodes
            .get_mut(episode_id)
            .ok_or_else(|| missing_episode(episode_id, parcel_id))?;
        let element = set
            .get_mut(parcel_id)
            .ok_or_else(|| missing_element(episode_id, parcel_id))?;
        precondition()?;

        if element.has_cluster_focus {
            self.registry.modify(parcel_id, |parcel| {
                apply(parcel);
                parcel.processing_status = status;
            })?;
            element.set_status(status);
            if status != ProcessingStatus::Registered {
                element.requires_retry = false;
            }
            debug!(parcel_id = %parcel_id, episode_id = %episode_id, %status, "Status updated");
            self.events.try_emit(ParcelEvent::StatusChanged {
                parcel_id: parcel_id.clone(),
                episode_id: episode_id.clone(),
                status,
            });
        } else {
            self.registry.modify(parcel_id, |parcel| {
                parcel.processing_status = ProcessingStatus::Registered;
            })?;
            element.clear_focus();
            element.touch();
            debug!(
                parcel_id = %parcel_id,
                episode_id = %episode_id,
                requested = %status,
                "Update from unfocused parcel held back"
            );
        }
        Ok(element.clone())
    }

    /// Returns the parcel holding system-wide focus for an episode.
    #[must_use]
    pub fn check_for_existing_system_wide_focused_element(
        &self,
        episode_id: &EpisodeId,
    ) -> Option<ParcelId> {
        self.episodes
            .get(episode_id)
            .and_then(|set| set.system_wide_focus_holder().cloned())
    }

    /// Returns the parcel holding cluster focus for an episode.
    #[must_use]
    pub fn check_for_existing_cluster_focused_element(
        &self,
        episode_id: &EpisodeId,
    ) -> Option<ParcelId> {
        self.episodes
            .get(episode_id)
            .and_then(|set| set.cluster_focus_holder().cloned())
    }

    /// Returns a live element.
    #[must_use]
    pub fn get_status_element(
        &self,
        parcel_id: &ParcelId,
        episode_id: &EpisodeId,
    ) -> Option<ParcelStatusElement> {
        self.episodes
            .get(episode_id)
            .and_then(|set| set.get(parcel_id).cloned())
    }

    /// Returns every live element of an episode, oldest first.
    #[must_use]
    pub fn episode_elements(&self, episode_id: &EpisodeId) -> Vec<ParcelStatusElement> {
        let mut elements: Vec<ParcelStatusElement> = self
            .episodes
            .get(episode_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        elements.sort_by(|a, b| a.entry_timestamp.cmp(&b.entry_timestamp));
        elements
    }

    /// Returns true if the episode has at least one live element.
    #[must_use]
    pub fn has_episode(&self, episode_id: &EpisodeId) -> bool {
        self.episodes
            .get(episode_id)
            .is_some_and(|set| !set.is_empty())
    }

    /// Returns the number of tracked episodes.
    #[must_use]
    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    /// Returns the abandonment record of a parcel whose retries ran out.
    #[must_use]
    pub fn abandoned_element(&self, parcel_id: &ParcelId) -> Option<ParcelStatusElement> {
        self.abandoned.get(parcel_id).map(|e| e.clone())
    }

    /// Drops the abandonment record of a parcel.
    pub fn forget_abandoned(&self, parcel_id: &ParcelId) -> Option<ParcelStatusElement> {
        self.abandoned.remove(parcel_id).map(|(_, e)| e)
    }

    /// Removes a parcel's element, dropping its episode if left empty.
    ///
    /// Focus held by the removed element passes to the oldest in-progress
    /// sibling.
    pub fn remove_status_element(
        &self,
        parcel_id: &ParcelId,
        episode_id: &EpisodeId,
    ) -> Option<ParcelStatusElement> {
        let removed = {
            let mut set = self.episodes.get_mut(episode_id)?;
            let removed = set.remove(parcel_id)?;
            self.announce_successor(&set, &removed);
            removed
        };
        self.episodes.remove_if(episode_id, |_, set| set.is_empty());
        Some(removed)
    }

    /// Finds a live element by parcel id alone.
    #[must_use]
    pub fn locate(&self, parcel_id: &ParcelId) -> Option<ParcelStatusElement> {
        self.episodes
            .iter()
            .find_map(|set| set.get(parcel_id).cloned())
    }

    /// Records that a downstream processor will continue from `upstream`.
    ///
    /// Holds the upstream episode's entry while recording, so the interest
    /// either lands before a finalisation check or after the finalisation.
    pub fn register_downstream_wup_interest(
        &self,
        upstream: &ParcelId,
        downstream_processor: ProcessorInstanceId,
    ) {
        let episode_id = self.registry.get(upstream).map(|parcel| parcel.episode_id);
        let _entry = episode_id.as_ref().and_then(|id| self.episodes.get(id));
        self.tracker.add_interest(upstream, downstream_processor);
    }

    /// Records the parcel a downstream processor registered for `upstream`.
    pub fn register_downstream_parcel(
        &self,
        upstream: &ParcelId,
        downstream_processor: ProcessorInstanceId,
        downstream_parcel: ParcelId,
    ) {
        self.tracker
            .register_continuation(upstream, downstream_processor, downstream_parcel);
    }

    fn ensure_no_pending_continuations(&self, parcel_id: &ParcelId) -> PetasosResult<()> {
        let pending = self.tracker.pending_processors(parcel_id);
        if pending.is_empty() {
            return Ok(());
        }
        warn!(
            parcel_id = %parcel_id,
            pending = pending.len(),
            "Finalisation blocked by pending downstream continuations"
        );
        Err(FinalisationBlockedError::new(
            parcel_id.as_str(),
            pending.iter().map(ToString::to_string).collect(),
        )
        .into())
    }

    pub(super) fn announce_successor(&self, set: &EpisodeStatusSet, removed: &ParcelStatusElement) {
        if !removed.has_cluster_focus {
            return;
        }
        let Some(successor) = set.cluster_focus_holder().and_then(|id| set.get(id)) else {
            return;
        };
        info!(
            parcel_id = %successor.parcel_id,
            episode_id = %successor.episode_id,
            from = %removed.parcel_id,
            "Focus transferred"
        );
        self.events.try_emit(ParcelEvent::FocusGranted {
            parcel_id: successor.parcel_id.clone(),
            episode_id: successor.episode_id.clone(),
            system_wide: successor.has_system_wide_focus,
        });
    }
}

pub(super) fn missing_episode(episode_id: &EpisodeId, parcel_id: &ParcelId) -> PetasosError {
    InvariantViolationError::new("no status elements for episode")
        .with_episode(episode_id.as_str())
        .with_parcel(parcel_id.as_str())
        .into()
}

pub(super) fn missing_element(episode_id: &EpisodeId, parcel_id: &ParcelId) -> PetasosError {
    InvariantViolationError::new("parcel has no status element in its episode")
        .with_episode(episode_id.as_str())
        .with_parcel(parcel_id.as_str())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActivityStatus, Identifier, UnitOfWork};
    use crate::events::CollectingParcelEventSink;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    struct Fixture {
        matrix: ActivityMatrix,
        events: Arc<CollectingParcelEventSink>,
        episode: EpisodeId,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(CollectingParcelEventSink::new());
        let matrix = ActivityMatrix::default().with_event_sink(events.clone());
        let uow = UnitOfWork::new(id("uow.lab"), id("lab.1"));
        let episode = uow.episode_id().clone();
        Fixture {
            matrix,
            events,
            episode,
        }
    }

    fn register(f: &Fixture, processor: &str) -> ParcelStatusElement {
        let uow = UnitOfWork::new(id("uow.lab"), f.episode.clone());
        let parcel = Parcel::new(id("step.parse"), id(processor), None, uow);
        let parcel_id = parcel.instance_id.clone();
        f.matrix.registry().add(parcel).unwrap();
        f.matrix
            .register_work_unit_activity(&parcel_id, &f.episode, &id(processor), &id("step.parse"))
    }

    #[test]
    fn test_first_registration_gets_both_foci() {
        let f = fixture();
        let first = register(&f, "wup.a");
        let second = register(&f, "wup.b");

        assert!(first.has_system_wide_focus && first.has_cluster_focus);
        assert!(!second.has_cluster_focus);
        assert_eq!(
            f.matrix.check_for_existing_system_wide_focused_element(&f.episode),
            Some(first.parcel_id.clone())
        );
        assert_eq!(
            f.matrix.check_for_existing_cluster_focused_element(&f.episode),
            Some(first.parcel_id)
        );
        assert_eq!(f.events.events_of_type("parcel.registered").len(), 2);
        assert_eq!(f.events.events_of_type("parcel.focus_granted").len(), 1);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let f = fixture();
        let first = register(&f, "wup.a");
        let again = f.matrix.register_work_unit_activity(
            &first.parcel_id,
            &f.episode,
            &id("wup.a"),
            &id("step.parse"),
        );
        assert_eq!(first, again);
        assert_eq!(f.matrix.episode_elements(&f.episode).len(), 1);
    }

    #[test]
    fn test_update_from_focused_parcel_applies() {
        let f = fixture();
        let first = register(&f, "wup.a");

        let updated = f
            .matrix
            .update_work_unit_activity(&first.parcel_id, &f.episode, ProcessingStatus::Active)
            .unwrap();
        assert_eq!(updated.processing_status, ProcessingStatus::Active);
        assert_eq!(
            f.matrix.registry().get(&first.parcel_id).unwrap().processing_status,
            ProcessingStatus::Active
        );
    }

    #[test]
    fn test_update_from_unfocused_parcel_is_held_back() {
        let f = fixture();
        register(&f, "wup.a");
        let second = register(&f, "wup.b");

        let updated = f
            .matrix
            .update_work_unit_activity(&second.parcel_id, &f.episode, ProcessingStatus::Active)
            .unwrap();
        assert_eq!(updated.processing_status, ProcessingStatus::Registered);
        assert_eq!(updated.suggested_status(), ActivityStatus::Waiting);
        assert!(updated.entry_timestamp >= second.entry_timestamp);
        assert_eq!(
            f.matrix.registry().get(&second.parcel_id).unwrap().processing_status,
            ProcessingStatus::Registered
        );
    }

    #[test]
    fn test_update_unknown_episode_is_invariant_violation() {
        let f = fixture();
        let err = f
            .matrix
            .update_work_unit_activity(&id("p.ghost"), &id("lab.ghost"), ProcessingStatus::Active)
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_remove_last_element_drops_episode() {
        let f = fixture();
        let first = register(&f, "wup.a");
        let second = register(&f, "wup.b");

        f.matrix.remove_status_element(&first.parcel_id, &f.episode).unwrap();
        assert_eq!(
            f.matrix.check_for_existing_cluster_focused_element(&f.episode),
            Some(second.parcel_id.clone())
        );

        f.matrix.remove_status_element(&second.parcel_id, &f.episode).unwrap();
        assert!(!f.matrix.has_episode(&f.episode));
        assert_eq!(f.matrix.episode_count(), 0);
    }

    #[test]
    fn test_focused_progress_clears_requires_retry() {
        let f = fixture();
        let first = register(&f, "wup.a");
        f.matrix
            .episodes
            .get_mut(&f.episode)
            .unwrap()
            .get_mut(&first.parcel_id)
            .unwrap()
            .requires_retry = true;

        let still_registered = f
            .matrix
            .update_work_unit_activity(&first.parcel_id, &f.episode, ProcessingStatus::Registered)
            .unwrap();
        assert!(still_registered.requires_retry);

        let started = f
            .matrix
            .update_work_unit_activity(&first.parcel_id, &f.episode, ProcessingStatus::Active)
            .unwrap();
        assert!(!started.requires_retry);
    }

    #[test]
    fn test_finalisation_waits_for_declared_continuations() {
        let f = fixture();
        let first = register(&f, "wup.a");
        f.matrix
            .update_work_unit_activity(&first.parcel_id, &f.episode, ProcessingStatus::Finished)
            .unwrap();
        f.matrix
            .register_downstream_wup_interest(&first.parcel_id, id("wup.next"));

        let err = f
            .matrix
            .finalise_work_unit_activity(&first.parcel_id, &f.episode, |_| {})
            .unwrap_err();
        assert_eq!(err.code(), "PETASOS-FINALISATION-BLOCKED");
        assert_eq!(
            f.matrix
                .get_status_element(&first.parcel_id, &f.episode)
                .unwrap()
                .processing_status,
            ProcessingStatus::Finished
        );

        f.matrix
            .register_downstream_parcel(&first.parcel_id, id("wup.next"), id("wup.next.p1"));
        let finalised = f
            .matrix
            .finalise_work_unit_activity(&first.parcel_id, &f.episode, |_| {})
            .unwrap();
        assert_eq!(finalised.processing_status, ProcessingStatus::Finalised);
    }

    #[test]
    fn test_clustered_matrix_keeps_system_wide_focus_with_its_holder() {
        let matrix = ActivityMatrix::default().with_resilience_mode(ResilienceMode::Clustered);
        let episode = id("lab.1");
        let first = matrix.register_work_unit_activity(&id("wup.a.p1"), &episode, &id("wup.a"), &id("step.parse"));
        let second = matrix.register_work_unit_activity(&id("wup.b.p1"), &episode, &id("wup.b"), &id("step.parse"));
        assert!(first.has_system_wide_focus);
        assert!(!second.has_cluster_focus);

        matrix.remove_status_element(&first.parcel_id, &episode).unwrap();
        assert_eq!(
            matrix.check_for_existing_cluster_focused_element(&episode),
            Some(second.parcel_id)
        );
        assert!(matrix
            .check_for_existing_system_wide_focused_element(&episode)
            .is_none());
    }

    #[test]
    fn test_standalone_matrix_hands_over_both_foci() {
        let matrix = ActivityMatrix::default();
        let episode = id("lab.1");
        let first = matrix.register_work_unit_activity(&id("wup.a.p1"), &episode, &id("wup.a"), &id("step.parse"));
        let second = matrix.register_work_unit_activity(&id("wup.b.p1"), &episode, &id("wup.b"), &id("step.parse"));

        matrix.remove_status_element(&first.parcel_id, &episode).unwrap();
        assert_eq!(
            matrix.check_for_existing_system_wide_focused_element(&episode),
            Some(second.parcel_id)
        );
    }

    #[test]
    fn test_downstream_links_reach_tracker() {
        let f = fixture();
        let upstream = register(&f, "wup.a");
        f.matrix
            .register_downstream_wup_interest(&upstream.parcel_id, id("wup.next"));
        assert!(!f.matrix.tracker().is_finalisation_candidate(&upstream.parcel_id));

        f.matrix
            .register_downstream_parcel(&upstream.parcel_id, id("wup.next"), id("wup.next.p1"));
        assert!(f.matrix.tracker().is_finalisation_candidate(&upstream.parcel_id));
    }
}
