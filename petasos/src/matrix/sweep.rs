//! Periodic reconciliation over every episode.
//!
//! A sweep propagates terminal outcomes to siblings, garbage-collects
//! finalised work, retries timed-out or failed attempts, and abandons
//! attempts whose retries ran out. Each episode is reconciled on its own:
//! a problem in one episode is recorded in the [`SweepReport`] and the pass
//! moves on.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::activity_matrix::ActivityMatrix;
use super::episode::EpisodeStatusSet;
use crate::config::PetasosConfig;
use crate::core::{EpisodeId, ParcelId, ProcessingStatus};
use crate::errors::PetasosError;
use crate::events::ParcelEvent;
use crate::utils::{is_older_than, now_utc, Timestamp};

/// A failure confined to one episode during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepError {
    /// The episode being reconciled.
    pub episode_id: EpisodeId,
    /// What went wrong.
    pub message: String,
}

/// Summary of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Siblings moved to `FINISHED_ELSEWHERE`.
    pub finished_propagations: usize,
    /// Siblings moved to `FINALISED_ELSEWHERE`.
    pub finalised_propagations: usize,
    /// Siblings moved to `FAILED`.
    pub failed_propagations: usize,
    /// Finalised attempts garbage-collected.
    pub cleaned_up: usize,
    /// Attempts reset for another try.
    pub retried: usize,
    /// Attempts whose retries ran out.
    pub abandoned: usize,
    /// Abandonment records aged out.
    pub tombstones_expired: usize,
    /// Per-episode failures.
    pub errors: Vec<SweepError>,
}

impl SweepReport {
    /// Folds another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.finished_propagations += other.finished_propagations;
        self.finalised_propagations += other.finalised_propagations;
        self.failed_propagations += other.failed_propagations;
        self.cleaned_up += other.cleaned_up;
        self.retried += other.retried;
        self.abandoned += other.abandoned;
        self.tombstones_expired += other.tombstones_expired;
        self.errors.extend(other.errors);
    }

    /// Returns the number of elements the pass changed.
    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.finished_propagations
            + self.finalised_propagations
            + self.failed_propagations
            + self.cleaned_up
            + self.retried
            + self.abandoned
            + self.tombstones_expired
    }

    /// Returns true if the pass changed nothing and hit no errors.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.total_changes() == 0 && self.errors.is_empty()
    }

    fn record_error(&mut self, episode_id: &EpisodeId, error: &PetasosError) {
        warn!(episode_id = %episode_id, error = %error, "Sweep failure in episode");
        self.errors.push(SweepError {
            episode_id: episode_id.clone(),
            message: error.to_string(),
        });
    }
}

enum Propagation {
    Finished,
    Finalised,
    Failed,
}

impl ActivityMatrix {
    /// Runs one full sweep now.
    pub fn run_sweep(&self, config: &PetasosConfig) -> SweepReport {
        self.run_sweep_at(now_utc(), config)
    }

    /// Runs one full sweep as if the current time were `now`.
    pub fn run_sweep_at(&self, now: Timestamp, config: &PetasosConfig) -> SweepReport {
        let mut report = self.check_for_failed_parcel_for_parcel_episode();
        report.merge(self.check_for_finalised_parcel_for_parcel_episode());
        report.merge(self.check_for_finished_parcel_for_parcel_episode());
        report.merge(self.clear_aged_content(
            now,
            config.cleanup_age(),
            config.timeout_age(),
            config.retry_limit,
        ));

        if report.is_quiet() {
            debug!(episodes = self.episodes.len(), "Sweep complete, nothing to do");
        } else {
            info!(
                finished = report.finished_propagations,
                finalised = report.finalised_propagations,
                failed = report.failed_propagations,
                cleaned_up = report.cleaned_up,
                retried = report.retried,
                abandoned = report.abandoned,
                tombstones_expired = report.tombstones_expired,
                errors = report.errors.len(),
                "Sweep complete"
            );
        }
        report
    }

    /// Moves the siblings of every `FINISHED` attempt to `FINISHED_ELSEWHERE`.
    pub fn check_for_finished_parcel_for_parcel_episode(&self) -> SweepReport {
        self.propagate(&Propagation::Finished)
    }

    /// Moves the siblings of every `FINALISED` attempt to `FINALISED_ELSEWHERE`.
    pub fn check_for_finalised_parcel_for_parcel_episode(&self) -> SweepReport {
        self.propagate(&Propagation::Finalised)
    }

    /// Fails every episode that has a `FAILED` attempt.
    pub fn check_for_failed_parcel_for_parcel_episode(&self) -> SweepReport {
        self.propagate(&Propagation::Failed)
    }

    /// Garbage-collects finalised work, retries stale or failed attempts and
    /// abandons attempts that ran out of retries.
    ///
    /// - finalised older than `cleanup_age`: element, empty episode and parcel
    ///   are removed;
    /// - finalised younger than `cleanup_age`: untouched;
    /// - in progress or finished, younger than `timeout_age`: untouched;
    /// - anything else is retried while `retry_count < retry_limit`, and
    ///   abandoned otherwise.
    ///
    /// Abandonment records older than `cleanup_age` are dropped first.
    pub fn clear_aged_content(
        &self,
        now: Timestamp,
        cleanup_age: Duration,
        timeout_age: Duration,
        retry_limit: u32,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        let before = self.abandoned.len();
        self.abandoned
            .retain(|_, tombstone| !is_older_than(&tombstone.entry_timestamp, &now, cleanup_age));
        report.tombstones_expired = before.saturating_sub(self.abandoned.len());

        for episode_id in self.episode_ids() {
            if let Some(mut set) = self.episodes.get_mut(&episode_id) {
                self.age_episode(&mut set, now, cleanup_age, timeout_age, retry_limit, &mut report);
            }
            self.episodes.remove_if(&episode_id, |_, set| set.is_empty());
        }
        report
    }

    fn age_episode(
        &self,
        set: &mut EpisodeStatusSet,
        now: Timestamp,
        cleanup_age: Duration,
        timeout_age: Duration,
        retry_limit: u32,
        report: &mut SweepReport,
    ) {
        let episode_id = set.episode_id().clone();
        let parcel_ids: Vec<ParcelId> = set.iter().map(|e| e.parcel_id.clone()).collect();

        for parcel_id in parcel_ids {
            let Some(element) = set.get(&parcel_id) else {
                continue;
            };
            let status = element.processing_status;
            let retry_count = element.retry_count;

            if status.is_finalised() {
                if is_older_than(&element.entry_timestamp, &now, cleanup_age) {
                    self.clean_up(set, &parcel_id);
                    report.cleaned_up += 1;
                }
                continue;
            }
            if status.is_awaiting_timeout()
                && !is_older_than(&element.entry_timestamp, &now, timeout_age)
            {
                continue;
            }

            if retry_count < retry_limit {
                match self.retry(set, &parcel_id) {
                    Ok(()) => report.retried += 1,
                    Err(e) => report.record_error(&episode_id, &e),
                }
            } else {
                self.abandon(set, &parcel_id, now);
                report.abandoned += 1;
            }
        }
    }

    fn clean_up(&self, set: &mut EpisodeStatusSet, parcel_id: &ParcelId) {
        let Some(removed) = set.remove(parcel_id) else {
            return;
        };
        self.announce_successor(set, &removed);
        self.registry.remove(parcel_id);
        self.tracker.forget(parcel_id);
        debug!(parcel_id = %parcel_id, episode_id = %removed.episode_id, "Cleaned up finalised parcel");
        self.events.try_emit(ParcelEvent::CleanedUp {
            parcel_id: parcel_id.clone(),
            episode_id: removed.episode_id,
        });
    }

    fn retry(&self, set: &mut EpisodeStatusSet, parcel_id: &ParcelId) -> Result<(), PetasosError> {
        let Some(element) = set.get_mut(parcel_id) else {
            return Ok(());
        };
        element.retry_count += 1;
        element.requires_retry = true;
        element.set_status(ProcessingStatus::Registered);
        info!(
            parcel_id = %parcel_id,
            episode_id = %element.episode_id,
            retry_count = element.retry_count,
            "Parcel reset for retry"
        );
        self.events.try_emit(ParcelEvent::Retried {
            parcel_id: parcel_id.clone(),
            episode_id: element.episode_id.clone(),
            retry_count: element.retry_count,
        });
        self.registry.modify(parcel_id, |parcel| parcel.reset_for_retry())
    }

    fn abandon(&self, set: &mut EpisodeStatusSet, parcel_id: &ParcelId, now: Timestamp) {
        let Some(removed) = set.remove(parcel_id) else {
            return;
        };
        self.announce_successor(set, &removed);
        self.registry.remove(parcel_id);
        self.tracker.forget(parcel_id);

        let mut tombstone = removed;
        tombstone.clear_focus();
        tombstone.requires_retry = false;
        tombstone.processing_status = ProcessingStatus::Abandoned;
        tombstone.entry_timestamp = now;

        warn!(
            parcel_id = %parcel_id,
            episode_id = %tombstone.episode_id,
            retry_count = tombstone.retry_count,
            "Parcel abandoned after exhausting retries"
        );
        self.events.try_emit(ParcelEvent::Abandoned {
            parcel_id: parcel_id.clone(),
            episode_id: tombstone.episode_id.clone(),
            retry_count: tombstone.retry_count,
        });
        self.abandoned.insert(parcel_id.clone(), tombstone);
    }

    /// Runs the failed, finalised and finished propagations for one episode.
    pub fn reconcile_episode(&self, episode_id: &EpisodeId) -> SweepReport {
        let mut report = SweepReport::default();
        for kind in [Propagation::Failed, Propagation::Finalised, Propagation::Finished] {
            self.propagate_episode(episode_id, &kind, &mut report);
        }
        report
    }

    fn propagate(&self, kind: &Propagation) -> SweepReport {
        let mut report = SweepReport::default();
        for episode_id in self.episode_ids() {
            self.propagate_episode(&episode_id, kind, &mut report);
        }
        report
    }

    fn propagate_episode(&self, episode_id: &EpisodeId, kind: &Propagation, report: &mut SweepReport) {
        let Some(mut set) = self.episodes.get_mut(episode_id) else {
            return;
        };
        let (changed, target) = match kind {
            Propagation::Finished => (set.propagate_finished(), ProcessingStatus::FinishedElsewhere),
            Propagation::Finalised => (set.propagate_finalised(), ProcessingStatus::FinalisedElsewhere),
            Propagation::Failed => (set.propagate_failed(), ProcessingStatus::Failed),
        };
        if changed.is_empty() {
            return;
        }
        debug!(episode_id = %episode_id, status = %target, count = changed.len(), "Propagated status to siblings");

        for parcel_id in &changed {
            self.events.try_emit(ParcelEvent::StatusChanged {
                parcel_id: parcel_id.clone(),
                episode_id: episode_id.clone(),
                status: target,
            });
            if let Err(e) = self
                .registry
                .modify(parcel_id, |parcel| parcel.processing_status = target)
            {
                report.record_error(episode_id, &e);
            }
        }
        match kind {
            Propagation::Finished => report.finished_propagations += changed.len(),
            Propagation::Finalised => report.finalised_propagations += changed.len(),
            Propagation::Failed => report.failed_propagations += changed.len(),
        }
    }

    fn episode_ids(&self) -> Vec<EpisodeId> {
        self.episodes.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Identifier, Parcel, UnitOfWork};
    use crate::events::CollectingParcelEventSink;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn id(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    fn config() -> PetasosConfig {
        PetasosConfig::new()
            .with_cleanup_age(Duration::from_secs(10))
            .with_timeout_age(Duration::from_secs(20))
            .with_retry_limit(3)
    }

    fn later(secs: i64) -> Timestamp {
        now_utc() + chrono::Duration::seconds(secs)
    }

    fn register(matrix: &ActivityMatrix, processor: &str) -> ParcelId {
        let uow = UnitOfWork::new(id("uow.lab"), id("lab.1"));
        let parcel = Parcel::new(id("step.parse"), id(processor), None, uow);
        let parcel_id = parcel.instance_id.clone();
        matrix.registry().add(parcel).unwrap();
        matrix.register_work_unit_activity(&parcel_id, &id("lab.1"), &id(processor), &id("step.parse"));
        parcel_id
    }

    fn set_status(matrix: &ActivityMatrix, parcel_id: &ParcelId, status: ProcessingStatus) {
        let mut set = matrix.episodes.get_mut(&id("lab.1")).unwrap();
        set.get_mut(parcel_id).unwrap().set_status(status);
    }

    fn set_retry_count(matrix: &ActivityMatrix, parcel_id: &ParcelId, retry_count: u32) {
        let mut set = matrix.episodes.get_mut(&id("lab.1")).unwrap();
        set.get_mut(parcel_id).unwrap().retry_count = retry_count;
    }

    fn status(matrix: &ActivityMatrix, parcel_id: &ParcelId) -> ProcessingStatus {
        matrix
            .get_status_element(parcel_id, &id("lab.1"))
            .unwrap()
            .processing_status
    }

    #[test]
    fn test_finished_propagates_to_siblings_and_registry() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        let p2 = register(&matrix, "wup.b");
        set_status(&matrix, &p1, ProcessingStatus::Finished);

        let report = matrix.run_sweep(&config());
        assert_eq!(report.finished_propagations, 1);
        assert_eq!(status(&matrix, &p2), ProcessingStatus::FinishedElsewhere);
        assert_eq!(
            matrix.registry().get(&p2).unwrap().processing_status,
            ProcessingStatus::FinishedElsewhere
        );
    }

    #[test]
    fn test_failure_is_contagious() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        let p2 = register(&matrix, "wup.b");
        set_status(&matrix, &p2, ProcessingStatus::Failed);

        let report = matrix.check_for_failed_parcel_for_parcel_episode();
        assert_eq!(report.failed_propagations, 1);
        assert_eq!(status(&matrix, &p1), ProcessingStatus::Failed);
    }

    #[test]
    fn test_young_in_progress_work_is_untouched() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        set_status(&matrix, &p1, ProcessingStatus::Active);

        let report = matrix.run_sweep(&config());
        assert!(report.is_quiet());
        assert_eq!(status(&matrix, &p1), ProcessingStatus::Active);
    }

    #[test]
    fn test_young_finalised_work_is_untouched() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        set_status(&matrix, &p1, ProcessingStatus::Finalised);

        let report = matrix.clear_aged_content(now_utc(), Duration::from_secs(10), Duration::from_secs(20), 3);
        assert_eq!(report.cleaned_up, 0);
        assert_eq!(report.retried, 0);
        assert_eq!(status(&matrix, &p1), ProcessingStatus::Finalised);
    }

    #[test]
    fn test_aged_finalised_work_is_cleaned_up() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        set_status(&matrix, &p1, ProcessingStatus::Finalised);

        let report = matrix.run_sweep_at(later(11), &config());
        assert_eq!(report.cleaned_up, 1);
        assert!(!matrix.has_episode(&id("lab.1")));
        assert!(matrix.registry().get(&p1).is_none());
    }

    #[test]
    fn test_timed_out_work_is_retried() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        set_status(&matrix, &p1, ProcessingStatus::Active);
        matrix
            .registry()
            .modify(&p1, |p| p.mark_started(now_utc()))
            .unwrap();

        let report = matrix.run_sweep_at(later(21), &config());
        assert_eq!(report.retried, 1);

        let element = matrix.get_status_element(&p1, &id("lab.1")).unwrap();
        assert_eq!(element.processing_status, ProcessingStatus::Registered);
        assert_eq!(element.retry_count, 1);
        assert!(element.requires_retry);
        assert!(matrix.registry().get(&p1).unwrap().started_at.is_none());
    }

    #[test]
    fn test_retry_of_unregistered_parcel_is_an_error_not_a_retry() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        set_status(&matrix, &p1, ProcessingStatus::Failed);
        matrix.registry().remove(&p1);

        let report = matrix.clear_aged_content(now_utc(), Duration::from_secs(10), Duration::from_secs(20), 3);
        assert_eq!(report.retried, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].episode_id, id("lab.1"));
    }

    #[test]
    fn test_retry_bound_then_abandonment() {
        let events = Arc::new(CollectingParcelEventSink::new());
        let matrix = ActivityMatrix::default().with_event_sink(events.clone());
        let p1 = register(&matrix, "wup.a");
        set_retry_count(&matrix, &p1, 2);
        set_status(&matrix, &p1, ProcessingStatus::Failed);

        let report = matrix.run_sweep(&config());
        assert_eq!(report.retried, 1);
        let element = matrix.get_status_element(&p1, &id("lab.1")).unwrap();
        assert_eq!(element.processing_status, ProcessingStatus::Registered);
        assert_eq!(element.retry_count, 3);

        set_status(&matrix, &p1, ProcessingStatus::Failed);
        let report = matrix.run_sweep(&config());
        assert_eq!(report.abandoned, 1);
        assert!(matrix.get_status_element(&p1, &id("lab.1")).is_none());
        assert!(matrix.registry().get(&p1).is_none());

        let tombstone = matrix.abandoned_element(&p1).unwrap();
        assert_eq!(tombstone.processing_status, ProcessingStatus::Abandoned);
        assert_eq!(events.events_of_type("parcel.abandoned").len(), 1);
    }

    #[test]
    fn test_abandonment_transfers_focus() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        let p2 = register(&matrix, "wup.b");
        set_retry_count(&matrix, &p1, 3);
        set_status(&matrix, &p1, ProcessingStatus::Failed);

        matrix.clear_aged_content(now_utc(), Duration::from_secs(10), Duration::from_secs(20), 3);
        assert_eq!(
            matrix.check_for_existing_cluster_focused_element(&id("lab.1")),
            Some(p2)
        );
    }

    #[test]
    fn test_tombstones_expire_after_cleanup_age() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        set_retry_count(&matrix, &p1, 3);
        set_status(&matrix, &p1, ProcessingStatus::Failed);
        matrix.run_sweep(&config());
        assert!(matrix.abandoned_element(&p1).is_some());

        let report = matrix.run_sweep_at(later(11), &config());
        assert_eq!(report.tombstones_expired, 1);
        assert!(matrix.abandoned_element(&p1).is_none());
    }

    #[test]
    fn test_missing_parcel_is_isolated_to_its_episode() {
        let matrix = ActivityMatrix::default();
        let p1 = register(&matrix, "wup.a");
        let p2 = register(&matrix, "wup.b");
        matrix.registry().remove(&p2);
        set_status(&matrix, &p1, ProcessingStatus::Finished);

        let report = matrix.run_sweep(&config());
        assert_eq!(report.finished_propagations, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].episode_id, id("lab.1"));
        assert_eq!(status(&matrix, &p2), ProcessingStatus::FinishedElsewhere);
    }
}
