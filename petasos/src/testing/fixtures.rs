//! Test fixtures for engine tests.

use std::sync::Arc;

use crate::audit::CollectingAuditTrailWriter;
use crate::config::PetasosConfig;
use crate::core::{Identifier, JobCard, UnitOfWork};
use crate::errors::PetasosResult;
use crate::events::CollectingParcelEventSink;
use crate::facade::ParcelLifecycleFacade;
use crate::matrix::ActivityMatrix;

fn ident(value: &str) -> Identifier {
    Identifier::parse(value).unwrap_or_else(|e| panic!("invalid test identifier {value:?}: {e}"))
}

/// Builds a job card for a processor, e.g. `job_card_for("step.parse", "wup.a")`.
///
/// # Panics
///
/// Panics if either identifier is malformed.
#[must_use]
pub fn job_card_for(processor_type: &str, processor_instance: &str) -> JobCard {
    JobCard::new(ident(processor_type), ident(processor_instance))
}

/// Builds a job card continuing from the parcel an upstream card is bound to.
///
/// # Panics
///
/// Panics if an identifier is malformed or the upstream card is unbound.
#[must_use]
pub fn upstream_job_card(processor_type: &str, processor_instance: &str, upstream: &JobCard) -> JobCard {
    let (Some(upstream_type), Some(upstream_instance), Some(parcel), Some(episode)) = (
        upstream.continuity.present_processor_type.clone(),
        upstream.continuity.present_processor_instance.clone(),
        upstream.present_parcel_id().cloned(),
        upstream.present_episode_id().cloned(),
    ) else {
        panic!("upstream job card is not bound to a parcel");
    };
    job_card_for(processor_type, processor_instance).with_upstream(upstream_type, upstream_instance, parcel, episode)
}

/// Builds a unit of work whose instance (and so episode) is `episode`.
///
/// # Panics
///
/// Panics if `episode` is malformed.
#[must_use]
pub fn uow_for_episode(episode: &str) -> UnitOfWork {
    UnitOfWork::new(ident("uow.test"), ident(episode))
}

/// A facade wired to in-memory audit and event collectors.
pub struct TestEngine {
    /// The facade under test.
    pub facade: ParcelLifecycleFacade,
    /// Every audit entry written.
    pub audit: Arc<CollectingAuditTrailWriter>,
    /// Every lifecycle event emitted.
    pub events: Arc<CollectingParcelEventSink>,
}

impl TestEngine {
    /// Creates an engine with default configuration.
    pub fn new() -> PetasosResult<Self> {
        Self::with_config(PetasosConfig::default())
    }

    /// Creates an engine with the given configuration.
    pub fn with_config(config: PetasosConfig) -> PetasosResult<Self> {
        let audit = Arc::new(CollectingAuditTrailWriter::new());
        let events = Arc::new(CollectingParcelEventSink::new());
        let matrix = Arc::new(
            ActivityMatrix::default()
                .with_event_sink(events.clone())
                .with_resilience_mode(config.resilience_mode),
        );
        let facade = ParcelLifecycleFacade::new(matrix, audit.clone(), config)?;
        Ok(Self {
            facade,
            audit,
            events,
        })
    }

    /// Returns the activity matrix.
    #[must_use]
    pub fn matrix(&self) -> &Arc<ActivityMatrix> {
        self.facade.matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ActivityStatus;

    #[test]
    fn test_upstream_job_card_copies_binding() {
        let mut upstream = job_card_for("step.parse", "wup.a");
        upstream.bind_parcel(ident("wup.a.p1"), ident("lab.1"));

        let downstream = upstream_job_card("step.store", "wup.b", &upstream);
        assert_eq!(downstream.previous_parcel_id(), Some(&ident("wup.a.p1")));
        assert_eq!(
            downstream.continuity.previous_processor_instance,
            Some(ident("wup.a"))
        );
        assert!(downstream.present_parcel_id().is_none());
    }

    #[tokio::test]
    async fn test_engine_collects_audit_and_events() {
        let engine = TestEngine::new().unwrap();
        let mut card = job_card_for("step.ingest", "wup.edge");
        engine
            .facade
            .register_system_edge_wua(&mut card, uow_for_episode("lab.1"), true)
            .await
            .unwrap();

        assert_eq!(card.suggested_status, ActivityStatus::Executing);
        assert_eq!(engine.audit.synchronous_count(), 1);
        assert_eq!(engine.events.events_of_type("parcel.registered").len(), 1);
        assert_eq!(engine.events.events_of_type("parcel.focus_granted").len(), 1);
    }
}
