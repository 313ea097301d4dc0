//! The parcel lifecycle facade: the entry point processors call.
//!
//! Every operation takes the processor's [`JobCard`], applies the lifecycle
//! step to the parcel and its status element, then synchronises the card so
//! the processor learns whether to execute, wait or give up.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditTrailWriter, NoOpAuditTrailWriter};
use crate::config::PetasosConfig;
use crate::core::{
    EpisodeId, JobCard, Parcel, ParcelId, ProcessingStatus, ProcessorInstanceId, ProcessorTypeId,
    UnitOfWork,
};
use crate::errors::{InvalidArgumentError, PetasosError, PetasosResult};
use crate::events::ParcelEvent;
use crate::matrix::{ActivityMatrix, ParcelStatusElement, SweepReport};
use crate::sweeper::{Sweeper, SweeperHandle};
use crate::synchronisation::synchronise_job_card;
use crate::utils::now_utc;

/// Coordinates registry, matrix, tracker and audit trail for processors.
pub struct ParcelLifecycleFacade {
    matrix: Arc<ActivityMatrix>,
    audit: Arc<dyn AuditTrailWriter>,
    config: PetasosConfig,
}

impl std::fmt::Debug for ParcelLifecycleFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParcelLifecycleFacade")
            .field("matrix", &self.matrix)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ParcelLifecycleFacade {
    /// Creates a facade over an existing matrix.
    ///
    /// The matrix must elect focus under the configured resilience mode.
    pub fn new(
        matrix: Arc<ActivityMatrix>,
        audit: Arc<dyn AuditTrailWriter>,
        config: PetasosConfig,
    ) -> PetasosResult<Self> {
        config.validate()?;
        if matrix.resilience_mode() != config.resilience_mode {
            return Err(PetasosError::Config(format!(
                "matrix runs in {} mode but the configuration asks for {}",
                matrix.resilience_mode(),
                config.resilience_mode
            )));
        }
        info!(
            resilience_mode = %config.resilience_mode,
            retry_limit = config.retry_limit,
            "Parcel lifecycle facade ready"
        );
        Ok(Self {
            matrix,
            audit,
            config,
        })
    }

    /// Creates a facade with a fresh matrix and no audit trail.
    pub fn from_config(config: PetasosConfig) -> PetasosResult<Self> {
        Self::new(
            Arc::new(ActivityMatrix::default().with_resilience_mode(config.resilience_mode)),
            Arc::new(NoOpAuditTrailWriter),
            config,
        )
    }

    /// Returns the activity matrix.
    #[must_use]
    pub fn matrix(&self) -> &Arc<ActivityMatrix> {
        &self.matrix
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PetasosConfig {
        &self.config
    }

    /// Runs one sweep pass now.
    pub fn sweep(&self) -> SweepReport {
        self.matrix.run_sweep(&self.config)
    }

    /// Spawns the periodic sweeper for this facade's matrix.
    #[must_use]
    pub fn start_sweeper(&self) -> SweeperHandle {
        Sweeper::new(Arc::clone(&self.matrix), self.config.clone()).start()
    }

    /// Registers an attempt at `uow` by the card's processor.
    pub async fn register_standard_work_unit_activity(
        &self,
        job_card: &mut JobCard,
        uow: UnitOfWork,
    ) -> PetasosResult<ParcelStatusElement> {
        self.register(job_card, uow, false, "register_standard_work_unit_activity")
            .await
    }

    /// Registers an attempt at a system edge; `is_edge` makes the audit write
    /// synchronous.
    pub async fn register_system_edge_wua(
        &self,
        job_card: &mut JobCard,
        uow: UnitOfWork,
        is_edge: bool,
    ) -> PetasosResult<ParcelStatusElement> {
        self.register(job_card, uow, is_edge, "register_system_edge_wua")
            .await
    }

    /// Declares processors expected to continue the card's parcel downstream.
    ///
    /// Finalisation of the parcel is refused until each has registered.
    pub fn register_downstream_interest(
        &self,
        job_card: &JobCard,
        processors: impl IntoIterator<Item = ProcessorInstanceId>,
    ) -> PetasosResult<()> {
        let parcel_id = job_card.require_present_parcel("register_downstream_interest")?;
        for processor in processors {
            self.matrix
                .register_downstream_wup_interest(parcel_id, processor);
        }
        Ok(())
    }

    /// Reports that the attempt started running.
    pub async fn notify_start_of_work_unit_activity(
        &self,
        job_card: &mut JobCard,
        uow: UnitOfWork,
    ) -> PetasosResult<ParcelStatusElement> {
        let (parcel_id, episode_id) =
            resolve_for(job_card, &uow, "notify_start_of_work_unit_activity")?;
        let now = now_utc();
        self.matrix.update_work_unit_activity_with(
            &parcel_id,
            &episode_id,
            ProcessingStatus::Active,
            move |parcel| {
                parcel.uow = uow;
                parcel.mark_started(now);
            },
        )?;
        synchronise_job_card(&self.matrix, job_card)
    }

    /// Reports that the attempt finished, keeping the produced unit of work.
    pub async fn notify_finish_of_work_unit_activity(
        &self,
        job_card: &mut JobCard,
        uow: UnitOfWork,
    ) -> PetasosResult<ParcelStatusElement> {
        let (parcel_id, episode_id) =
            resolve_for(job_card, &uow, "notify_finish_of_work_unit_activity")?;
        let now = now_utc();
        self.matrix.update_work_unit_activity_with(
            &parcel_id,
            &episode_id,
            ProcessingStatus::Finished,
            move |parcel| parcel.mark_finished(uow, now),
        )?;
        synchronise_job_card(&self.matrix, job_card)
    }

    /// Reports that the attempt's output is safely handed on.
    ///
    /// Refused while a declared downstream processor has not yet registered
    /// its continuation.
    pub async fn notify_finalisation_of_work_unit_activity(
        &self,
        job_card: &mut JobCard,
    ) -> PetasosResult<ParcelStatusElement> {
        let (parcel_id, episode_id) =
            resolve(job_card, "notify_finalisation_of_work_unit_activity")?;
        let now = now_utc();
        self.matrix
            .finalise_work_unit_activity(&parcel_id, &episode_id, move |parcel| {
                parcel.mark_finalised(now);
            })?;
        synchronise_job_card(&self.matrix, job_card)
    }

    /// Reports that the attempt failed.
    pub async fn notify_failure_of_work_unit_activity(
        &self,
        job_card: &mut JobCard,
        uow: UnitOfWork,
    ) -> PetasosResult<ParcelStatusElement> {
        let (parcel_id, episode_id) =
            resolve_for(job_card, &uow, "notify_failure_of_work_unit_activity")?;
        self.matrix.update_work_unit_activity_with(
            &parcel_id,
            &episode_id,
            ProcessingStatus::Failed,
            move |parcel| parcel.mark_failed(uow),
        )?;
        synchronise_job_card(&self.matrix, job_card)
    }

    /// Removes every trace of the card's attempt.
    ///
    /// A card whose parcel cannot be resolved is a no-op. Returns the removed
    /// status element, if there was one.
    pub async fn notify_purge_of_work_unit_activity(
        &self,
        job_card: &mut JobCard,
    ) -> PetasosResult<Option<ParcelStatusElement>> {
        let Some(parcel_id) = job_card.present_parcel_id().cloned() else {
            debug!("Purge requested for a card with no parcel");
            return Ok(None);
        };
        let episode_id = job_card
            .present_episode_id()
            .cloned()
            .or_else(|| self.matrix.locate(&parcel_id).map(|e| e.episode_id));

        let removed = episode_id
            .as_ref()
            .and_then(|episode_id| self.matrix.remove_status_element(&parcel_id, episode_id));
        let tombstone = self.matrix.forget_abandoned(&parcel_id);
        let parcel = self.matrix.registry().remove(&parcel_id);
        self.matrix.tracker().forget(&parcel_id);

        if removed.is_none() && tombstone.is_none() && parcel.is_none() {
            debug!(parcel_id = %parcel_id, "Purge of unknown parcel ignored");
        } else {
            info!(parcel_id = %parcel_id, "Parcel purged");
            self.matrix.event_sink().try_emit(ParcelEvent::Purged {
                parcel_id: parcel_id.clone(),
                episode_id: episode_id.clone(),
            });
        }
        job_card.to_be_discarded = true;
        job_card.touch();
        Ok(removed.or(tombstone))
    }

    async fn register(
        &self,
        job_card: &mut JobCard,
        uow: UnitOfWork,
        is_edge: bool,
        operation: &str,
    ) -> PetasosResult<ParcelStatusElement> {
        let processor_instance = job_card.require_processor_instance(operation)?.clone();
        let processor_type = job_card.require_processor_type(operation)?.clone();
        let upstream = job_card.previous_parcel_id().cloned();
        let episode_id = uow.episode_id().clone();
        job_card.resilience_mode = self.config.resilience_mode;
        job_card.concurrency_mode = self.config.concurrency_mode;

        let (parcel, created) =
            self.locate_or_create_parcel(job_card, &processor_type, &processor_instance, upstream.clone(), uow)?;
        let parcel_id = parcel.instance_id.clone();

        self.matrix.register_work_unit_activity(
            &parcel_id,
            &episode_id,
            &processor_instance,
            &processor_type,
        );
        self.matrix
            .record_upstream(&parcel_id, &episode_id, &job_card.continuity)?;

        if let Some(upstream) = &upstream {
            self.link_upstream(upstream, &parcel_id, &processor_instance);
        }
        job_card.bind_parcel(parcel_id, episode_id);

        if created && self.config.audit_enabled {
            self.write_audit(&parcel, is_edge).await?;
        }
        synchronise_job_card(&self.matrix, job_card)
    }

    fn locate_or_create_parcel(
        &self,
        job_card: &JobCard,
        processor_type: &ProcessorTypeId,
        processor_instance: &ProcessorInstanceId,
        upstream: Option<ParcelId>,
        uow: UnitOfWork,
    ) -> PetasosResult<(Parcel, bool)> {
        let registry = self.matrix.registry();
        let known = job_card
            .present_parcel_id()
            .and_then(|id| registry.get(id))
            .filter(|p| p.episode_id == *uow.episode_id())
            .or_else(|| registry.find_active_for_processor(processor_instance, uow.instance_id()));
        if let Some(parcel) = known {
            debug!(parcel_id = %parcel.instance_id, "Reusing registered parcel");
            return Ok((parcel, false));
        }

        let parcel = Parcel::new(processor_type.clone(), processor_instance.clone(), upstream, uow);
        registry.add(parcel.clone())?;
        Ok((parcel, true))
    }

    fn link_upstream(&self, upstream: &ParcelId, downstream: &ParcelId, processor: &ProcessorInstanceId) {
        let linked = self
            .matrix
            .registry()
            .modify(upstream, |parcel| parcel.add_downstream_parcel(downstream.clone()));
        if linked.is_err() {
            debug!(upstream = %upstream, downstream = %downstream, "Upstream parcel no longer registered");
        }
        self.matrix
            .register_downstream_parcel(upstream, processor.clone(), downstream.clone());
    }

    async fn write_audit(&self, parcel: &Parcel, is_edge: bool) -> PetasosResult<()> {
        let entry = AuditEntry::for_registration(parcel, is_edge)?;
        if is_edge {
            if !self.audit.write_audit_entry(entry, true).await {
                warn!(parcel_id = %parcel.instance_id, "Audit writer rejected edge entry");
            }
            return Ok(());
        }

        let audit = Arc::clone(&self.audit);
        let parcel_id = parcel.instance_id.clone();
        tokio::spawn(async move {
            if !audit.write_audit_entry(entry, false).await {
                warn!(parcel_id = %parcel_id, "Audit writer rejected entry");
            }
        });
        Ok(())
    }
}

fn resolve(job_card: &JobCard, operation: &str) -> Result<(ParcelId, EpisodeId), InvalidArgumentError> {
    let parcel_id = job_card.require_present_parcel(operation)?.clone();
    let episode_id = job_card.present_episode_id().cloned().ok_or_else(|| {
        InvalidArgumentError::missing(operation, "job_card.present_episode_id")
    })?;
    Ok((parcel_id, episode_id))
}

/// Resolves the card and checks that `uow` belongs to the card's episode.
fn resolve_for(
    job_card: &JobCard,
    uow: &UnitOfWork,
    operation: &str,
) -> Result<(ParcelId, EpisodeId), InvalidArgumentError> {
    let (parcel_id, episode_id) = resolve(job_card, operation)?;
    if uow.episode_id() != &episode_id {
        return Err(InvalidArgumentError::missing(operation, "uow").with_reason(format!(
            "unit of work belongs to episode {} but the card is bound to {}",
            uow.episode_id(),
            episode_id
        )));
    }
    Ok((parcel_id, episode_id))
}
