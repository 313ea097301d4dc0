//! # Petasos
//!
//! A resilience and arbitration engine for work-unit processing pipelines.
//!
//! Several redundant processor instances may attempt the same unit of work.
//! Petasos makes sure exactly one of them executes it while the others wait,
//! and keeps the pipeline moving when attempts stall or fail:
//!
//! - **Focus arbitration**: the first attempt registered for an episode holds
//!   focus; every other attempt is told to wait
//! - **Sibling reconciliation**: finished, finalised and failed outcomes are
//!   pushed to every sibling attempt
//! - **Bounded retries**: timed-out or failed attempts are retried up to a limit
//!   and then abandoned, with an event announcing it
//! - **Downstream continuity**: finalisation waits until every declared
//!   downstream processor has picked the work up
//! - **Audit trail**: every registration is recorded with a content digest
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use petasos::prelude::*;
//!
//! let facade = ParcelLifecycleFacade::from_config(PetasosConfig::default())?;
//! let _sweeper = facade.start_sweeper();
//!
//! let mut card = JobCard::new(processor_type, processor_instance);
//! facade.register_standard_work_unit_activity(&mut card, uow.clone()).await?;
//!
//! if card.suggested_status == ActivityStatus::Executing {
//!     facade.notify_start_of_work_unit_activity(&mut card, uow.clone()).await?;
//!     // ... do the work ...
//!     facade.notify_finish_of_work_unit_activity(&mut card, uow).await?;
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod audit;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod facade;
pub mod matrix;
pub mod observability;
pub mod registry;
pub mod sweeper;
pub mod synchronisation;
pub mod testing;
pub mod tracker;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{
        AuditEntry, AuditTrailWriter, LoggingAuditTrailWriter, NoOpAuditTrailWriter,
    };
    pub use crate::config::PetasosConfig;
    pub use crate::core::{
        ActivityStatus, ConcurrencyMode, EpisodeId, FinalisationStatus, Identifier, JobCard,
        Parcel, ParcelId, ProcessingStatus, ProcessorInstanceId, ProcessorTypeId,
        ResilienceMode, UnitOfWork, UoWOutcome, UoWPayload,
    };
    pub use crate::errors::{PetasosError, PetasosResult};
    pub use crate::events::{LoggingParcelEventSink, NoOpParcelEventSink, ParcelEvent, ParcelEventSink};
    pub use crate::facade::ParcelLifecycleFacade;
    pub use crate::matrix::{ActivityMatrix, ParcelStatusElement, SweepReport};
    pub use crate::registry::ParcelRegistry;
    pub use crate::sweeper::{Sweeper, SweeperHandle};
    pub use crate::synchronisation::synchronise_job_card;
    pub use crate::tracker::DownstreamContinuationTracker;
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
