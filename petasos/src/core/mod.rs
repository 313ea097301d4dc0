//! Core domain model types for petasos.
//!
//! This module contains the value types every other component exchanges:
//! - Hierarchical identifiers
//! - Units of work and their payloads
//! - Parcels (execution attempts)
//! - Job cards and continuity identifiers
//! - Status and mode enums

mod identifier;
mod job_card;
mod parcel;
mod status;
mod uow;

pub use identifier::{EpisodeId, Identifier, ParcelId, ProcessorInstanceId, ProcessorTypeId};
pub use job_card::{ContinuityId, JobCard};
pub use parcel::Parcel;
pub use status::{
    ActivityStatus, ConcurrencyMode, FinalisationStatus, ProcessingStatus, ResilienceMode,
};
pub use uow::{UnitOfWork, UoWOutcome, UoWPayload};
