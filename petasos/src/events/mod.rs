//! Parcel lifecycle events.
//!
//! Events are how the engine pushes outcomes callers would otherwise have to
//! poll for, most importantly the abandonment of an attempt whose retries are
//! exhausted.

mod sink;

use serde::{Deserialize, Serialize};

use crate::core::{EpisodeId, ParcelId, ProcessingStatus, ProcessorInstanceId};

pub use sink::{
    CollectingParcelEventSink, LoggingParcelEventSink, NoOpParcelEventSink, ParcelEventSink,
};

/// A lifecycle event for one parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParcelEvent {
    /// A new attempt was registered.
    Registered {
        /// The parcel.
        parcel_id: ParcelId,
        /// Its episode.
        episode_id: EpisodeId,
        /// The processor making the attempt.
        processor_instance_id: ProcessorInstanceId,
    },
    /// An attempt was granted focus.
    FocusGranted {
        /// The parcel.
        parcel_id: ParcelId,
        /// Its episode.
        episode_id: EpisodeId,
        /// Whether system-wide focus was granted in addition to cluster focus.
        system_wide: bool,
    },
    /// An attempt's status changed.
    StatusChanged {
        /// The parcel.
        parcel_id: ParcelId,
        /// Its episode.
        episode_id: EpisodeId,
        /// The new status.
        status: ProcessingStatus,
    },
    /// An attempt was reset for another try.
    Retried {
        /// The parcel.
        parcel_id: ParcelId,
        /// Its episode.
        episode_id: EpisodeId,
        /// Retries consumed so far.
        retry_count: u32,
    },
    /// An attempt exhausted its retries.
    Abandoned {
        /// The parcel.
        parcel_id: ParcelId,
        /// Its episode.
        episode_id: EpisodeId,
        /// Retries consumed.
        retry_count: u32,
    },
    /// An attempt was removed by an administrative purge.
    Purged {
        /// The parcel.
        parcel_id: ParcelId,
        /// Its episode, if it was still tracked.
        episode_id: Option<EpisodeId>,
    },
    /// A finalised attempt was garbage-collected.
    CleanedUp {
        /// The parcel.
        parcel_id: ParcelId,
        /// Its episode.
        episode_id: EpisodeId,
    },
}

impl ParcelEvent {
    /// Returns the dotted event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "parcel.registered",
            Self::FocusGranted { .. } => "parcel.focus_granted",
            Self::StatusChanged { .. } => "parcel.status_changed",
            Self::Retried { .. } => "parcel.retried",
            Self::Abandoned { .. } => "parcel.abandoned",
            Self::Purged { .. } => "parcel.purged",
            Self::CleanedUp { .. } => "parcel.cleaned_up",
        }
    }

    /// Returns the parcel the event is about.
    #[must_use]
    pub fn parcel_id(&self) -> &ParcelId {
        match self {
            Self::Registered { parcel_id, .. }
            | Self::FocusGranted { parcel_id, .. }
            | Self::StatusChanged { parcel_id, .. }
            | Self::Retried { parcel_id, .. }
            | Self::Abandoned { parcel_id, .. }
            | Self::Purged { parcel_id, .. }
            | Self::CleanedUp { parcel_id, .. } => parcel_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Identifier;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ParcelEvent::Abandoned {
            parcel_id: Identifier::parse("wup.a.p1").unwrap(),
            episode_id: Identifier::parse("lab.1").unwrap(),
            retry_count: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "abandoned");
        assert_eq!(json["retry_count"], 3);
        assert_eq!(event.event_type(), "parcel.abandoned");
    }
}
