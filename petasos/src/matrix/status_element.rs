//! Per-attempt status entries held by the activity matrix.

use serde::{Deserialize, Serialize};

use crate::core::{
    ActivityStatus, EpisodeId, ParcelId, ProcessingStatus, ProcessorInstanceId, ProcessorTypeId,
};
use crate::utils::{now_utc, Timestamp};

/// Lightweight status entry for one parcel attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelStatusElement {
    /// The attempt.
    pub parcel_id: ParcelId,
    /// The episode the attempt works on.
    pub episode_id: EpisodeId,
    /// The processor instance making the attempt.
    pub processor_instance_id: ProcessorInstanceId,
    /// The processor type making the attempt.
    pub processor_type_id: ProcessorTypeId,
    /// The upstream attempt, if any.
    pub previous_parcel_id: Option<ParcelId>,
    /// The upstream episode, if any.
    pub previous_episode_id: Option<EpisodeId>,
    /// The upstream processor instance, if any.
    pub previous_processor_instance_id: Option<ProcessorInstanceId>,
    /// The upstream processor type, if any.
    pub previous_processor_type_id: Option<ProcessorTypeId>,
    /// Current processing status.
    pub processing_status: ProcessingStatus,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// When the element last changed status.
    pub entry_timestamp: Timestamp,
    /// Holds the right to execute within the cluster.
    pub has_cluster_focus: bool,
    /// Holds the right to execute system-wide.
    pub has_system_wide_focus: bool,
    /// Set when the sweep reset the attempt for another try.
    pub requires_retry: bool,
}

impl ParcelStatusElement {
    /// Creates an unfocused, freshly registered element.
    #[must_use]
    pub fn new(
        parcel_id: ParcelId,
        episode_id: EpisodeId,
        processor_instance_id: ProcessorInstanceId,
        processor_type_id: ProcessorTypeId,
    ) -> Self {
        Self {
            parcel_id,
            episode_id,
            processor_instance_id,
            processor_type_id,
            previous_parcel_id: None,
            previous_episode_id: None,
            previous_processor_instance_id: None,
            previous_processor_type_id: None,
            processing_status: ProcessingStatus::Registered,
            retry_count: 0,
            entry_timestamp: now_utc(),
            has_cluster_focus: false,
            has_system_wide_focus: false,
            requires_retry: false,
        }
    }

    /// Changes status and restarts the element's age.
    pub fn set_status(&mut self, status: ProcessingStatus) {
        self.processing_status = status;
        self.touch();
    }

    /// Restarts the element's age.
    pub fn touch(&mut self) {
        self.entry_timestamp = now_utc();
    }

    /// Grants cluster focus, and system-wide focus if `system_wide`.
    pub fn grant_focus(&mut self, system_wide: bool) {
        self.has_cluster_focus = true;
        self.has_system_wide_focus = system_wide;
    }

    /// Revokes both focus flags.
    pub fn clear_focus(&mut self) {
        self.has_cluster_focus = false;
        self.has_system_wide_focus = false;
    }

    /// Returns the directive a processor holding this element should follow.
    #[must_use]
    pub fn suggested_status(&self) -> ActivityStatus {
        match self.processing_status {
            ProcessingStatus::Abandoned => ActivityStatus::Abandoned,
            _ if !self.has_cluster_focus => ActivityStatus::Waiting,
            status => ActivityStatus::from(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Identifier;

    fn element() -> ParcelStatusElement {
        ParcelStatusElement::new(
            Identifier::parse("wup.a.p1").unwrap(),
            Identifier::parse("lab.1").unwrap(),
            Identifier::parse("wup.a").unwrap(),
            Identifier::parse("step.parse").unwrap(),
        )
    }

    #[test]
    fn test_new_element_is_unfocused() {
        let e = element();
        assert!(!e.has_cluster_focus);
        assert!(!e.has_system_wide_focus);
        assert_eq!(e.retry_count, 0);
        assert_eq!(e.suggested_status(), ActivityStatus::Waiting);
    }

    #[test]
    fn test_grant_and_clear_focus() {
        let mut e = element();
        e.grant_focus(true);
        assert!(e.has_cluster_focus && e.has_system_wide_focus);
        assert_eq!(e.suggested_status(), ActivityStatus::Executing);

        e.clear_focus();
        assert!(!e.has_cluster_focus && !e.has_system_wide_focus);
    }

    #[test]
    fn test_set_status_refreshes_entry_timestamp() {
        let mut e = element();
        let before = e.entry_timestamp;
        std::thread::sleep(std::time::Duration::from_millis(2));
        e.set_status(ProcessingStatus::Active);
        assert!(e.entry_timestamp > before);
    }

    #[test]
    fn test_abandoned_overrides_focus() {
        let mut e = element();
        e.grant_focus(true);
        e.set_status(ProcessingStatus::Abandoned);
        assert_eq!(e.suggested_status(), ActivityStatus::Abandoned);
    }
}
