//! The set of status elements sharing one episode.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::status_element::ParcelStatusElement;
use crate::core::{EpisodeId, ParcelId, ProcessingStatus, ResilienceMode};

/// Every attempt, by any redundant processor instance, at one episode.
///
/// Holds the focus invariant: at most one element with system-wide focus, at
/// most one with cluster focus, and system-wide focus only on the element that
/// also holds cluster focus.
///
/// In [`ResilienceMode::Standalone`] the engine owns the whole system, so
/// focus is always granted and handed over as both flags together. In
/// [`ResilienceMode::Clustered`] the engine only arbitrates its own cluster:
/// system-wide focus goes to an element elected while nobody holds it, and is
/// never handed over locally.
#[derive(Debug, Clone)]
pub struct EpisodeStatusSet {
    episode_id: EpisodeId,
    mode: ResilienceMode,
    elements: HashMap<ParcelId, ParcelStatusElement>,
}

impl EpisodeStatusSet {
    /// Creates an empty set for an episode.
    #[must_use]
    pub fn new(episode_id: EpisodeId, mode: ResilienceMode) -> Self {
        Self {
            episode_id,
            mode,
            elements: HashMap::new(),
        }
    }

    /// Returns the episode.
    #[must_use]
    pub fn episode_id(&self) -> &EpisodeId {
        &self.episode_id
    }

    /// Returns one element.
    #[must_use]
    pub fn get(&self, parcel_id: &ParcelId) -> Option<&ParcelStatusElement> {
        self.elements.get(parcel_id)
    }

    /// Returns one element mutably.
    pub fn get_mut(&mut self, parcel_id: &ParcelId) -> Option<&mut ParcelStatusElement> {
        self.elements.get_mut(parcel_id)
    }

    /// Iterates over the elements in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ParcelStatusElement> {
        self.elements.values()
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if the set has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns the parcel holding system-wide focus.
    #[must_use]
    pub fn system_wide_focus_holder(&self) -> Option<&ParcelId> {
        self.elements
            .values()
            .find(|e| e.has_system_wide_focus)
            .map(|e| &e.parcel_id)
    }

    /// Returns the parcel holding cluster focus.
    #[must_use]
    pub fn cluster_focus_holder(&self) -> Option<&ParcelId> {
        self.elements
            .values()
            .find(|e| e.has_cluster_focus)
            .map(|e| &e.parcel_id)
    }

    /// Inserts a new element, electing focus first-writer-wins.
    ///
    /// An element arriving while another holds cluster focus gets neither
    /// focus. Otherwise it gets cluster focus, and system-wide focus too in
    /// standalone mode or when nobody in the cluster holds it yet.
    pub fn insert_and_elect(&mut self, mut element: ParcelStatusElement) -> &ParcelStatusElement {
        element.clear_focus();
        if self.cluster_focus_holder().is_none() {
            let system_wide = match self.mode {
                ResilienceMode::Standalone => true,
                ResilienceMode::Clustered => self.system_wide_focus_holder().is_none(),
            };
            element.grant_focus(system_wide);
        }
        let parcel_id = element.parcel_id.clone();
        self.elements.entry(parcel_id).or_insert(element)
    }

    /// Removes an element, handing its focus to the oldest in-progress sibling.
    pub fn remove(&mut self, parcel_id: &ParcelId) -> Option<ParcelStatusElement> {
        let removed = self.elements.remove(parcel_id)?;
        if removed.has_cluster_focus {
            self.transfer_focus(self.mode == ResilienceMode::Standalone);
        }
        Some(removed)
    }

    /// Pushes every sibling of the winning `FINISHED` element to `FINISHED_ELSEWHERE`.
    ///
    /// Siblings that already failed or were finalised keep their status.
    /// Returns the elements that changed.
    pub fn propagate_finished(&mut self) -> Vec<ParcelId> {
        let Some(winner) = self.terminal_winner(ProcessingStatus::Finished) else {
            return Vec::new();
        };
        self.push_siblings(&winner, ProcessingStatus::FinishedElsewhere, |status| {
            !matches!(
                status,
                ProcessingStatus::FinishedElsewhere
                    | ProcessingStatus::Failed
                    | ProcessingStatus::Finalised
                    | ProcessingStatus::FinalisedElsewhere
            )
        })
    }

    /// Pushes every sibling of the winning `FINALISED` element to `FINALISED_ELSEWHERE`.
    ///
    /// Returns the elements that changed.
    pub fn propagate_finalised(&mut self) -> Vec<ParcelId> {
        let Some(winner) = self.terminal_winner(ProcessingStatus::Finalised) else {
            return Vec::new();
        };
        self.push_siblings(&winner, ProcessingStatus::FinalisedElsewhere, |status| {
            !matches!(status, ProcessingStatus::FinalisedElsewhere | ProcessingStatus::Failed)
        })
    }

    /// Marks every element `FAILED` if any element failed.
    ///
    /// Returns the elements that changed.
    pub fn propagate_failed(&mut self) -> Vec<ParcelId> {
        if !self
            .elements
            .values()
            .any(|e| e.processing_status == ProcessingStatus::Failed)
        {
            return Vec::new();
        }
        let mut changed = Vec::new();
        for element in self.elements.values_mut() {
            if element.processing_status != ProcessingStatus::Failed {
                element.set_status(ProcessingStatus::Failed);
                changed.push(element.parcel_id.clone());
            }
        }
        changed
    }

    /// Returns true if the focus invariant holds.
    #[must_use]
    pub fn focus_invariant_holds(&self) -> bool {
        let cluster = self.elements.values().filter(|e| e.has_cluster_focus).count();
        let system = self.elements.values().filter(|e| e.has_system_wide_focus).count();
        let implied = self
            .elements
            .values()
            .all(|e| !e.has_system_wide_focus || e.has_cluster_focus);
        cluster <= 1 && system <= 1 && implied
    }

    /// The element keeping a terminal status: the focused one if it has it,
    /// otherwise the oldest element with that status.
    fn terminal_winner(&self, status: ProcessingStatus) -> Option<ParcelId> {
        let mut candidates: Vec<&ParcelStatusElement> = self
            .elements
            .values()
            .filter(|e| e.processing_status == status)
            .collect();
        if let Some(focused) = candidates.iter().find(|e| e.has_cluster_focus) {
            return Some(focused.parcel_id.clone());
        }
        candidates.sort_by(|a, b| by_age(a, b));
        candidates.first().map(|e| e.parcel_id.clone())
    }

    fn push_siblings(
        &mut self,
        winner: &ParcelId,
        target: ProcessingStatus,
        eligible: impl Fn(ProcessingStatus) -> bool,
    ) -> Vec<ParcelId> {
        let mut changed = Vec::new();
        for element in self.elements.values_mut() {
            if &element.parcel_id != winner && eligible(element.processing_status) {
                element.set_status(target);
                changed.push(element.parcel_id.clone());
            }
        }
        changed
    }

    fn transfer_focus(&mut self, system_wide: bool) -> Option<ParcelId> {
        let successor = self
            .elements
            .values_mut()
            .filter(|e| e.processing_status.is_in_progress())
            .min_by(|a, b| by_age(a, b))?;
        successor.grant_focus(system_wide);
        Some(successor.parcel_id.clone())
    }
}

fn by_age(a: &ParcelStatusElement, b: &ParcelStatusElement) -> Ordering {
    a.entry_timestamp
        .cmp(&b.entry_timestamp)
        .then_with(|| a.parcel_id.cmp(&b.parcel_id))
}
