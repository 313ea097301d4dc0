//! Concurrent parcel storage with episode and type indexes.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;

use crate::core::{EpisodeId, Identifier, Parcel, ParcelId, ProcessingStatus, ProcessorInstanceId};
use crate::errors::{PetasosError, PetasosResult};

/// Thread-safe registry owning every parcel record.
///
/// Each operation is atomic with respect to one instance key. The secondary
/// indexes are maintained after the primary write and are not transactional
/// with it; readers tolerate an index entry whose parcel has just vanished.
#[derive(Debug, Default)]
pub struct ParcelRegistry {
    parcels: DashMap<ParcelId, Parcel>,
    by_episode: DashMap<EpisodeId, HashSet<ParcelId>>,
    by_type: DashMap<Identifier, HashSet<ParcelId>>,
}

impl ParcelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parcel; fails if its instance id is already present.
    pub fn add(&self, parcel: Parcel) -> PetasosResult<()> {
        let id = parcel.instance_id.clone();
        let episode = parcel.episode_id.clone();
        let type_id = parcel.type_id.clone();

        match self.parcels.entry(id.clone()) {
            Entry::Occupied(_) => return Err(PetasosError::DuplicateParcel(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(parcel);
            }
        }

        self.by_episode.entry(episode).or_default().insert(id.clone());
        self.by_type.entry(type_id).or_default().insert(id);
        Ok(())
    }

    /// Returns a snapshot of a parcel.
    #[must_use]
    pub fn get(&self, id: &ParcelId) -> Option<Parcel> {
        self.parcels.get(id).map(|p| p.clone())
    }

    /// Returns true if the parcel is present.
    #[must_use]
    pub fn contains(&self, id: &ParcelId) -> bool {
        self.parcels.contains_key(id)
    }

    /// Removes a parcel, returning it if it was present.
    pub fn remove(&self, id: &ParcelId) -> Option<Parcel> {
        let (_, parcel) = self.parcels.remove(id)?;
        Self::unindex(&self.by_episode, &parcel.episode_id, id);
        Self::unindex(&self.by_type, &parcel.type_id, id);
        Some(parcel)
    }

    /// Replaces a parcel wholesale.
    pub fn update(&self, parcel: Parcel) -> PetasosResult<()> {
        let id = parcel.instance_id.clone();
        let new_episode = parcel.episode_id.clone();
        let new_type = parcel.type_id.clone();

        let previous = {
            let mut slot = self
                .parcels
                .get_mut(&id)
                .ok_or_else(|| PetasosError::ParcelNotFound(id.to_string()))?;
            std::mem::replace(slot.value_mut(), parcel)
        };

        if previous.episode_id != new_episode {
            Self::unindex(&self.by_episode, &previous.episode_id, &id);
            self.by_episode.entry(new_episode).or_default().insert(id.clone());
        }
        if previous.type_id != new_type {
            Self::unindex(&self.by_type, &previous.type_id, &id);
            self.by_type.entry(new_type).or_default().insert(id);
        }
        Ok(())
    }

    /// Mutates a parcel in place while holding its entry.
    ///
    /// `f` must not change the parcel's episode or type.
    pub fn modify<R>(&self, id: &ParcelId, f: impl FnOnce(&mut Parcel) -> R) -> PetasosResult<R> {
        let mut slot = self
            .parcels
            .get_mut(id)
            .ok_or_else(|| PetasosError::ParcelNotFound(id.to_string()))?;
        Ok(f(slot.value_mut()))
    }

    /// Lists parcels currently in `status`.
    #[must_use]
    pub fn list_by_status(&self, status: ProcessingStatus) -> Vec<Parcel> {
        self.parcels
            .iter()
            .filter(|p| p.processing_status == status)
            .map(|p| p.clone())
            .collect()
    }

    /// Lists parcels of one processing step.
    #[must_use]
    pub fn list_by_type(&self, type_id: &Identifier) -> Vec<Parcel> {
        self.collect_indexed(&self.by_type, type_id)
    }

    /// Lists every attempt at one episode.
    #[must_use]
    pub fn list_by_episode(&self, episode_id: &EpisodeId) -> Vec<Parcel> {
        self.collect_indexed(&self.by_episode, episode_id)
    }

    /// Finds the in-progress parcel a processor holds for a unit of work.
    #[must_use]
    pub fn find_active_for_processor(
        &self,
        processor_instance_id: &ProcessorInstanceId,
        uow_instance_id: &Identifier,
    ) -> Option<Parcel> {
        self.list_by_episode(uow_instance_id)
            .into_iter()
            .find(|p| &p.associated_processor_instance_id == processor_instance_id && p.is_active())
    }

    /// Returns the number of parcels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    /// Returns true if no parcels are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    fn collect_indexed(&self, index: &DashMap<Identifier, HashSet<ParcelId>>, key: &Identifier) -> Vec<Parcel> {
        let ids: Vec<ParcelId> = index
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let mut parcels: Vec<Parcel> = ids.iter().filter_map(|id| self.get(id)).collect();
        parcels.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        parcels
    }

    fn unindex(index: &DashMap<Identifier, HashSet<ParcelId>>, key: &Identifier, id: &ParcelId) {
        if let Some(mut ids) = index.get_mut(key) {
            ids.remove(id);
        }
        index.remove_if(key, |_, ids| ids.is_empty());
    }
}
