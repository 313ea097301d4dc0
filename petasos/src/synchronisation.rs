//! Job-card synchronisation: telling a processor whether to run, wait, or
//! give up on its attempt.

use tracing::debug;

use crate::core::{ActivityStatus, JobCard};
use crate::errors::{InvariantViolationError, PetasosResult};
use crate::matrix::{ActivityMatrix, ParcelStatusElement};

const OPERATION: &str = "synchronise_job_card";

/// Reconciles the card's episode and writes the engine's directive into it.
///
/// The focused attempt is told to execute (or that it finished or failed);
/// every other attempt is told to wait. An attempt that ran out of retries
/// gets its abandonment record back and the card is marked for discarding.
pub fn synchronise_job_card(
    matrix: &ActivityMatrix,
    job_card: &mut JobCard,
) -> PetasosResult<ParcelStatusElement> {
    let parcel_id = job_card.require_present_parcel(OPERATION)?.clone();
    let episode_id = match job_card.present_episode_id() {
        Some(episode_id) => Some(episode_id.clone()),
        None => matrix
            .locate(&parcel_id)
            .map(|e| e.episode_id)
            .or_else(|| matrix.abandoned_element(&parcel_id).map(|e| e.episode_id)),
    };

    if let Some(episode_id) = &episode_id {
        matrix.reconcile_episode(episode_id);
    }

    if let Some(tombstone) = matrix.abandoned_element(&parcel_id) {
        debug!(parcel_id = %parcel_id, "Synchronised abandoned parcel");
        job_card.suggest(ActivityStatus::Abandoned);
        job_card.to_be_discarded = true;
        return Ok(tombstone);
    }

    let Some(episode_id) = episode_id.filter(|e| matrix.has_episode(e)) else {
        return Err(InvariantViolationError::new("no status elements for the card's episode")
            .with_parcel(parcel_id.as_str())
            .into());
    };

    let focused = matrix.check_for_existing_cluster_focused_element(&episode_id);
    let element = matrix
        .get_status_element(&parcel_id, &episode_id)
        .ok_or_else(|| {
            InvariantViolationError::new("parcel has no status element in its episode")
                .with_episode(episode_id.as_str())
                .with_parcel(parcel_id.as_str())
        })?;

    if focused.as_ref() == Some(&parcel_id) {
        job_card.suggest(element.suggested_status());
    } else {
        job_card.suggest(ActivityStatus::Waiting);
    }
    debug!(
        parcel_id = %parcel_id,
        episode_id = %episode_id,
        suggested = %job_card.suggested_status,
        "Synchronised job card"
    );
    Ok(element)
}
