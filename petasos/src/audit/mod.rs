//! Audit trail for parcel registrations.
//!
//! Every registration produces one [`AuditEntry`]. Edge registrations (where
//! work enters or leaves the system) are written synchronously; all others are
//! handed to the writer without waiting for it.

mod writer;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{EpisodeId, Parcel, ParcelId, ProcessorInstanceId};
use crate::errors::PetasosResult;
use crate::utils::{generate_uuid, now_utc, Timestamp};

pub use writer::{
    AuditTrailWriter, CollectingAuditTrailWriter, LoggingAuditTrailWriter, NoOpAuditTrailWriter,
};

#[cfg(test)]
pub use writer::MockAuditTrailWriter;

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A standard registration.
    Registered,
    /// A registration at a system edge.
    EdgeRegistered,
}

/// One audit record, carrying a snapshot of the parcel and its digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id.
    pub entry_id: String,
    /// What happened.
    pub action: AuditAction,
    /// The parcel.
    pub parcel_id: ParcelId,
    /// Its episode.
    pub episode_id: EpisodeId,
    /// The processor that registered it.
    pub processor_instance_id: ProcessorInstanceId,
    /// Snapshot of the parcel at registration.
    pub snapshot: serde_json::Value,
    /// Hex SHA-256 digest of the serialized snapshot.
    pub digest: String,
    /// When the entry was made.
    pub recorded_at: Timestamp,
}

impl AuditEntry {
    /// Builds the entry for a parcel registration.
    pub fn for_registration(parcel: &Parcel, edge: bool) -> PetasosResult<Self> {
        let snapshot = serde_json::to_value(parcel)?;
        let digest = digest_of(&snapshot)?;
        Ok(Self {
            entry_id: generate_uuid(),
            action: if edge {
                AuditAction::EdgeRegistered
            } else {
                AuditAction::Registered
            },
            parcel_id: parcel.instance_id.clone(),
            episode_id: parcel.episode_id.clone(),
            processor_instance_id: parcel.associated_processor_instance_id.clone(),
            snapshot,
            digest,
            recorded_at: now_utc(),
        })
    }

    /// Returns true if the edge flag is set.
    #[must_use]
    pub fn is_edge(&self) -> bool {
        self.action == AuditAction::EdgeRegistered
    }

    /// Returns true if the snapshot still matches its digest.
    #[must_use]
    pub fn verify(&self) -> bool {
        digest_of(&self.snapshot).is_ok_and(|d| d == self.digest)
    }
}

fn digest_of(snapshot: &serde_json::Value) -> PetasosResult<String> {
    let json = serde_json::to_string(snapshot)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Identifier, UnitOfWork};

    fn parcel() -> Parcel {
        let id = |s: &str| Identifier::parse(s).unwrap();
        Parcel::new(id("step.parse"), id("wup.a"), None, UnitOfWork::new(id("uow.lab"), id("lab.1")))
    }

    #[test]
    fn test_entry_carries_parcel_identity() {
        let p = parcel();
        let entry = AuditEntry::for_registration(&p, false).unwrap();
        assert_eq!(entry.parcel_id, p.instance_id);
        assert_eq!(entry.episode_id, p.episode_id);
        assert_eq!(entry.action, AuditAction::Registered);
        assert!(!entry.is_edge());
        assert_eq!(entry.digest.len(), 64);
    }

    #[test]
    fn test_digest_detects_tampering() {
        let mut entry = AuditEntry::for_registration(&parcel(), true).unwrap();
        assert!(entry.is_edge());
        assert!(entry.verify());

        entry.snapshot["processing_status"] = serde_json::json!("finished");
        assert!(!entry.verify());
    }
}
