//! Audit trail writer trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info};

use super::AuditEntry;

/// Destination for audit entries.
///
/// `synchronous` tells the writer the caller is waiting on durability; the
/// return value reports whether the entry was accepted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditTrailWriter: Send + Sync {
    /// Writes one entry.
    async fn write_audit_entry(&self, entry: AuditEntry, synchronous: bool) -> bool;
}

/// A writer that accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditTrailWriter;

#[async_trait]
impl AuditTrailWriter for NoOpAuditTrailWriter {
    async fn write_audit_entry(&self, _entry: AuditEntry, _synchronous: bool) -> bool {
        true
    }
}

/// A writer that logs entries through tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAuditTrailWriter;

#[async_trait]
impl AuditTrailWriter for LoggingAuditTrailWriter {
    async fn write_audit_entry(&self, entry: AuditEntry, synchronous: bool) -> bool {
        if synchronous {
            info!(
                entry_id = %entry.entry_id,
                parcel_id = %entry.parcel_id,
                episode_id = %entry.episode_id,
                digest = %entry.digest,
                "Audit entry (edge)"
            );
        } else {
            debug!(
                entry_id = %entry.entry_id,
                parcel_id = %entry.parcel_id,
                episode_id = %entry.episode_id,
                digest = %entry.digest,
                "Audit entry"
            );
        }
        true
    }
}

/// A writer that keeps entries in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingAuditTrailWriter {
    entries: parking_lot::RwLock<Vec<(AuditEntry, bool)>>,
}

impl CollectingAuditTrailWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every entry written so far.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().iter().map(|(e, _)| e.clone()).collect()
    }

    /// Returns how many entries were written synchronously.
    #[must_use]
    pub fn synchronous_count(&self) -> usize {
        self.entries.read().iter().filter(|(_, sync)| *sync).count()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl AuditTrailWriter for CollectingAuditTrailWriter {
    async fn write_audit_entry(&self, entry: AuditEntry, synchronous: bool) -> bool {
        self.entries.write().push((entry, synchronous));
        true
    }
}
