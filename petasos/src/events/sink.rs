//! Parcel event sink trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

use super::ParcelEvent;

/// Trait for sinks that receive parcel lifecycle events.
///
/// The arbitration engine emits from inside its locks, so `try_emit` must
/// never block.
#[async_trait]
pub trait ParcelEventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: ParcelEvent);

    /// Emits an event without blocking. Errors are logged but suppressed.
    fn try_emit(&self, event: ParcelEvent);
}

/// A no-op sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpParcelEventSink;

#[async_trait]
impl ParcelEventSink for NoOpParcelEventSink {
    async fn emit(&self, _event: ParcelEvent) {}

    fn try_emit(&self, _event: ParcelEvent) {}
}

/// A sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingParcelEventSink {
    level: Level,
}

impl Default for LoggingParcelEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingParcelEventSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &ParcelEvent) {
        // Abandonment is always surfaced, whatever the configured level.
        if matches!(event, ParcelEvent::Abandoned { .. }) {
            warn!(
                event_type = event.event_type(),
                parcel_id = %event.parcel_id(),
                ?event,
                "Parcel event: {}", event.event_type()
            );
            return;
        }
        if self.level == Level::DEBUG {
            debug!(
                event_type = event.event_type(),
                parcel_id = %event.parcel_id(),
                ?event,
                "Parcel event: {}", event.event_type()
            );
        } else {
            info!(
                event_type = event.event_type(),
                parcel_id = %event.parcel_id(),
                ?event,
                "Parcel event: {}", event.event_type()
            );
        }
    }
}

#[async_trait]
impl ParcelEventSink for LoggingParcelEventSink {
    async fn emit(&self, event: ParcelEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: ParcelEvent) {
        self.log_event(&event);
    }
}

/// A collecting sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingParcelEventSink {
    events: parking_lot::RwLock<Vec<ParcelEvent>>,
}

impl CollectingParcelEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ParcelEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of one type, e.g. `parcel.abandoned`.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<ParcelEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ParcelEventSink for CollectingParcelEventSink {
    async fn emit(&self, event: ParcelEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: ParcelEvent) {
        self.events.write().push(event);
    }
}
