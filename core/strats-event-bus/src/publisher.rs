//! Publisher handle for pipeline components

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::warn;

use crate::bus::EventBus;
use crate::events::{ErrorEvent, Event};
use crate::report::DeliveryReport;

/// Producer-side handle on an [`EventBus`].
///
/// Holds a weak reference so that handlers registered on the bus can keep
/// a publisher without forming an `Arc` cycle.
#[derive(Clone)]
pub struct Publisher {
    bus: Weak<EventBus>,
}

impl Publisher {
    /// Create new publisher
    pub fn new(bus: &Arc<EventBus>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
        }
    }

    /// Publish event; `None` once the bus has been dropped
    pub fn publish(&self, event: Event) -> Option<DeliveryReport> {
        match self.bus.upgrade() {
            Some(bus) => Some(bus.publish(event)),
            None => {
                warn!("Dropping {} event {}: event bus is gone", event.tag(), event.id());
                None
            }
        }
    }

    /// Report a component failure as an Error event
    pub fn publish_error(
        &self,
        source: impl Into<String>,
        error_kind: impl Into<String>,
        message: impl Into<String>,
        details: BTreeMap<String, String>,
    ) -> Option<DeliveryReport> {
        self.publish(Event::new(ErrorEvent {
            source: source.into(),
            error_kind: error_kind.into(),
            message: message.into(),
            details,
        }))
    }

    pub fn is_connected(&self) -> bool {
        self.bus.strong_count() > 0
    }
}
