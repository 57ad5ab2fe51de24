//! Subscription table mapping tags to ordered handler lists

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{BusError, Result};
use crate::events::EventTag;
use crate::handler::{HandlerId, SharedHandler};

/// One handler subscribed under its registration id
#[derive(Clone)]
pub struct Subscription {
    pub id: HandlerId,
    pub handler: SharedHandler,
}

/// Key of the reverse index. Valid while the registry holds the `Arc`.
fn handler_key(handler: &SharedHandler) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

/// Per-tag ordered handler lists.
///
/// Registration order is preserved and registration is idempotent by
/// reference identity. Readers get a cloned snapshot, so mutating the
/// registry never disturbs a dispatch that is already iterating.
///
/// Register, unregister and clear run under one writer lock, so the tag
/// lists and the reverse index always change together.
#[derive(Default)]
pub struct HandlerRegistry {
    /// Subscribers for each event tag, in registration order
    handlers: DashMap<EventTag, Vec<Subscription>>,

    /// Reverse index used by unregister
    handler_tags: DashMap<usize, (HandlerId, BTreeSet<EventTag>)>,

    /// Serializes every mutation of the two maps
    writer: Mutex<()>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to every tag it accepts and return its id.
    ///
    /// Registering a handler that is already subscribed returns the existing
    /// id. Fails with [`BusError::EmptyTagSet`] if the handler accepts nothing.
    pub fn register_handler(&self, handler: SharedHandler) -> Result<HandlerId> {
        let tags = handler.accepted_tags();
        if tags.is_empty() {
            return Err(BusError::EmptyTagSet {
                handler: handler.name().to_string(),
            });
        }

        let _writer = self.writer.lock();
        let key = handler_key(&handler);
        if let Some(existing) = self.handler_tags.get(&key) {
            debug!("Handler '{}' already registered", handler.name());
            return Ok(existing.0);
        }

        let id = HandlerId::next();
        for tag in &tags {
            self.handlers.entry(*tag).or_default().push(Subscription {
                id,
                handler: handler.clone(),
            });
            debug!("Handler '{}' registered for {}", handler.name(), tag);
        }
        self.handler_tags.insert(key, (id, tags.clone()));

        info!(
            "Handler '{}' registered as {} for events: {:?}",
            handler.name(),
            id,
            tags.iter().map(EventTag::as_str).collect::<Vec<_>>()
        );
        Ok(id)
    }

    /// Remove `handler` from every tag it is subscribed to.
    ///
    /// Returns `false` (and does nothing) when the handler was not registered.
    pub fn unregister_handler(&self, handler: &SharedHandler) -> bool {
        let _writer = self.writer.lock();
        let Some((_, (id, tags))) = self.handler_tags.remove(&handler_key(handler)) else {
            warn!("Attempt to unregister unknown handler '{}'", handler.name());
            return false;
        };

        for tag in tags {
            if let Some(mut subscribers) = self.handlers.get_mut(&tag) {
                subscribers.retain(|s| s.id != id);
                debug!("Handler '{}' unregistered from {}", handler.name(), tag);
            }
        }

        info!("Handler '{}' ({}) unregistered", handler.name(), id);
        true
    }

    /// Registration id of `handler`, if it is currently subscribed
    pub fn handler_id(&self, handler: &SharedHandler) -> Option<HandlerId> {
        self.handler_tags.get(&handler_key(handler)).map(|entry| entry.value().0)
    }

    /// Snapshot of the subscriptions for `tag`, in registration order
    pub fn subscriptions_for(&self, tag: EventTag) -> Vec<Subscription> {
        self.handlers
            .get(&tag)
            .map(|subscribers| subscribers.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of the subscribers for `tag`, in registration order
    pub fn handlers_for(&self, tag: EventTag) -> Vec<SharedHandler> {
        self.handlers
            .get(&tag)
            .map(|subscribers| subscribers.iter().map(|s| s.handler.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_handlers(&self, tag: EventTag) -> bool {
        self.handler_count(tag) > 0
    }

    pub fn handler_count(&self, tag: EventTag) -> usize {
        self.handlers.get(&tag).map(|s| s.len()).unwrap_or(0)
    }

    /// Tags with at least one subscriber
    pub fn registered_tags(&self) -> BTreeSet<EventTag> {
        self.handlers
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn is_registered(&self, handler: &SharedHandler) -> bool {
        self.handler_tags.contains_key(&handler_key(handler))
    }

    /// Number of distinct registered handlers
    pub fn len(&self) -> usize {
        self.handler_tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handler_tags.is_empty()
    }

    /// Drop every subscription
    pub fn clear(&self) {
        let _writer = self.writer.lock();
        self.handlers.clear();
        self.handler_tags.clear();
        info!("All event handlers cleared from registry");
    }
}

impl fmt::Display for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerRegistry:")?;
        for tag in EventTag::ALL {
            let subscribers = self.handlers_for(tag);
            if subscribers.is_empty() {
                continue;
            }
            let names: Vec<&str> = subscribers.iter().map(|h| h.name()).collect();
            write!(f, "\n  {}: {:?}", tag, names)?;
        }
        Ok(())
    }
}
