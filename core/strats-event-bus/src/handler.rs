//! Handler capability and helpers

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::events::{Event, EventTag};

/// Subscriber that processes events of specific tags.
///
/// Handlers are shared with the bus as [`SharedHandler`] and keep any
/// mutable state behind their own locks; the bus never owns handler state.
pub trait EventHandler: Send + Sync {
    /// Tags this handler accepts. Must be non-empty at registration time.
    fn accepted_tags(&self) -> BTreeSet<EventTag>;

    /// Process one event
    fn handle(&self, event: &Event) -> anyhow::Result<()>;

    /// Name used in logs, reports and statistics
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

pub type SharedHandler = Arc<dyn EventHandler>;

/// Identity of one registration.
///
/// Assigned by the registry when a handler is subscribed and never reused
/// within the process, so statistics keyed by it stay attributed to the
/// right handler after others are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        HandlerId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// True when both handles point at the same handler allocation
pub fn same_handler(a: &SharedHandler, b: &SharedHandler) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Handler built from a closure and a fixed tag set
pub struct FnHandler<F> {
    name: String,
    tags: BTreeSet<EventTag>,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, tags: impl IntoIterator<Item = EventTag>, func: F) -> Self {
        Self {
            name: name.into(),
            tags: tags.into_iter().collect(),
            func,
        }
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn accepted_tags(&self) -> BTreeSet<EventTag> {
        self.tags.clone()
    }

    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.func)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Shorthand for `Arc::new(FnHandler::new(..))`
pub fn fn_handler<F>(
    name: impl Into<String>,
    tags: impl IntoIterator<Item = EventTag>,
    func: F,
) -> SharedHandler
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler::new(name, tags, func))
}
