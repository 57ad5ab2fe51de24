//! Per-publish delivery report returned to producers

use std::time::Duration;
use uuid::Uuid;

use crate::error::HandlerError;
use crate::events::{Event, EventTag};
use crate::handler::HandlerId;

/// Outcome of invoking one handler for one event
#[derive(Debug)]
pub struct HandlerOutcome {
    pub handler_id: HandlerId,
    pub handler: String,
    pub elapsed: Duration,
    pub result: Result<(), HandlerError>,
}

impl HandlerOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&HandlerError> {
        self.result.as_ref().err()
    }
}

/// Result of a single `publish` call.
///
/// Lists every handler that was invoked, in invocation order. An empty
/// report means the event had no subscribers, which is still a success.
#[derive(Debug)]
pub struct DeliveryReport {
    pub event_id: Uuid,
    pub tag: EventTag,
    pub outcomes: Vec<HandlerOutcome>,
}

impl DeliveryReport {
    pub(crate) fn new(event: &Event, capacity: usize) -> Self {
        Self {
            event_id: event.id(),
            tag: event.tag(),
            outcomes: Vec::with_capacity(capacity),
        }
    }

    /// True when no handler failed (including the zero-subscriber case)
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(HandlerOutcome::is_success)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn handler_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn successes(&self) -> impl Iterator<Item = &HandlerOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &HandlerError> {
        self.outcomes.iter().filter_map(HandlerOutcome::error)
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// First outcome recorded for the handler called `name`
    pub fn outcome_for(&self, name: &str) -> Option<&HandlerOutcome> {
        self.outcomes.iter().find(|o| o.handler == name)
    }

    /// Total time spent inside handlers
    pub fn elapsed(&self) -> Duration {
        self.outcomes.iter().map(|o| o.elapsed).sum()
    }
}
