//! Delivery statistics

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use crate::events::EventTag;
use crate::handler::HandlerId;
use crate::report::DeliveryReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Counters for one (handler, tag) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerStats {
    pub handler_id: HandlerId,
    pub handler: String,
    pub tag: EventTag,
    pub successes: u64,
    pub failures: u64,
    pub total_time: Duration,
}

/// Read-only copy of the bus counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusStats {
    pub events_published: u64,
    pub handler_invocations: u64,
    pub handler_errors: u64,
    pub published_by_tag: BTreeMap<EventTag, u64>,
    /// In the order each (handler, tag) pair was first recorded
    pub handlers: Vec<HandlerStats>,
    pub history_size: usize,
    pub max_history: usize,
}

impl BusStats {
    pub fn published(&self, tag: EventTag) -> u64 {
        self.published_by_tag.get(&tag).copied().unwrap_or(0)
    }

    /// First entry recorded under `name`; see [`BusStats::handler_by_id`]
    /// when several handlers share a name
    pub fn handler(&self, name: &str, tag: EventTag) -> Option<&HandlerStats> {
        self.handlers.iter().find(|h| h.handler == name && h.tag == tag)
    }

    pub fn successes(&self, name: &str, tag: EventTag) -> u64 {
        self.handler(name, tag).map_or(0, |h| h.successes)
    }

    pub fn failures(&self, name: &str, tag: EventTag) -> u64 {
        self.handler(name, tag).map_or(0, |h| h.failures)
    }

    pub fn handler_by_id(&self, id: HandlerId, tag: EventTag) -> Option<&HandlerStats> {
        self.handlers.iter().find(|h| h.handler_id == id && h.tag == tag)
    }

    pub fn successes_by_id(&self, id: HandlerId, tag: EventTag) -> u64 {
        self.handler_by_id(id, tag).map_or(0, |h| h.successes)
    }

    pub fn failures_by_id(&self, id: HandlerId, tag: EventTag) -> u64 {
        self.handler_by_id(id, tag).map_or(0, |h| h.failures)
    }
}

impl fmt::Display for BusStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventBus(events: {}, handlers: {}, errors: {}, history: {}/{})",
            self.events_published,
            self.handler_invocations,
            self.handler_errors,
            self.history_size,
            self.max_history
        )
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    handler: String,
    successes: u64,
    failures: u64,
    total_time: Duration,
}

#[derive(Debug, Default)]
struct StatsInner {
    events_published: u64,
    handler_invocations: u64,
    handler_errors: u64,
    published_by_tag: BTreeMap<EventTag, u64>,
    handlers: HashMap<(HandlerId, EventTag), Entry>,
    next_seq: u64,
}

impl StatsInner {
    fn record(
        &mut self,
        handler_id: HandlerId,
        handler: &str,
        tag: EventTag,
        outcome: Outcome,
        elapsed: Duration,
    ) {
        let next_seq = &mut self.next_seq;
        let entry = self.handlers.entry((handler_id, tag)).or_insert_with(|| {
            *next_seq += 1;
            Entry {
                seq: *next_seq,
                handler: handler.to_string(),
                successes: 0,
                failures: 0,
                total_time: Duration::ZERO,
            }
        });

        match outcome {
            Outcome::Success => entry.successes += 1,
            Outcome::Failure => {
                entry.failures += 1;
                self.handler_errors += 1;
            }
        }
        entry.total_time += elapsed;
        self.handler_invocations += 1;
    }

    fn record_publish(&mut self, tag: EventTag) {
        self.events_published += 1;
        *self.published_by_tag.entry(tag).or_insert(0) += 1;
    }
}

/// Raw counters of publishes and handler outcomes.
///
/// A single lock guards all counters so that a whole delivery is
/// recorded atomically.
#[derive(Default)]
pub struct StatsCollector {
    inner: Mutex<StatsInner>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one handler invocation
    pub fn record(
        &self,
        handler_id: HandlerId,
        handler: &str,
        tag: EventTag,
        outcome: Outcome,
        elapsed: Duration,
    ) {
        self.inner.lock().record(handler_id, handler, tag, outcome, elapsed);
    }

    /// Count one publish of `tag`
    pub fn record_publish(&self, tag: EventTag) {
        self.inner.lock().record_publish(tag);
    }

    /// Record every outcome of a delivery plus its publish in one step
    pub fn record_delivery(&self, report: &DeliveryReport) {
        let mut inner = self.inner.lock();
        for outcome in &report.outcomes {
            let result = if outcome.is_success() {
                Outcome::Success
            } else {
                Outcome::Failure
            };
            inner.record(outcome.handler_id, &outcome.handler, report.tag, result, outcome.elapsed);
        }
        inner.record_publish(report.tag);
    }

    pub fn snapshot(&self) -> BusStats {
        let inner = self.inner.lock();

        let mut handlers: Vec<(u64, HandlerStats)> = inner
            .handlers
            .iter()
            .map(|((id, tag), entry)| {
                (
                    entry.seq,
                    HandlerStats {
                        handler_id: *id,
                        handler: entry.handler.clone(),
                        tag: *tag,
                        successes: entry.successes,
                        failures: entry.failures,
                        total_time: entry.total_time,
                    },
                )
            })
            .collect();
        handlers.sort_by_key(|(seq, _)| *seq);

        BusStats {
            events_published: inner.events_published,
            handler_invocations: inner.handler_invocations,
            handler_errors: inner.handler_errors,
            published_by_tag: inner.published_by_tag.clone(),
            handlers: handlers.into_iter().map(|(_, h)| h).collect(),
            history_size: 0,
            max_history: 0,
        }
    }

    pub fn reset(&self) {
        *self.inner.lock() = StatsInner::default();
    }
}
