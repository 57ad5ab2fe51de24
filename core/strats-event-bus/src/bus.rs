//! Core event bus implementation

use std::any::Any;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::BusConfig;
use crate::error::{HandlerError, Result};
use crate::events::{ErrorEvent, Event, EventTag};
use crate::handler::{HandlerId, SharedHandler};
use crate::history::HistoryBuffer;
use crate::publisher::Publisher;
use crate::registry::{HandlerRegistry, Subscription};
use crate::report::{DeliveryReport, HandlerOutcome};
use crate::stats::{BusStats, StatsCollector};

thread_local! {
    /// Depth of Error-event dispatches on this thread
    static ERROR_DISPATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as dispatching an Error event until dropped
struct ErrorDispatchGuard;

impl ErrorDispatchGuard {
    fn enter() -> Self {
        ERROR_DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        ErrorDispatchGuard
    }

    fn active() -> bool {
        ERROR_DISPATCH_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for ErrorDispatchGuard {
    fn drop(&mut self) {
        ERROR_DISPATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Synchronous in-process publish/subscribe dispatcher.
///
/// `publish` runs every matching handler on the caller's thread in
/// registration order, isolates their failures, then records the event in
/// history and statistics. Registry, history and statistics each sit behind
/// their own lock, and no lock is held while a handler runs, so handlers may
/// publish or (un)register re-entrantly.
pub struct EventBus {
    registry: HandlerRegistry,

    /// Recent events for inspection (optional)
    history: HistoryBuffer,

    /// Statistics
    stats: StatsCollector,

    config: BusConfig,
}

impl EventBus {
    /// Create a new event bus, rejecting an invalid configuration
    pub fn new(config: BusConfig) -> Result<Self> {
        config.validate()?;

        info!(
            "Event bus initialized with max history of {} events",
            config.max_history
        );

        Ok(Self {
            registry: HandlerRegistry::new(),
            history: HistoryBuffer::new(config.max_history),
            stats: StatsCollector::new(),
            config,
        })
    }

    /// Create event bus with the given history window and default settings
    pub fn with_history(max_history: usize) -> Result<Self> {
        Self::new(BusConfig::default().with_max_history(max_history))
    }

    /// Weak producer handle for components that publish into this bus
    pub fn publisher(self: &Arc<Self>) -> Publisher {
        Publisher::new(self)
    }

    /// Subscribe `handler`; see [`HandlerRegistry::register_handler`]
    pub fn register_handler(&self, handler: SharedHandler) -> Result<HandlerId> {
        self.registry.register_handler(handler)
    }

    pub fn unregister_handler(&self, handler: &SharedHandler) -> bool {
        self.registry.unregister_handler(handler)
    }

    /// Dispatch `event` to every handler accepting its tag.
    ///
    /// Never fails: handler errors and panics are captured in the returned
    /// report. The event is appended to history exactly once after all
    /// handlers have run.
    pub fn publish(&self, event: Event) -> DeliveryReport {
        self.publish_shared(Arc::new(event))
    }

    pub fn publish_shared(&self, event: Arc<Event>) -> DeliveryReport {
        let tag = event.tag();
        let _error_guard = (tag == EventTag::Error).then(ErrorDispatchGuard::enter);

        // Snapshot: registry changes made by handlers apply to the next publish
        let handlers = self.registry.subscriptions_for(tag);

        if self.config.enable_logging {
            debug!(
                "Publishing {} event {} to {} handlers",
                tag,
                event.id(),
                handlers.len()
            );
        }

        let mut report = DeliveryReport::new(&event, handlers.len());
        for subscription in &handlers {
            report.outcomes.push(self.invoke(subscription, &event));
        }

        self.history.append(event.clone());
        self.stats.record_delivery(&report);

        if self.config.publish_handler_errors && !ErrorDispatchGuard::active() {
            self.publish_failures(&event, &report);
        }

        report
    }

    fn invoke(&self, subscription: &Subscription, event: &Event) -> HandlerOutcome {
        let handler = &subscription.handler;
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event)));
        let elapsed = start.elapsed();

        let failure = |message: String, panicked: bool| HandlerError {
            handler: handler.name().to_string(),
            tag: event.tag(),
            event_id: event.id(),
            message,
            panicked,
        };

        let result = match result {
            Ok(Ok(())) => {
                if self.config.enable_logging {
                    debug!("Handler '{}' processed {} event", handler.name(), event.tag());
                }
                Ok(())
            }
            Ok(Err(err)) => {
                error!(
                    "Error in handler '{}' for {} event: {:#}",
                    handler.name(),
                    event.tag(),
                    err
                );
                Err(failure(format!("{:#}", err), false))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    "Handler '{}' panicked on {} event: {}",
                    handler.name(),
                    event.tag(),
                    message
                );
                Err(failure(message, true))
            }
        };

        self.warn_if_slow(handler, elapsed);

        HandlerOutcome {
            handler_id: subscription.id,
            handler: handler.name().to_string(),
            elapsed,
            result,
        }
    }

    fn warn_if_slow(&self, handler: &SharedHandler, elapsed: Duration) {
        let threshold = self.config.slow_handler_warn_ms;
        if threshold > 0 && elapsed >= Duration::from_millis(threshold) {
            warn!(
                "Handler '{}' took {:?} (threshold {}ms)",
                handler.name(),
                elapsed,
                threshold
            );
        }
    }

    /// Report each handler failure as an Error event
    fn publish_failures(&self, event: &Event, report: &DeliveryReport) {
        for failure in report.failures() {
            let details = BTreeMap::from([
                ("event_id".to_string(), failure.event_id.to_string()),
                ("event_tag".to_string(), failure.tag.to_string()),
                ("panicked".to_string(), failure.panicked.to_string()),
            ]);
            self.publish(Event::at(
                event.timestamp(),
                ErrorEvent {
                    source: failure.handler.clone(),
                    error_kind: "HandlerExecution".to_string(),
                    message: failure.message.clone(),
                    details,
                },
            ));
        }
    }

    /// Snapshot of recorded events, optionally filtered by tag and limited
    /// to the most recent `limit`
    pub fn get_history(&self, tag: Option<EventTag>, limit: Option<usize>) -> Vec<Arc<Event>> {
        self.history.snapshot(tag, limit)
    }

    pub fn clear_history(&self) {
        self.history.clear();
        debug!("Event history cleared");
    }

    /// Get event statistics
    pub fn get_stats(&self) -> BusStats {
        let mut stats = self.stats.snapshot();
        stats.history_size = self.history.len();
        stats.max_history = self.history.capacity();
        stats
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
        debug!("Event bus statistics reset");
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            history: HistoryBuffer::new(BusConfig::default().max_history),
            stats: StatsCollector::new(),
            config: BusConfig::default(),
        }
    }
}

impl fmt::Display for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.get_stats(), f)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        Bar, MarketEvent, OrderDirection, OrderEvent, OrderType, SignalEvent, SignalType,
    };
    use crate::handler::fn_handler;
    use chrono::Utc;
    use parking_lot::Mutex;

    fn market(symbol: &str) -> Event {
        Event::new(MarketEvent {
            symbol: symbol.to_string(),
            bar: Bar {
                timestamp: Utc::now(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 3.0,
            },
        })
    }

    fn signal(symbol: &str) -> Event {
        Event::new(SignalEvent {
            strategy_id: "test".to_string(),
            symbol: symbol.to_string(),
            signal_type: SignalType::Long,
        })
    }

    fn quiet_bus(max_history: usize) -> EventBus {
        EventBus::new(BusConfig::default().with_max_history(max_history).with_logging(false)).unwrap()
    }

    /// Handler that appends its name to a shared call log
    fn recorder(name: &'static str, tags: &[EventTag], log: &Arc<Mutex<Vec<String>>>) -> SharedHandler {
        let log = log.clone();
        fn_handler(name, tags.iter().copied(), move |_| {
            log.lock().push(name.to_string());
            Ok(())
        })
    }

    #[test]
    fn test_history_keeps_most_recent() {
        let bus = quiet_bus(2);
        for symbol in ["A", "B", "C"] {
            bus.publish(market(symbol));
        }

        let symbols: Vec<String> = bus
            .get_history(None, None)
            .iter()
            .filter_map(|e| e.symbol().map(str::to_string))
            .collect();
        assert_eq!(symbols, vec!["B", "C"]);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let bus = quiet_bus(10);
        let h1 = fn_handler("H1", [EventTag::Market], |_| anyhow::bail!("boom"));
        let h2 = fn_handler("H2", [EventTag::Market], |_| Ok(()));
        bus.register_handler(h1).unwrap();
        bus.register_handler(h2).unwrap();

        let report = bus.publish(market("ES"));

        assert_eq!(report.handler_count(), 2);
        assert!(!report.is_success());
        assert!(!report.outcome_for("H1").unwrap().is_success());
        assert!(report.outcome_for("H2").unwrap().is_success());
        assert_eq!(report.failures().next().unwrap().message, "boom");

        let stats = bus.get_stats();
        assert_eq!(stats.failures("H1", EventTag::Market), 1);
        assert_eq!(stats.successes("H2", EventTag::Market), 1);
        assert_eq!(stats.handler_errors, 1);
        assert_eq!(stats.handler_invocations, 2);
        assert_eq!(bus.get_history(None, None).len(), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = quiet_bus(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register_handler(fn_handler("Panics", [EventTag::Order], |_| panic!("bad order")))
            .unwrap();
        bus.register_handler(recorder("After", &[EventTag::Order], &log)).unwrap();

        let report = bus.publish(Event::new(OrderEvent {
            symbol: "ES".to_string(),
            order_type: OrderType::Market,
            quantity: 1.0,
            direction: OrderDirection::Buy,
            price: None,
        }));

        let failure = report.failures().next().unwrap();
        assert!(failure.panicked);
        assert_eq!(failure.message, "bad order");
        assert_eq!(*log.lock(), vec!["After"]);
    }

    #[test]
    fn test_no_subscribers() {
        let bus = quiet_bus(10);
        let report = bus.publish(signal("BTCUSDT"));

        assert!(report.is_empty());
        assert!(report.is_success());
        assert_eq!(bus.get_stats().published(EventTag::Signal), 1);
        assert_eq!(bus.get_history(Some(EventTag::Signal), None).len(), 1);
    }

    #[test]
    fn test_only_matching_tags_invoked() {
        let bus = quiet_bus(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register_handler(recorder("market", &[EventTag::Market], &log)).unwrap();
        bus.register_handler(recorder("signal", &[EventTag::Signal], &log)).unwrap();
        bus.register_handler(recorder("both", &[EventTag::Market, EventTag::Signal], &log))
            .unwrap();

        bus.publish(signal("ES"));

        assert_eq!(*log.lock(), vec!["signal", "both"]);
    }

    #[test]
    fn test_double_registration_invokes_once() {
        let bus = quiet_bus(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder("once", &[EventTag::Market], &log);
        bus.register_handler(handler.clone()).unwrap();
        bus.register_handler(handler).unwrap();

        bus.publish(market("ES"));

        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_registration_during_dispatch_applies_next_publish() {
        let bus = Arc::new(quiet_bus(10));
        let log = Arc::new(Mutex::new(Vec::new()));
        let late = recorder("late", &[EventTag::Market], &log);

        let weak = Arc::downgrade(&bus);
        let late_clone = late.clone();
        let log_clone = log.clone();
        bus.register_handler(fn_handler("registrar", [EventTag::Market], move |_| {
            log_clone.lock().push("registrar".to_string());
            if let Some(bus) = weak.upgrade() {
                bus.register_handler(late_clone.clone())?;
            }
            Ok(())
        }))
        .unwrap();

        let first = bus.publish(market("ES"));
        assert_eq!(first.handler_count(), 1);

        let second = bus.publish(market("ES"));
        assert_eq!(second.handler_count(), 2);
        assert_eq!(*log.lock(), vec!["registrar", "registrar", "late"]);
    }

    #[test]
    fn test_unregister_during_dispatch_applies_next_publish() {
        let bus = Arc::new(quiet_bus(10));
        let log = Arc::new(Mutex::new(Vec::new()));
        let target = recorder("target", &[EventTag::Market], &log);

        let weak = Arc::downgrade(&bus);
        let target_clone = target.clone();
        let log_clone = log.clone();
        bus.register_handler(fn_handler("remover", [EventTag::Market], move |_| {
            log_clone.lock().push("remover".to_string());
            if let Some(bus) = weak.upgrade() {
                bus.unregister_handler(&target_clone);
            }
            Ok(())
        }))
        .unwrap();
        bus.register_handler(target.clone()).unwrap();

        // Dispatch snapshot still includes the handler removed mid-flight
        let first = bus.publish(market("ES"));
        assert_eq!(first.handler_count(), 2);

        let second = bus.publish(market("ES"));
        assert_eq!(second.handler_count(), 1);
        assert_eq!(*log.lock(), vec!["remover", "target", "remover"]);
        assert!(!bus.registry().is_registered(&target));
    }

    #[test]
    fn test_dropped_handlers_keep_separate_stats() {
        let bus = quiet_bus(0);
        let mut ids = Vec::new();

        for i in 0..50 {
            let handler = fn_handler(format!("h{i}"), [EventTag::Market], |_| Ok(()));
            ids.push(bus.register_handler(handler.clone()).unwrap());
            bus.publish(market("ES"));
            assert!(bus.unregister_handler(&handler));
            drop(handler);
        }

        let stats = bus.get_stats();
        assert_eq!(stats.handlers.len(), 50);
        for (i, id) in ids.iter().enumerate() {
            let entry = stats.handler_by_id(*id, EventTag::Market).unwrap();
            assert_eq!(entry.handler, format!("h{i}"));
            assert_eq!(entry.successes, 1);
        }
    }

    #[test]
    fn test_same_name_handlers_tracked_by_id() {
        let bus = quiet_bus(0);
        let ok = bus
            .register_handler(fn_handler("twin", [EventTag::Fill], |_| Ok(())))
            .unwrap();
        let bad = bus
            .register_handler(fn_handler("twin", [EventTag::Fill], |_| anyhow::bail!("nope")))
            .unwrap();

        let report = bus.publish(Event::new(crate::events::FillEvent {
            symbol: "ES".to_string(),
            exchange: "SIM".to_string(),
            quantity: 1.0,
            direction: OrderDirection::Buy,
            fill_cost: 10.0,
            commission: 0.0,
        }));
        assert_eq!(report.outcomes[0].handler_id, ok);
        assert_eq!(report.outcomes[1].handler_id, bad);

        let stats = bus.get_stats();
        assert_eq!(stats.successes_by_id(ok, EventTag::Fill), 1);
        assert_eq!(stats.failures_by_id(ok, EventTag::Fill), 0);
        assert_eq!(stats.failures_by_id(bad, EventTag::Fill), 1);
    }

    #[test]
    fn test_nested_publish_from_handler() {
        let bus = Arc::new(quiet_bus(10));
        let publisher = bus.publisher();
        bus.register_handler(fn_handler("strategy", [EventTag::Market], move |event| {
            publisher.publish(signal(event.symbol().unwrap_or_default()));
            Ok(())
        }))
        .unwrap();

        bus.publish(market("NQ"));

        // Inner publish completes (and is recorded) before the outer one
        let tags: Vec<EventTag> = bus.get_history(None, None).iter().map(|e| e.tag()).collect();
        assert_eq!(tags, vec![EventTag::Signal, EventTag::Market]);
        assert_eq!(bus.get_stats().events_published, 2);
    }

    #[test]
    fn test_error_events_published_for_failures() {
        let bus = EventBus::new(
            BusConfig::default()
                .with_max_history(10)
                .with_logging(false)
                .with_error_events(true),
        )
        .unwrap();
        bus.register_handler(fn_handler("Broker", [EventTag::Market], |_| anyhow::bail!("no price")))
            .unwrap();

        bus.publish(market("ES"));

        let errors = bus.get_history(Some(EventTag::Error), None);
        assert_eq!(errors.len(), 1);
        match errors[0].payload() {
            crate::events::EventPayload::Error(e) => {
                assert_eq!(e.source, "Broker");
                assert_eq!(e.error_kind, "HandlerExecution");
                assert_eq!(e.message, "no price");
                assert_eq!(e.details["event_tag"], "MARKET");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_failing_error_handler_does_not_recurse() {
        let bus = Arc::new(
            EventBus::new(
                BusConfig::default()
                    .with_max_history(100)
                    .with_logging(false)
                    .with_error_events(true),
            )
            .unwrap(),
        );
        bus.register_handler(fn_handler("Flaky", [EventTag::Market], |_| anyhow::bail!("flaky")))
            .unwrap();

        // Error handler that fails and also triggers another failing publish
        let publisher = bus.publisher();
        bus.register_handler(fn_handler("Alerts", [EventTag::Error], move |_| {
            publisher.publish(market("ES"));
            anyhow::bail!("alert sink down")
        }))
        .unwrap();

        bus.publish(market("ES"));

        let stats = bus.get_stats();
        assert_eq!(stats.published(EventTag::Error), 1);
        assert_eq!(stats.failures("Alerts", EventTag::Error), 1);
        assert_eq!(stats.failures("Flaky", EventTag::Market), 2);
    }

    #[test]
    fn test_clear_history_keeps_stats() {
        let bus = quiet_bus(10);
        bus.publish(market("A"));
        bus.publish(market("B"));

        bus.clear_history();

        assert!(bus.get_history(None, None).is_empty());
        assert!(bus.get_history(Some(EventTag::Market), Some(1)).is_empty());
        assert_eq!(bus.get_stats().events_published, 2);
    }

    #[test]
    fn test_history_disabled() {
        let bus = quiet_bus(0);
        bus.publish(market("A"));

        let stats = bus.get_stats();
        assert!(bus.get_history(None, None).is_empty());
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.max_history, 0);
    }

    #[test]
    fn test_unregistered_handler_not_invoked() {
        let bus = quiet_bus(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder("gone", &[EventTag::Fill, EventTag::Market], &log);
        bus.register_handler(handler.clone()).unwrap();

        assert!(bus.unregister_handler(&handler));
        bus.publish(market("ES"));

        assert!(log.lock().is_empty());
        assert!(!bus.unregister_handler(&handler));
    }

    #[test]
    fn test_reset_stats_and_display() {
        let bus = quiet_bus(5);
        bus.publish(market("A"));
        assert_eq!(bus.to_string(), "EventBus(events: 1, handlers: 0, errors: 0, history: 1/5)");

        bus.reset_stats();
        assert_eq!(bus.get_stats().events_published, 0);
        assert_eq!(bus.get_history(None, None).len(), 1);
    }

    #[test]
    fn test_concurrent_publishers() {
        let bus = Arc::new(quiet_bus(50));
        let counter = Arc::new(Mutex::new(0u64));
        let c = counter.clone();
        bus.register_handler(fn_handler("count", [EventTag::Market], move |_| {
            *c.lock() += 1;
            Ok(())
        }))
        .unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let bus = bus.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        bus.publish(market("ES"));
                    }
                });
            }
        });

        let stats = bus.get_stats();
        assert_eq!(stats.events_published, 400);
        assert_eq!(stats.successes("count", EventTag::Market), 400);
        assert_eq!(*counter.lock(), 400);
        assert_eq!(stats.history_size, 50);
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let bus = Arc::new(quiet_bus(0));
        let stable_log = Arc::new(Mutex::new(Vec::new()));
        bus.register_handler(recorder("stable", &[EventTag::Market], &stable_log)).unwrap();
        let churn: Vec<SharedHandler> = (0..4)
            .map(|i| fn_handler(format!("churn{i}"), [EventTag::Market, EventTag::Signal], |_| Ok(())))
            .collect();

        std::thread::scope(|scope| {
            for handler in &churn {
                let bus = bus.clone();
                scope.spawn(move || {
                    for _ in 0..200 {
                        bus.register_handler(handler.clone()).unwrap();
                        bus.unregister_handler(handler);
                    }
                });
            }
            for _ in 0..2 {
                let bus = bus.clone();
                scope.spawn(move || {
                    for _ in 0..200 {
                        bus.publish(market("ES"));
                    }
                });
            }
        });

        let registry = bus.registry();
        for handler in &churn {
            assert!(!registry.is_registered(handler));
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.handler_count(EventTag::Market), 1);
        assert!(!registry.has_handlers(EventTag::Signal));
        assert_eq!(stable_log.lock().len(), 400);
        assert_eq!(bus.get_stats().successes("stable", EventTag::Market), 400);
    }
}
