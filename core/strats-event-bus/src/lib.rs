//! # Strats Event Bus
//!
//! Synchronous, typed publish/subscribe bus for backtest pipelines.
//!
//! ## Features
//!
//! - **Closed tags**: every event carries one [`EventTag`]; handlers declare
//!   the tags they accept and are only ever invoked for those
//! - **Ordered delivery**: handlers run in registration order on the
//!   publisher's thread
//! - **Fault isolation**: a failing or panicking handler is recorded in the
//!   [`DeliveryReport`] and never stops the others
//! - **Bounded history**: the most recent events are kept for inspection
//! - **Statistics**: publishes per tag, successes/failures per handler
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strats_event_bus::{fn_handler, BusConfig, Event, EventBus, EventTag, SignalEvent, SignalType};
//!
//! let bus = Arc::new(EventBus::new(BusConfig::default().with_max_history(100)).unwrap());
//!
//! bus.register_handler(fn_handler("logger", [EventTag::Signal], |event| {
//!     println!("Received: {:?}", event);
//!     Ok(())
//! }))
//! .unwrap();
//!
//! let report = bus.publish(Event::new(SignalEvent {
//!     strategy_id: "demo".to_string(),
//!     symbol: "BTCUSDT".to_string(),
//!     signal_type: SignalType::Long,
//! }));
//!
//! assert!(report.is_success());
//! assert_eq!(bus.get_stats().published(EventTag::Signal), 1);
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod history;
pub mod publisher;
pub mod registry;
pub mod report;
pub mod stats;

// Backtest collaborators
pub mod pipeline;

// Re-exports
pub use bus::EventBus;
pub use config::{AppConfig, BusConfig};
pub use error::{BusError, HandlerError};
pub use events::*;
pub use handler::{fn_handler, same_handler, EventHandler, FnHandler, HandlerId, SharedHandler};
pub use history::HistoryBuffer;
pub use publisher::Publisher;
pub use registry::{HandlerRegistry, Subscription};
pub use report::{DeliveryReport, HandlerOutcome};
pub use stats::{BusStats, HandlerStats, StatsCollector};
