//! Event type definitions for the backtest pipeline
//!
//! Every event carries a closed [`EventTag`] discriminator, a timestamp and a
//! stage-specific payload. Events are immutable once built: the fields are
//! private and the bus shares them behind `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::BusError;

// ============================================================================
// Tags
// ============================================================================

/// Discriminator identifying an event's kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventTag {
    Market,
    Signal,
    Order,
    Fill,
    Portfolio,
    Backtest,
    Error,
}

impl EventTag {
    pub const ALL: [EventTag; 7] = [
        EventTag::Market,
        EventTag::Signal,
        EventTag::Order,
        EventTag::Fill,
        EventTag::Portfolio,
        EventTag::Backtest,
        EventTag::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventTag::Market => "MARKET",
            EventTag::Signal => "SIGNAL",
            EventTag::Order => "ORDER",
            EventTag::Fill => "FILL",
            EventTag::Portfolio => "PORTFOLIO",
            EventTag::Backtest => "BACKTEST",
            EventTag::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventTag {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BusError::UnknownTag(s.to_string()))
    }
}

// ============================================================================
// Event envelope
// ============================================================================

/// Immutable tagged record flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
}

impl Event {
    /// Build an event stamped with the current wall-clock time
    pub fn new(payload: impl Into<EventPayload>) -> Self {
        Self::at(Utc::now(), payload)
    }

    /// Build an event with an explicit (usually simulated) timestamp
    pub fn at(timestamp: DateTime<Utc>, payload: impl Into<EventPayload>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        // Monotonic ids keep history dumps ordered and avoid the OS RNG
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

        Self {
            id: Uuid::from_u128(seq as u128),
            timestamp,
            payload: payload.into(),
        }
    }

    /// Market event stamped with the bar's own open time
    pub fn market(symbol: impl Into<String>, bar: Bar) -> Self {
        Self::at(
            bar.timestamp,
            MarketEvent {
                symbol: symbol.into(),
                bar,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn tag(&self) -> EventTag {
        self.payload.tag()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Symbol the event refers to, if any
    pub fn symbol(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Market(e) => Some(&e.symbol),
            EventPayload::Signal(e) => Some(&e.symbol),
            EventPayload::Order(e) => Some(&e.symbol),
            EventPayload::Fill(e) => Some(&e.symbol),
            EventPayload::Portfolio(_) | EventPayload::Backtest(_) | EventPayload::Error(_) => None,
        }
    }
}

/// Stage-specific payload, one variant per tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum EventPayload {
    Market(MarketEvent),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(FillEvent),
    Portfolio(PortfolioEvent),
    Backtest(BacktestEvent),
    Error(ErrorEvent),
}

impl EventPayload {
    pub fn tag(&self) -> EventTag {
        match self {
            EventPayload::Market(_) => EventTag::Market,
            EventPayload::Signal(_) => EventTag::Signal,
            EventPayload::Order(_) => EventTag::Order,
            EventPayload::Fill(_) => EventTag::Fill,
            EventPayload::Portfolio(_) => EventTag::Portfolio,
            EventPayload::Backtest(_) => EventTag::Backtest,
            EventPayload::Error(_) => EventTag::Error,
        }
    }
}

macro_rules! impl_into_payload {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for EventPayload {
                fn from(event: $ty) -> Self {
                    EventPayload::$variant(event)
                }
            }
        )*
    };
}

impl_into_payload! {
    Market => MarketEvent,
    Signal => SignalEvent,
    Order => OrderEvent,
    Fill => FillEvent,
    Portfolio => PortfolioEvent,
    Backtest => BacktestEvent,
    Error => ErrorEvent,
}

// ============================================================================
// Market Data Events
// ============================================================================

/// One OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// New market data for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub symbol: String,
    pub bar: Bar,
}

// ============================================================================
// Strategy & Signal Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Long,
    Short,
    Exit,
}

/// Trading signal emitted by a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub strategy_id: String,
    pub symbol: String,
    pub signal_type: SignalType,
}

// ============================================================================
// Execution Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    Buy,
    Sell,
}

impl OrderDirection {
    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> f64 {
        match self {
            OrderDirection::Buy => 1.0,
            OrderDirection::Sell => -1.0,
        }
    }
}

/// Order sent to the execution stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub symbol: String,
    pub order_type: OrderType,
    pub quantity: f64,
    pub direction: OrderDirection,
    pub price: Option<f64>,
}

/// Order executed by a broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub symbol: String,
    pub exchange: String,
    pub quantity: f64,
    pub direction: OrderDirection,
    pub fill_cost: f64,
    pub commission: f64,
}

// ============================================================================
// Portfolio & Control Events
// ============================================================================

/// Valuation snapshot after the portfolio changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioEvent {
    pub cash: f64,
    pub holdings_value: f64,
    pub total_value: f64,
    pub positions: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BacktestAction {
    Started,
    Finished,
    Aborted,
}

/// Backtest lifecycle control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestEvent {
    pub action: BacktestAction,
    pub message: String,
}

/// Failure report from any component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub source: String,
    pub error_kind: String,
    pub message: String,
    pub details: BTreeMap<String, String>,
}
