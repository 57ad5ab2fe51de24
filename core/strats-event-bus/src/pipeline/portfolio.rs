//! Position and cash bookkeeping driven by Fill events

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{Event, EventPayload, EventTag, FillEvent, OrderDirection, PortfolioEvent};
use crate::handler::EventHandler;
use crate::pipeline::data::HistoricBarFeed;
use crate::publisher::Publisher;

/// Positions smaller than this are treated as flat
pub const POSITION_EPSILON: f64 = 1e-8;

/// Read access to current positions, used by sizing and order management
pub trait PositionBook: Send + Sync {
    /// Signed position: positive long, negative short
    fn position_size(&self, symbol: &str) -> f64;

    fn current_cash(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub initial_capital: f64,
    pub cash: f64,
    pub holdings_value: f64,
    pub total_value: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub positions: BTreeMap<String, f64>,
}

#[derive(Debug)]
struct PortfolioState {
    cash: f64,
    positions: BTreeMap<String, f64>,
}

/// Backtest portfolio: applies fills and publishes valuation snapshots
pub struct SimplePortfolio {
    publisher: Publisher,
    feed: Arc<HistoricBarFeed>,
    initial_capital: f64,
    state: Mutex<PortfolioState>,
}

impl SimplePortfolio {
    pub fn new(publisher: Publisher, feed: Arc<HistoricBarFeed>, initial_capital: f64) -> Self {
        info!("SimplePortfolio initialized with capital {:.2}", initial_capital);
        Self {
            publisher,
            feed,
            initial_capital,
            state: Mutex::new(PortfolioState {
                cash: initial_capital,
                positions: BTreeMap::new(),
            }),
        }
    }

    fn apply_fill(&self, fill: &FillEvent) {
        let mut state = self.state.lock();

        let position = state.positions.entry(fill.symbol.clone()).or_insert(0.0);
        *position += fill.direction.sign() * fill.quantity;
        // Round away float noise from repeated partial closes
        *position = (*position * 1e8).round() / 1e8;

        match fill.direction {
            OrderDirection::Buy => state.cash -= fill.fill_cost + fill.commission,
            OrderDirection::Sell => state.cash += fill.fill_cost - fill.commission,
        }

        info!(
            "Portfolio update ({:?}): {} qty {} cost {:.2} commission {:.2}",
            fill.direction, fill.symbol, fill.quantity, fill.fill_cost, fill.commission
        );
    }

    /// Market value of open positions at the latest known prices
    fn holdings_value(&self, positions: &BTreeMap<String, f64>) -> f64 {
        positions
            .iter()
            .filter(|(_, qty)| qty.abs() > POSITION_EPSILON)
            .map(|(symbol, qty)| {
                let price = self.feed.latest_price(symbol).unwrap_or_else(|| {
                    warn!("No price for {}, valuing position at 0", symbol);
                    0.0
                });
                qty * price
            })
            .sum()
    }

    pub fn snapshot(&self) -> PortfolioEvent {
        let state = self.state.lock();
        let holdings_value = self.holdings_value(&state.positions);
        PortfolioEvent {
            cash: state.cash,
            holdings_value,
            total_value: state.cash + holdings_value,
            positions: state.positions.clone(),
        }
    }

    pub fn summary(&self) -> PortfolioSummary {
        let snapshot = self.snapshot();
        let pnl = snapshot.total_value - self.initial_capital;
        PortfolioSummary {
            initial_capital: self.initial_capital,
            cash: snapshot.cash,
            holdings_value: snapshot.holdings_value,
            total_value: snapshot.total_value,
            pnl,
            pnl_pct: pnl / self.initial_capital * 100.0,
            positions: snapshot.positions,
        }
    }
}

impl PositionBook for SimplePortfolio {
    fn position_size(&self, symbol: &str) -> f64 {
        self.state.lock().positions.get(symbol).copied().unwrap_or(0.0)
    }

    fn current_cash(&self) -> f64 {
        self.state.lock().cash
    }
}

impl EventHandler for SimplePortfolio {
    fn accepted_tags(&self) -> BTreeSet<EventTag> {
        BTreeSet::from([EventTag::Fill])
    }

    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let EventPayload::Fill(fill) = event.payload() else {
            warn!("SimplePortfolio ignoring {} event", event.tag());
            return Ok(());
        };

        self.apply_fill(fill);
        self.publisher.publish(Event::at(event.timestamp(), self.snapshot()));
        Ok(())
    }

    fn name(&self) -> &str {
        "SimplePortfolio"
    }
}
