//! Backtest driver wiring the pipeline stages onto one bus

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::events::{BacktestAction, BacktestEvent, Event};
use crate::pipeline::broker::SimulatedBroker;
use crate::pipeline::data::HistoricBarFeed;
use crate::pipeline::order_manager::SimpleOrderManager;
use crate::pipeline::portfolio::{PortfolioSummary, SimplePortfolio};
use crate::pipeline::sizing::FixedQuantitySizer;
use crate::pipeline::strategy::SimplePriceStrategy;
use crate::stats::BusStats;

pub const SIMPLE_PRICE_STRATEGY: &str = "simple_price";

/// Result of a finished backtest
#[derive(Debug, Clone, Serialize)]
pub struct BacktestSummary {
    pub market_events: u64,
    pub failed_deliveries: u64,
    pub portfolio: PortfolioSummary,
    pub bus: BusStats,
}

/// Replays market data through strategy, order manager, broker and
/// portfolio. The stages only talk to each other through the bus.
pub struct BacktestEngine {
    bus: Arc<EventBus>,
    feed: Arc<HistoricBarFeed>,
    portfolio: Arc<SimplePortfolio>,
}

impl BacktestEngine {
    /// Build the bus and register every stage described by `config`
    pub fn from_config(config: &AppConfig, feed: HistoricBarFeed) -> Result<Self> {
        let bus = Arc::new(EventBus::new(config.events.clone()).context("building event bus")?);
        let feed = Arc::new(feed);

        let portfolio = Arc::new(SimplePortfolio::new(
            bus.publisher(),
            feed.clone(),
            config.backtest.initial_capital,
        ));
        bus.register_handler(portfolio.clone())?;

        let broker = SimulatedBroker::new(bus.publisher(), config.backtest.commission.clone(), feed.clone());
        bus.register_handler(Arc::new(broker))?;

        let sizer = FixedQuantitySizer::new(config.strategy.fixed_quantity)?;
        let order_manager = SimpleOrderManager::new(bus.publisher(), portfolio.clone(), Box::new(sizer));
        bus.register_handler(Arc::new(order_manager))?;

        if config.strategy.enabled {
            if config.strategy.name != SIMPLE_PRICE_STRATEGY {
                bail!("unknown strategy '{}'", config.strategy.name);
            }
            let strategy = SimplePriceStrategy::new(
                config.strategy.name.clone(),
                config.symbols.iter().cloned(),
                bus.publisher(),
            );
            bus.register_handler(Arc::new(strategy))?;
        } else {
            warn!("Strategy '{}' is disabled; no signals will be generated", config.strategy.name);
        }

        info!("BacktestEngine initialized\n{}", bus.registry());
        Ok(Self {
            bus,
            feed,
            portfolio,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn portfolio(&self) -> &Arc<SimplePortfolio> {
        &self.portfolio
    }

    /// Run the main backtest loop until the feed is exhausted
    pub fn run(&self) -> BacktestSummary {
        info!("Starting backtest with {} bars", self.feed.remaining());
        self.bus.publish(Event::new(BacktestEvent {
            action: BacktestAction::Started,
            message: format!("{} bars queued", self.feed.remaining()),
        }));

        let mut market_events = 0u64;
        let mut failed_deliveries = 0u64;
        while self.feed.continue_backtest() {
            for event in self.feed.next_market_events() {
                let report = self.bus.publish(event);
                market_events += 1;
                if !report.is_success() {
                    failed_deliveries += 1;
                }
            }
        }

        let portfolio = self.portfolio.summary();
        self.bus.publish(Event::new(BacktestEvent {
            action: BacktestAction::Finished,
            message: format!("final value {:.2}", portfolio.total_value),
        }));

        info!(
            "Backtest finished: {} market events, final value {:.2} (PnL {:.2}, {:.2}%)",
            market_events, portfolio.total_value, portfolio.pnl, portfolio.pnl_pct
        );
        info!("{}", self.bus);

        BacktestSummary {
            market_events,
            failed_deliveries,
            portfolio,
            bus: self.bus.get_stats(),
        }
    }
}
