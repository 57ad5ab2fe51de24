//! Backtest pipeline stages
//!
//! Each stage is an [`EventHandler`](crate::handler::EventHandler) that
//! consumes one event kind and publishes the next through a
//! [`Publisher`](crate::publisher::Publisher):
//!
//! Market → strategy → Signal → order manager → Order → broker → Fill →
//! portfolio → Portfolio

pub mod broker;
pub mod data;
pub mod engine;
pub mod order_manager;
pub mod portfolio;
pub mod sizing;
pub mod strategy;

pub use broker::SimulatedBroker;
pub use data::{load_binance_csv, HistoricBarFeed};
pub use engine::{BacktestEngine, BacktestSummary};
pub use order_manager::SimpleOrderManager;
pub use portfolio::{PortfolioSummary, PositionBook, SimplePortfolio};
pub use sizing::{FixedQuantitySizer, OrderSizer};
pub use strategy::SimplePriceStrategy;
