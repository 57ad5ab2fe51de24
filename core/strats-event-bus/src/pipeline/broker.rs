//! Simulated order execution for backtests

use anyhow::anyhow;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::CommissionConfig;
use crate::events::{Event, EventPayload, EventTag, FillEvent, OrderType};
use crate::handler::EventHandler;
use crate::pipeline::data::HistoricBarFeed;
use crate::publisher::Publisher;

pub const SIMULATED_EXCHANGE: &str = "SIMULATED";

/// Fills market orders immediately at the close of the current bar.
///
/// Non-market orders are ignored. An order for a symbol with no price yet
/// is a handler failure.
pub struct SimulatedBroker {
    publisher: Publisher,
    commission: CommissionConfig,
    feed: Arc<HistoricBarFeed>,
}

impl SimulatedBroker {
    pub fn new(publisher: Publisher, commission: CommissionConfig, feed: Arc<HistoricBarFeed>) -> Self {
        info!(
            "SimulatedBroker initialized with {:?} commission {}",
            commission.kind, commission.rate
        );
        Self {
            publisher,
            commission,
            feed,
        }
    }
}

impl EventHandler for SimulatedBroker {
    fn accepted_tags(&self) -> BTreeSet<EventTag> {
        BTreeSet::from([EventTag::Order])
    }

    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let EventPayload::Order(order) = event.payload() else {
            warn!("SimulatedBroker ignoring {} event", event.tag());
            return Ok(());
        };

        if order.order_type != OrderType::Market {
            warn!("SimulatedBroker only supports market orders, ignoring {:?}", order);
            return Ok(());
        }

        let fill_price = self
            .feed
            .latest_price(&order.symbol)
            .ok_or_else(|| anyhow!("no market price for {}", order.symbol))?;

        let fill_cost = fill_price * order.quantity;
        let commission = self.commission.commission_for(fill_cost);

        info!(
            "Executed {:?} {} {} at {:.2} (commission {:.2})",
            order.direction, order.quantity, order.symbol, fill_price, commission
        );

        self.publisher.publish(Event::at(
            event.timestamp(),
            FillEvent {
                symbol: order.symbol.clone(),
                exchange: SIMULATED_EXCHANGE.to_string(),
                quantity: order.quantity,
                direction: order.direction,
                fill_cost,
                commission,
            },
        ));
        Ok(())
    }

    fn name(&self) -> &str {
        "SimulatedBroker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::CommissionKind;
    use crate::events::{Bar, OrderDirection, OrderEvent};
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn setup(kind: CommissionKind, rate: f64) -> Arc<EventBus> {
        let bus = Arc::new(EventBus::with_history(50).unwrap());
        let feed = Arc::new(HistoricBarFeed::new([(
            "BTCUSDT",
            vec![Bar {
                timestamp: Utc::now(),
                open: 90.0,
                high: 110.0,
                low: 85.0,
                close: 100.0,
                volume: 5.0,
            }],
        )]));
        feed.next_market_events();
        let broker = SimulatedBroker::new(bus.publisher(), CommissionConfig { kind, rate }, feed);
        bus.register_handler(Arc::new(broker)).unwrap();
        bus
    }

    fn order(symbol: &str, order_type: OrderType) -> Event {
        Event::new(OrderEvent {
            symbol: symbol.to_string(),
            order_type,
            quantity: 2.0,
            direction: OrderDirection::Buy,
            price: None,
        })
    }

    fn fills(bus: &EventBus) -> Vec<FillEvent> {
        bus.get_history(Some(EventTag::Fill), None)
            .iter()
            .filter_map(|e| match e.payload() {
                EventPayload::Fill(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_market_order_fills_at_close() {
        let bus = setup(CommissionKind::Percentage, 0.001);
        let report = bus.publish(order("BTCUSDT", OrderType::Market));
        assert!(report.is_success());

        let fills = fills(&bus);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].exchange, SIMULATED_EXCHANGE);
        assert_relative_eq!(fills[0].fill_cost, 200.0);
        assert_relative_eq!(fills[0].commission, 0.2);
    }

    #[test]
    fn test_fixed_commission() {
        let bus = setup(CommissionKind::Fixed, 3.0);
        bus.publish(order("BTCUSDT", OrderType::Market));
        assert_relative_eq!(fills(&bus)[0].commission, 3.0);
    }

    #[test]
    fn test_limit_orders_ignored() {
        let bus = setup(CommissionKind::Fixed, 0.0);
        let report = bus.publish(order("BTCUSDT", OrderType::Limit));
        assert!(report.is_success());
        assert!(fills(&bus).is_empty());
    }

    #[test]
    fn test_missing_price_is_a_failure() {
        let bus = setup(CommissionKind::Fixed, 0.0);
        let report = bus.publish(order("ETHUSDT", OrderType::Market));

        assert_eq!(report.failure_count(), 1);
        assert!(report.failures().next().unwrap().message.contains("ETHUSDT"));
        assert!(fills(&bus).is_empty());
    }
}
