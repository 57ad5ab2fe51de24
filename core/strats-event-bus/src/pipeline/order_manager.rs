//! Turns signals into orders

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::events::{
    Event, EventPayload, EventTag, OrderDirection, OrderEvent, OrderType, SignalEvent, SignalType,
};
use crate::handler::EventHandler;
use crate::pipeline::portfolio::{PositionBook, POSITION_EPSILON};
use crate::pipeline::sizing::OrderSizer;
use crate::publisher::Publisher;

/// Maps signals to market orders given the current position.
///
/// Long opens from flat, Short opens from flat, Exit closes whatever is
/// open. Reversals (Long while short, Short while long) are not handled.
pub struct SimpleOrderManager {
    publisher: Publisher,
    positions: Arc<dyn PositionBook>,
    sizer: Box<dyn OrderSizer>,
}

impl SimpleOrderManager {
    pub fn new(publisher: Publisher, positions: Arc<dyn PositionBook>, sizer: Box<dyn OrderSizer>) -> Self {
        Self {
            publisher,
            positions,
            sizer,
        }
    }

    fn direction_for(&self, signal: &SignalEvent) -> Option<OrderDirection> {
        let position = self.positions.position_size(&signal.symbol);
        let is_long = position > POSITION_EPSILON;
        let is_short = position < -POSITION_EPSILON;

        match signal.signal_type {
            SignalType::Long if is_long => {
                debug!("Already long {}, no order", signal.symbol);
                None
            }
            SignalType::Long if is_short => {
                warn!("Long signal for {} while short; reversals are not handled", signal.symbol);
                None
            }
            SignalType::Long => Some(OrderDirection::Buy),
            SignalType::Short if is_short => {
                debug!("Already short {}, no order", signal.symbol);
                None
            }
            SignalType::Short if is_long => {
                warn!("Short signal for {} while long; reversals are not handled", signal.symbol);
                None
            }
            SignalType::Short => Some(OrderDirection::Sell),
            SignalType::Exit if is_long => Some(OrderDirection::Sell),
            SignalType::Exit if is_short => Some(OrderDirection::Buy),
            SignalType::Exit => {
                debug!("Exit signal for {} while flat, no order", signal.symbol);
                None
            }
        }
    }
}

impl EventHandler for SimpleOrderManager {
    fn accepted_tags(&self) -> BTreeSet<EventTag> {
        BTreeSet::from([EventTag::Signal])
    }

    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let EventPayload::Signal(signal) = event.payload() else {
            warn!("SimpleOrderManager ignoring {} event", event.tag());
            return Ok(());
        };

        let Some(direction) = self.direction_for(signal) else {
            return Ok(());
        };

        let quantity = self.sizer.calculate_quantity(signal, self.positions.as_ref());
        if quantity <= POSITION_EPSILON {
            debug!("Sized quantity for {} is zero, no order", signal.symbol);
            return Ok(());
        }

        info!("Order: {:?} {} {}", direction, quantity, signal.symbol);
        self.publisher.publish(Event::at(
            event.timestamp(),
            OrderEvent {
                symbol: signal.symbol.clone(),
                order_type: OrderType::Market,
                quantity,
                direction,
                price: None,
            },
        ));
        Ok(())
    }

    fn name(&self) -> &str {
        "SimpleOrderManager"
    }
}
