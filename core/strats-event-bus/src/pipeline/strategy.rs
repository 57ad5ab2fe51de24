//! Signal generation from market data

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::events::{Event, EventPayload, EventTag, MarketEvent, SignalEvent, SignalType};
use crate::handler::EventHandler;
use crate::publisher::Publisher;

/// Goes long on up-bars and exits on down-bars.
///
/// Bars with close == open produce no signal. Market events for symbols
/// outside the configured set are ignored.
pub struct SimplePriceStrategy {
    name: String,
    symbols: BTreeSet<String>,
    publisher: Publisher,
}

impl SimplePriceStrategy {
    pub fn new(
        name: impl Into<String>,
        symbols: impl IntoIterator<Item = impl Into<String>>,
        publisher: Publisher,
    ) -> Self {
        let name = name.into();
        let symbols: BTreeSet<String> = symbols.into_iter().map(Into::into).collect();
        info!("SimplePriceStrategy '{}' trading {:?}", name, symbols);
        Self {
            name,
            symbols,
            publisher,
        }
    }

    pub fn calculate_signal(&self, market: &MarketEvent) -> Option<SignalType> {
        let bar = &market.bar;
        debug!(
            "Strategy '{}': {} open {} close {}",
            self.name, market.symbol, bar.open, bar.close
        );

        if bar.close > bar.open {
            Some(SignalType::Long)
        } else if bar.close < bar.open {
            Some(SignalType::Exit)
        } else {
            None
        }
    }
}

impl EventHandler for SimplePriceStrategy {
    fn accepted_tags(&self) -> BTreeSet<EventTag> {
        BTreeSet::from([EventTag::Market])
    }

    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let EventPayload::Market(market) = event.payload() else {
            return Ok(());
        };
        if !self.symbols.contains(&market.symbol) {
            return Ok(());
        }

        if let Some(signal_type) = self.calculate_signal(market) {
            info!("Strategy '{}': {:?} signal for {}", self.name, signal_type, market.symbol);
            self.publisher.publish(Event::at(
                event.timestamp(),
                SignalEvent {
                    strategy_id: self.name.clone(),
                    symbol: market.symbol.clone(),
                    signal_type,
                },
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
