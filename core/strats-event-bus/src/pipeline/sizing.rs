//! Order sizing

use anyhow::{ensure, Result};
use tracing::{debug, info};

use crate::events::{SignalEvent, SignalType};
use crate::pipeline::portfolio::{PositionBook, POSITION_EPSILON};

/// Decides how many units an order for a signal should carry
pub trait OrderSizer: Send + Sync {
    fn calculate_quantity(&self, signal: &SignalEvent, positions: &dyn PositionBook) -> f64;
}

/// Constant size for entries; exits close the whole position
#[derive(Debug, Clone)]
pub struct FixedQuantitySizer {
    quantity: f64,
}

impl FixedQuantitySizer {
    pub fn new(quantity: f64) -> Result<Self> {
        ensure!(
            quantity.is_finite() && quantity > 0.0,
            "fixed quantity must be positive, got {}",
            quantity
        );
        info!("FixedQuantitySizer initialized with quantity {}", quantity);
        Ok(Self { quantity })
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }
}

impl OrderSizer for FixedQuantitySizer {
    fn calculate_quantity(&self, signal: &SignalEvent, positions: &dyn PositionBook) -> f64 {
        match signal.signal_type {
            SignalType::Long | SignalType::Short => self.quantity,
            SignalType::Exit => {
                let current = positions.position_size(&signal.symbol);
                if current.abs() > POSITION_EPSILON {
                    debug!("Exit for {}: closing {}", signal.symbol, current.abs());
                    current.abs()
                } else {
                    debug!("Exit for {} with no position", signal.symbol);
                    0.0
                }
            }
        }
    }
}
