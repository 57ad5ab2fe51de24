//! Configuration for the bus and the backtest pipeline
//!
//! Everything is validated when it is loaded or when the bus is built, so
//! mistakes surface before the first event is published.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{BusError, Result};

/// Upper bound on the history window
pub const MAX_HISTORY_LIMIT: usize = 10_000_000;

// ============================================================================
// Event bus
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Number of recent events kept in memory; 0 disables history
    pub max_history: usize,

    /// Emit per-publish dispatch traces
    pub enable_logging: bool,

    /// Publish an Error event for every handler failure on non-Error events
    pub publish_handler_errors: bool,

    /// Warn about handlers slower than this many milliseconds; 0 = off
    pub slow_handler_warn_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            enable_logging: true,
            publish_handler_errors: false,
            slow_handler_warn_ms: 0,
        }
    }
}

impl BusConfig {
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    pub fn with_error_events(mut self, enabled: bool) -> Self {
        self.publish_handler_errors = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_history > MAX_HISTORY_LIMIT {
            return Err(BusError::config(
                "events.max_history",
                format!("{} exceeds the limit of {}", self.max_history, MAX_HISTORY_LIMIT),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Application
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppSection {
    pub name: String,
    pub version: String,
    pub debug: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "StratsCenter".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionKind {
    /// `rate` is a fraction of the fill cost
    Percentage,
    /// `rate` is a flat amount per fill
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommissionConfig {
    #[serde(rename = "type")]
    pub kind: CommissionKind,
    pub rate: f64,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            kind: CommissionKind::Percentage,
            rate: 0.001,
        }
    }
}

impl CommissionConfig {
    pub fn commission_for(&self, fill_cost: f64) -> f64 {
        match self.kind {
            CommissionKind::Percentage => fill_cost * self.rate,
            CommissionKind::Fixed => self.rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission: CommissionConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            commission: CommissionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyConfig {
    pub name: String,
    pub enabled: bool,
    /// Units per entry order used by the fixed sizer
    pub fixed_quantity: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "simple_price".to_string(),
            enabled: true,
            fixed_quantity: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Full configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub app: AppSection,
    pub events: BusConfig,
    pub backtest: BacktestConfig,
    pub strategy: StrategyConfig,
    pub logging: LoggingConfig,
    pub symbols: Vec<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(text)?;
        config.normalize_symbols()?;
        config.validate()?;
        Ok(config)
    }

    fn normalize_symbols(&mut self) -> Result<()> {
        if self.symbols.is_empty() {
            self.symbols.push("BTCUSDT".to_string());
        }

        for symbol in &mut self.symbols {
            let valid = !symbol.is_empty()
                && symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '/');
            if !valid {
                return Err(BusError::config(
                    "symbols",
                    format!("'{}' must be alphanumeric and may include '/'", symbol),
                ));
            }
            *symbol = symbol.to_uppercase();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.events.validate()?;

        if !(self.backtest.initial_capital > 0.0) {
            return Err(BusError::config("backtest.initial_capital", "must be greater than 0"));
        }
        let rate = self.backtest.commission.rate;
        if !rate.is_finite() || rate < 0.0 {
            return Err(BusError::config("backtest.commission.rate", "must be a non-negative number"));
        }
        if !(self.strategy.fixed_quantity > 0.0) {
            return Err(BusError::config("strategy.fixed_quantity", "must be greater than 0"));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(BusError::config(
                "logging.level",
                format!("unknown level '{}'", self.logging.level),
            ));
        }
        Ok(())
    }
}
