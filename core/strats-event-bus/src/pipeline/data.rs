//! Historic market data: Binance kline CSV loading and bar replay

use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use crate::events::{Bar, Event};

/// Parse one kline row: `openTime,open,high,low,close,volume,...`
/// with `openTime` in Unix milliseconds. Extra columns are ignored.
pub fn parse_kline_line(line: &str) -> Result<Bar> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 6 {
        return Err(anyhow!("expected 6+ columns, got {}", parts.len()));
    }

    let open_time: i64 = parts[0].trim().parse().context("bad openTime")?;
    let timestamp = Utc
        .timestamp_millis_opt(open_time)
        .single()
        .ok_or_else(|| anyhow!("openTime out of range: {}", open_time))?;

    Ok(Bar {
        timestamp,
        open: parts[1].trim().parse().context("bad open")?,
        high: parts[2].trim().parse().context("bad high")?,
        low: parts[3].trim().parse().context("bad low")?,
        close: parts[4].trim().parse().context("bad close")?,
        volume: parts[5].trim().parse().context("bad volume")?,
    })
}

/// Read kline rows, skipping blank lines, `#` comments and a header row
pub fn read_klines<R: BufRead>(reader: R) -> Result<Vec<Bar>> {
    let mut bars = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            debug!("Skipping header line {}: {}", idx + 1, trimmed);
            continue;
        }
        let bar = parse_kline_line(trimmed).with_context(|| format!("line {}", idx + 1))?;
        bars.push(bar);
    }
    Ok(bars)
}

pub fn load_binance_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let bars = read_klines(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))?;
    info!("Loaded {} bars from {}", bars.len(), path.display());
    Ok(bars)
}

/// Replays per-symbol bar series as Market events in timestamp order.
///
/// Shared between the engine (which drives it) and the broker/portfolio
/// (which read the latest prices), hence the interior locks.
pub struct HistoricBarFeed {
    queue: Mutex<VecDeque<(String, Bar)>>,
    latest: RwLock<HashMap<String, Bar>>,
}

impl HistoricBarFeed {
    pub fn new<S: Into<String>>(series: impl IntoIterator<Item = (S, Vec<Bar>)>) -> Self {
        let mut merged: Vec<(String, Bar)> = series
            .into_iter()
            .flat_map(|(symbol, bars)| {
                let symbol = symbol.into();
                bars.into_iter().map(move |bar| (symbol.clone(), bar))
            })
            .collect();

        // Stable: bars with equal timestamps keep their input order
        merged.sort_by_key(|(_, bar)| bar.timestamp);

        Self {
            queue: Mutex::new(merged.into()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    pub fn continue_backtest(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }

    /// Advance to the next timestamp and return one Market event per
    /// symbol that has a bar there
    pub fn next_market_events(&self) -> Vec<Event> {
        let mut queue = self.queue.lock();
        let Some(next_ts) = queue.front().map(|(_, bar)| bar.timestamp) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let mut latest = self.latest.write();
        while queue.front().is_some_and(|(_, bar)| bar.timestamp == next_ts) {
            if let Some((symbol, bar)) = queue.pop_front() {
                latest.insert(symbol.clone(), bar.clone());
                events.push(Event::market(symbol, bar));
            }
        }
        events
    }

    pub fn latest_bar(&self, symbol: &str) -> Option<Bar> {
        self.latest.read().get(symbol).cloned()
    }

    /// Close of the most recent bar seen for `symbol`
    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.latest.read().get(symbol).map(|bar| bar.close)
    }
}
