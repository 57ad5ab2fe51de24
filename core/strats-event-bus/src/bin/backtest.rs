//! Run a backtest over Binance kline CSV files

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use strats_event_bus::pipeline::{load_binance_csv, BacktestEngine, HistoricBarFeed};
use strats_event_bus::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "strats-backtest", about = "Event-driven backtest over kline CSV data")]
struct Args {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data files as SYMBOL=path.csv, or path.csv named like BTCUSDT-1h-2024-01.csv
    #[arg(short, long = "data", required = true)]
    data: Vec<String>,
}

/// Split `SYMBOL=path`, falling back to the file name prefix for the symbol
fn parse_data_arg(arg: &str) -> Result<(String, PathBuf)> {
    if let Some((symbol, path)) = arg.split_once('=') {
        return Ok((symbol.trim().to_uppercase(), PathBuf::from(path.trim())));
    }

    let path = PathBuf::from(arg);
    let symbol = Path::new(arg)
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('-').next())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("cannot infer symbol from '{}'", arg))?
        .to_uppercase();
    Ok((symbol, path))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::from_toml_str("")?,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("{} v{}", config.app.name, config.app.version);

    let mut series = Vec::with_capacity(args.data.len());
    for arg in &args.data {
        let (symbol, path) = parse_data_arg(arg)?;
        let bars = load_binance_csv(&path)?;
        series.push((symbol, bars));
    }

    let engine = BacktestEngine::from_config(&config, HistoricBarFeed::new(series))?;
    let summary = engine.run();

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
