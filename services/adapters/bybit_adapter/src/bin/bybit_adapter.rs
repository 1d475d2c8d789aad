//! Bybit stream watcher
//!
//! Usage:
//!   bybit_adapter BTCUSDT ETHUSDT --stream book --depth 50
//!   bybit_adapter BTCUSDT --stream ohlcv --interval 5 --config config/client.toml
//!   BYBIT_API_KEY=.. BYBIT_API_SECRET=.. bybit_adapter --stream orders

use anyhow::{Context, Result};
use bybit_adapter::{BybitClient, BybitConfig};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use stream_client::ClientConfig;
use tokio::signal;
use tracing::{error, info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Stream {
    Book,
    Trades,
    Ohlcv,
    Orders,
}

#[derive(Parser, Debug)]
#[command(name = "bybit_adapter")]
#[command(about = "Watch Bybit v5 market data and order streams")]
#[command(version)]
struct Args {
    /// Symbols to watch (ignored by `orders` unless given)
    symbols: Vec<String>,

    /// Stream to watch
    #[arg(short, long, value_enum, default_value = "book")]
    stream: Stream,

    /// Client configuration file (TOML); `STREAM_*` variables otherwise
    #[arg(short, long)]
    config: Option<String>,

    /// Use testnet endpoints
    #[arg(long)]
    testnet: bool,

    /// Order book depth (1, 50, 200 or 500)
    #[arg(long)]
    depth: Option<usize>,

    /// Kline interval
    #[arg(long, default_value = "1")]
    interval: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bybit_adapter=info".parse()?)
                .add_directive("stream_client=info".parse()?),
        )
        .init();

    let client_config = match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading client config from {path}"))?,
        None => ClientConfig::from_env(),
    };
    let mut bybit_config = BybitConfig::from_env();
    bybit_config.testnet |= args.testnet;

    info!(stream = ?args.stream, symbols = ?args.symbols, "Starting Bybit adapter");
    let client = Arc::new(BybitClient::new(bybit_config, client_config)?);

    let symbols: Vec<Option<String>> = match (args.stream, args.symbols.is_empty()) {
        (Stream::Orders, true) => vec![None],
        (_, true) => anyhow::bail!("at least one symbol is required"),
        _ => args.symbols.iter().cloned().map(Some).collect(),
    };

    let mut tasks = Vec::new();
    for symbol in symbols {
        let client = client.clone();
        let interval = args.interval.clone();
        let (stream, depth) = (args.stream, args.depth);
        tasks.push(tokio::spawn(async move {
            watch_loop(&client, stream, symbol.as_deref(), depth, &interval).await
        }));
    }

    info!("Bybit adapter running, press Ctrl+C to stop");
    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    client.close().await;
    for task in tasks {
        task.abort();
    }

    info!("Bybit adapter stopped");
    Ok(())
}

async fn watch_loop(
    client: &BybitClient,
    stream: Stream,
    symbol: Option<&str>,
    depth: Option<usize>,
    interval: &str,
) {
    let label = symbol.unwrap_or("*");
    loop {
        let outcome = match (stream, symbol) {
            (Stream::Book, Some(symbol)) => client.watch_order_book(symbol, depth).await.map(|book| {
                info!(
                    symbol,
                    best_bid = ?book.bids.first(),
                    best_ask = ?book.asks.first(),
                    nonce = ?book.nonce,
                    "Order book"
                );
            }),
            (Stream::Trades, Some(symbol)) => client.watch_trades(symbol).await.map(|trades| {
                for trade in trades {
                    info!(symbol, side = ?trade.side, price = %trade.price, amount = %trade.amount, "Trade");
                }
            }),
            (Stream::Ohlcv, Some(symbol)) => {
                client.watch_ohlcv(symbol, interval).await.map(|candles| {
                    if let Some(last) = candles.last() {
                        info!(symbol, interval, start = last.timestamp, close = %last.close, "Candle");
                    }
                })
            }
            (Stream::Orders, _) => client.watch_orders(symbol).await.map(|orders| {
                for order in orders {
                    info!(id = %order.id, symbol = %order.symbol, status = ?order.status, filled = %order.filled, "Order");
                }
            }),
            (_, None) => return,
        };

        if let Err(e) = outcome {
            if e.is_permanent() {
                error!(symbol = label, error = %e, "Watch failed permanently");
                return;
            }
            warn!(symbol = label, error = %e, "Watch failed, retrying");
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}
