//! Periodic price and index refresh.
//!
//! Each loop owns a clone of the shared handle it writes to and reports the
//! outcome of every cycle over a channel. A failed fetch leaves the stored
//! values untouched until a later cycle succeeds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use crate::market::IndexBoard;
use crate::portfolio::PortfolioStore;
use crate::quote::QuoteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    Prices,
    Indices,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    Partial,
}

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub kind: RefreshKind,
    pub cycle: u64,
    pub updated: usize,
    pub failed: Vec<String>,
}

impl RefreshReport {
    pub fn network_status(&self) -> NetworkStatus {
        if self.failed.is_empty() {
            NetworkStatus::Connected
        } else if self.updated == 0 {
            NetworkStatus::Disconnected
        } else {
            NetworkStatus::Partial
        }
    }
}

/// Fetches every held symbol once, concurrently, and writes the results
/// into the positions that were in the store when the cycle started.
pub async fn refresh_prices(
    store: &PortfolioStore,
    source: &dyn QuoteSource,
    cycle: u64,
) -> RefreshReport {
    let positions = store.snapshot();

    let mut seen = HashSet::new();
    let symbols: Vec<String> = positions
        .iter()
        .map(|p| p.symbol().to_string())
        .filter(|s| seen.insert(s.clone()))
        .collect();

    let fetches = symbols.iter().map(|symbol| async move {
        let result = source.quote(symbol).await;
        (symbol.clone(), result)
    });

    let mut quotes = HashMap::new();
    let mut failed = Vec::new();
    for (symbol, result) in join_all(fetches).await {
        match result {
            Ok(quote) => {
                quotes.insert(symbol, quote);
            }
            Err(e) => {
                warn!("price refresh #{cycle}: keeping stale data for {symbol}: {e}");
                failed.push(symbol);
            }
        }
    }

    let mut updated = 0;
    for position in &positions {
        if let Some(quote) = quotes.get(position.symbol()) {
            if store.apply_quote(position.id(), quote) {
                updated += 1;
            }
        }
    }
    debug!(
        "price refresh #{cycle}: {updated} updated, {} failed",
        failed.len()
    );

    RefreshReport {
        kind: RefreshKind::Prices,
        cycle,
        updated,
        failed,
    }
}

/// Fetches the four indices independently and overwrites their snapshots.
pub async fn refresh_indices(
    board: &IndexBoard,
    source: &dyn QuoteSource,
    cycle: u64,
) -> RefreshReport {
    let fetches = board
        .symbols()
        .into_iter()
        .map(|symbol| async move { (symbol, source.quote(symbol).await) });

    let mut updated = 0;
    let mut failed = Vec::new();
    for (symbol, result) in join_all(fetches).await {
        match result {
            Ok(quote) => {
                if board.apply_quote(&quote) {
                    updated += 1;
                }
            }
            Err(e) => {
                warn!("index refresh #{cycle}: keeping stale data for {symbol}: {e}");
                failed.push(symbol.to_string());
            }
        }
    }

    RefreshReport {
        kind: RefreshKind::Indices,
        cycle,
        updated,
        failed,
    }
}

/// Refreshes held positions every `period`, starting one period from now.
/// Cycles are skipped while the store is empty.
pub fn spawn_price_refresh(
    store: PortfolioStore,
    source: Arc<dyn QuoteSource>,
    period: Duration,
    sender: mpsc::UnboundedSender<RefreshReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle = 0;
        loop {
            ticker.tick().await;
            if store.is_empty() {
                continue;
            }
            cycle += 1;
            let report = refresh_prices(&store, source.as_ref(), cycle).await;
            if sender.send(report).is_err() {
                break; // Channel closed, exit task
            }
        }
    })
}

/// Refreshes the index board immediately and then every `period`.
pub fn spawn_index_refresh(
    board: IndexBoard,
    source: Arc<dyn QuoteSource>,
    period: Duration,
    sender: mpsc::UnboundedSender<RefreshReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle = 0;
        loop {
            ticker.tick().await;
            cycle += 1;
            let report = refresh_indices(&board, source.as_ref(), cycle).await;
            if sender.send(report).is_err() {
                break;
            }
        }
    })
}
