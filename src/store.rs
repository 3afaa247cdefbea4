use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    classifier::category_stats,
    events::{EventKind, ListenerId, ManagerEvent},
    manager::{now_ms, ConnectionManager},
    models::{BlockRecord, CategoryStats, ConnectionState, TransactionRecord},
};

pub const HISTORY_CAPACITY: usize = 1000;
pub const TPS_SAMPLE_WINDOW_MS: u64 = 10_000;
pub const TPS_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const HASH_DISPLAY_LEN: usize = 16;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// 10-second sliding-window figure, refreshed by the ticker.
    pub current_tps: f64,
    pub total_transactions: u64,
    pub block_transactions: usize,
    pub gas_price_gwei: f64,
    pub network_hash: String,
    pub category_stats: CategoryStats,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            current_tps: 0.0,
            total_transactions: 0,
            block_transactions: 0,
            gas_price_gwei: 0.0,
            network_hash: "0x...".to_string(),
            category_stats: CategoryStats::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlock {
    pub block: BlockRecord,
    pub category_stats: CategoryStats,
    /// Raw transaction count of the block.
    pub tps: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub status: ConnectionState,
    pub is_connected: bool,
    pub stats: Stats,
    pub history_len: usize,
}

struct StoreState {
    status: ConnectionState,
    is_connected: bool,
    latest_block: Option<LatestBlock>,
    transactions: VecDeque<Arc<TransactionRecord>>,
    timestamps: VecDeque<u64>,
    stats: Stats,
}

/// Canonical in-memory view folded from manager events.
pub struct AppStore {
    state: Mutex<StoreState>,
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_display(hash: &str) -> Option<String> {
    if hash.is_empty() {
        return None;
    }
    let prefix: String = hash.chars().take(HASH_DISPLAY_LEN).collect();
    Some(format!("{prefix}..."))
}

impl AppStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                status: ConnectionState::Connecting,
                is_connected: false,
                latest_block: None,
                transactions: VecDeque::with_capacity(HISTORY_CAPACITY),
                timestamps: VecDeque::with_capacity(HISTORY_CAPACITY),
                stats: Stats::default(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers the store on every manager event.
    pub fn attach(self: &Arc<Self>, manager: &ConnectionManager) -> Vec<(EventKind, ListenerId)> {
        [
            EventKind::NewBlock,
            EventKind::NewTransaction,
            EventKind::ConnectionFailed,
        ]
        .into_iter()
        .map(|kind| {
            let store = Arc::clone(self);
            let id = manager.on(kind, move |event: &ManagerEvent| store.apply_event(event));
            (kind, id)
        })
        .collect()
    }

    pub fn detach(&self, manager: &ConnectionManager, ids: &[(EventKind, ListenerId)]) {
        for (kind, id) in ids {
            manager.off(*kind, *id);
        }
    }

    pub fn apply_event(&self, event: &ManagerEvent) {
        match event {
            ManagerEvent::NewBlock(block) => self.apply_block(block),
            ManagerEvent::NewTransaction(tx) => self.apply_transaction(Arc::clone(tx), now_ms()),
            ManagerEvent::ConnectionFailed => self.apply_connection_failed(),
        }
    }

    pub fn apply_block(&self, block: &BlockRecord) {
        let categories = category_stats(block.transactions.iter().map(|tx| tx.input_data.as_str()));

        let mut state = self.state();
        state.status = ConnectionState::Connected;
        state.is_connected = true;
        state.stats.block_transactions = block.transaction_count;
        state.stats.category_stats = categories;
        if let Some(display) = hash_display(&block.hash) {
            state.stats.network_hash = display;
        }
        if block.base_fee_per_gas > 0 {
            state.stats.gas_price_gwei = (block.base_fee_per_gas as f64 / 1e9).round();
        }
        state.latest_block = Some(LatestBlock {
            block: block.clone(),
            category_stats: categories,
            tps: block.transaction_count,
        });
        debug!(number = block.number, "store applied block");
    }

    pub fn apply_transaction(&self, tx: Arc<TransactionRecord>, now_ms: u64) {
        let gas_price = tx.gas_price_gwei.parse::<f64>().unwrap_or(0.0);

        let mut state = self.state();
        state.stats.total_transactions += 1;
        if gas_price > 0.0 {
            state.stats.gas_price_gwei = gas_price;
        }
        if let Some(display) = hash_display(&tx.hash) {
            state.stats.network_hash = display;
        }

        state.transactions.push_front(tx);
        state.transactions.truncate(HISTORY_CAPACITY);
        state.timestamps.push_front(now_ms);
        state.timestamps.truncate(HISTORY_CAPACITY);
    }

    /// Real data only: the failure is shown as such, nothing is substituted.
    pub fn apply_connection_failed(&self) {
        let mut state = self.state();
        state.status = ConnectionState::Failed;
        state.is_connected = false;
        info!("store marked connection failed");
    }

    pub fn set_status(&self, status: ConnectionState) {
        let mut state = self.state();
        state.status = status;
        state.is_connected = status == ConnectionState::Connected;
    }

    /// Recomputes the 10-second TPS figure (`count / 10`).
    pub fn refresh_tps(&self, now_ms: u64) -> f64 {
        let cutoff = now_ms.saturating_sub(TPS_SAMPLE_WINDOW_MS);
        let mut state = self.state();
        let recent = state.timestamps.iter().filter(|&&ts| ts > cutoff).count();
        let tps = recent as f64 / (TPS_SAMPLE_WINDOW_MS as f64 / 1000.0);
        state.stats.current_tps = tps;
        tps
    }

    /// Refreshes the display TPS every second while connected.
    pub fn spawn_tps_ticker(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TPS_REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                if self.is_connected() {
                    self.refresh_tps(now_ms());
                }
            }
        })
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected
    }

    pub fn status(&self) -> ConnectionState {
        self.state().status
    }

    pub fn stats(&self) -> Stats {
        self.state().stats.clone()
    }

    pub fn latest_block(&self) -> Option<LatestBlock> {
        self.state().latest_block.clone()
    }

    /// Newest first.
    pub fn recent_transactions(&self, limit: usize) -> Vec<TransactionRecord> {
        self.state()
            .transactions
            .iter()
            .take(limit)
            .map(|tx| TransactionRecord::clone(tx))
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.state().transactions.len()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state();
        StoreSnapshot {
            status: state.status,
            is_connected: state.is_connected,
            stats: state.stats.clone(),
            history_len: state.transactions.len(),
        }
    }
}
