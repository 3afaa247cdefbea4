use std::collections::VecDeque;

use serde::Serialize;

use crate::models::ConnectionState;

pub const TPS_WINDOW_MS: u64 = 1000;
pub const TPS_DECAY: f64 = 0.9;
pub const BLOCK_INTERVAL_SAMPLES: f64 = 10.0;
pub const INITIAL_BLOCK_INTERVAL_MS: f64 = 500.0;

/// `(avg * (n - 1) + sample) / n`
pub fn moving_average(current: f64, sample: f64, window: f64) -> f64 {
    (current * (window - 1.0) + sample) / window
}

/// Rolling ingestion counters owned by the connection manager.
#[derive(Debug, Clone)]
pub struct RollingStats {
    blocks_received: u64,
    transactions_received: u64,
    dropped_transactions: u64,
    degraded_blocks: u64,
    last_block_at_ms: u64,
    avg_block_interval_ms: f64,
    current_tps: f64,
    window: VecDeque<u64>,
}

impl RollingStats {
    pub fn new(now_ms: u64) -> Self {
        Self {
            blocks_received: 0,
            transactions_received: 0,
            dropped_transactions: 0,
            degraded_blocks: 0,
            last_block_at_ms: now_ms,
            avg_block_interval_ms: INITIAL_BLOCK_INTERVAL_MS,
            current_tps: 0.0,
            window: VecDeque::new(),
        }
    }

    /// Records a header arrival and returns the interval since the previous one.
    pub fn record_block(&mut self, now_ms: u64) -> f64 {
        let interval = now_ms.saturating_sub(self.last_block_at_ms) as f64;
        self.blocks_received += 1;
        self.last_block_at_ms = now_ms;
        self.avg_block_interval_ms =
            moving_average(self.avg_block_interval_ms, interval, BLOCK_INTERVAL_SAMPLES);
        interval
    }

    pub fn record_transaction(&mut self, now_ms: u64) -> f64 {
        self.transactions_received += 1;
        self.update_tps(now_ms)
    }

    /// Appends an arrival to the 1-second window and returns the smoothed
    /// estimate, which rises immediately but falls by at most 10% per update.
    pub fn update_tps(&mut self, now_ms: u64) -> f64 {
        self.window.push_back(now_ms);
        self.refresh_tps(now_ms)
    }

    /// Prunes the window and re-evaluates the estimate without recording an arrival.
    pub fn refresh_tps(&mut self, now_ms: u64) -> f64 {
        let cutoff = now_ms.saturating_sub(TPS_WINDOW_MS);
        while self.window.front().is_some_and(|&ts| ts <= cutoff) {
            self.window.pop_front();
        }
        let raw = self.window.len() as f64;
        self.current_tps = raw.max(self.current_tps * TPS_DECAY);
        self.current_tps
    }

    pub fn inc_dropped_transactions(&mut self) {
        self.dropped_transactions += 1;
    }

    pub fn inc_degraded_blocks(&mut self) {
        self.degraded_blocks += 1;
    }

    #[cfg(test)]
    fn current_tps(&self) -> f64 {
        self.current_tps
    }

    #[cfg(test)]
    fn avg_block_interval_ms(&self) -> f64 {
        self.avg_block_interval_ms
    }

    #[cfg(test)]
    fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn snapshot(
        &self,
        state: ConnectionState,
        is_connected: bool,
        reconnect_attempts: u32,
    ) -> IngestSnapshot {
        IngestSnapshot {
            blocks_received: self.blocks_received,
            transactions_received: self.transactions_received,
            dropped_transactions: self.dropped_transactions,
            degraded_blocks: self.degraded_blocks,
            last_block_at_ms: self.last_block_at_ms,
            avg_block_interval_ms: self.avg_block_interval_ms,
            current_tps: self.current_tps,
            state,
            is_connected,
            reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSnapshot {
    pub blocks_received: u64,
    pub transactions_received: u64,
    pub dropped_transactions: u64,
    pub degraded_blocks: u64,
    pub last_block_at_ms: u64,
    pub avg_block_interval_ms: f64,
    pub current_tps: f64,
    pub state: ConnectionState,
    pub is_connected: bool,
    pub reconnect_attempts: u32,
}
