use serde::Serialize;

/// Semantic bucket a transaction falls into, derived from its calldata selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxCategory {
    Defi,
    Nft,
    Contract,
    Transfer,
    Other,
}

impl TxCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxCategory::Defi => "DEFI",
            TxCategory::Nft => "NFT",
            TxCategory::Contract => "CONTRACT",
            TxCategory::Transfer => "TRANSFER",
            TxCategory::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    pub from: String,
    /// `None` for contract creation.
    pub to: Option<String>,
    pub value_mon: String,
    pub gas_price_gwei: String,
    pub gas_limit: u64,
    pub nonce: u64,
    pub input_data: String,
    pub category: TxCategory,
    pub subtype: String,
    pub is_special: bool,
    pub block_number: u64,
    /// Local arrival time, epoch milliseconds.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub number: u64,
    pub hash: String,
    /// Chain timestamp, epoch milliseconds.
    pub timestamp: u64,
    pub transaction_count: usize,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub network_utilization_pct: f64,
    pub base_fee_per_gas: u64,
    pub block_interval_ms: f64,
    pub transactions: Vec<TransactionRecord>,
}

/// Per-block counters over the six display buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub defi: u64,
    pub nft: u64,
    pub transfer: u64,
    pub contract_call: u64,
    pub contract_deploy: u64,
    pub other: u64,
}

impl CategoryStats {
    pub fn total(&self) -> u64 {
        self.defi
            + self.nft
            + self.transfer
            + self.contract_call
            + self.contract_deploy
            + self.other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Failed,
    /// Orderly local shutdown; never entered through a failure.
    Disconnected,
}

pub fn utilization_pct(gas_used: u64, gas_limit: u64) -> f64 {
    if gas_limit == 0 {
        return 0.0;
    }
    gas_used as f64 / gas_limit as f64 * 100.0
}
