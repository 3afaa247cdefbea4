use ethers_core::types::{Address, Bytes, H256, U256, U64};
use ethers_core::utils::format_units;
use serde::Deserialize;

use crate::{
    classifier::classify,
    models::{utilization_pct, BlockRecord, TransactionRecord},
};

/// Header object pushed by a `newHeads` subscription.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcHeader {
    pub number: U64,
    pub hash: Option<H256>,
    pub timestamp: Option<U256>,
    pub gas_used: Option<U256>,
    pub gas_limit: Option<U256>,
    pub base_fee_per_gas: Option<U256>,
}

impl RpcHeader {
    /// Hash when present, otherwise the hex block number.
    pub fn identifier(&self) -> String {
        match self.hash {
            Some(hash) => format!("0x{:x}", hash),
            None => format!("0x{:x}", self.number),
        }
    }
}

/// `eth_getBlockByHash` result with full transaction objects.
///
/// Unlike `ethers_core::types::Block`, every field is optional so a partial
/// payload from the node still yields a record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: Option<U64>,
    pub hash: Option<H256>,
    pub timestamp: Option<U256>,
    pub gas_used: Option<U256>,
    pub gas_limit: Option<U256>,
    pub base_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: Option<H256>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub gas_price: Option<U256>,
    pub gas: Option<U256>,
    pub nonce: Option<U256>,
    pub block_number: Option<U64>,
    pub input: Option<Bytes>,
}

fn u256_to_u64_saturating(value: Option<U256>) -> u64 {
    value
        .map(|v| u64::try_from(v).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

fn address_to_lower_hex(addr: Address) -> String {
    format!("0x{:x}", addr)
}

fn scaled(value: U256, decimals: u32) -> f64 {
    format_units(value, decimals)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Wei to native token units.
pub fn wei_to_native(wei: Option<U256>) -> f64 {
    scaled(wei.unwrap_or_default(), 18)
}

/// Wei to Gwei.
pub fn wei_to_gwei(wei: Option<U256>) -> f64 {
    scaled(wei.unwrap_or_default(), 9)
}

pub fn normalize_tx(tx: &RpcTransaction, arrival_ms: u64) -> TransactionRecord {
    let value = wei_to_native(tx.value);
    let gas_price = wei_to_gwei(tx.gas_price);
    let input = match &tx.input {
        Some(input) if !input.is_empty() => input.to_string(),
        _ => "0x".to_string(),
    };
    let classification = classify(&input);

    TransactionRecord {
        hash: tx.hash.map(|h| format!("0x{:x}", h)).unwrap_or_default(),
        from: tx.from.map(address_to_lower_hex).unwrap_or_default(),
        to: tx.to.map(address_to_lower_hex),
        value_mon: format!("{:.6}", value),
        gas_price_gwei: format!("{:.2}", gas_price),
        gas_limit: u256_to_u64_saturating(tx.gas),
        nonce: u256_to_u64_saturating(tx.nonce),
        input_data: input,
        category: classification.category,
        subtype: classification.subtype,
        is_special: value > 1.0 || gas_price > 50.0,
        block_number: tx.block_number.map(|n| n.as_u64()).unwrap_or_default(),
        timestamp: arrival_ms,
    }
}

pub fn normalize_block(block: &RpcBlock, block_interval_ms: f64, arrival_ms: u64) -> BlockRecord {
    let gas_used = u256_to_u64_saturating(block.gas_used);
    let gas_limit = u256_to_u64_saturating(block.gas_limit);
    let transactions: Vec<TransactionRecord> = block
        .transactions
        .iter()
        .filter(|tx| tx.hash.is_some())
        .map(|tx| normalize_tx(tx, arrival_ms))
        .collect();

    BlockRecord {
        number: block.number.map(|n| n.as_u64()).unwrap_or_default(),
        hash: block.hash.map(|h| format!("0x{:x}", h)).unwrap_or_default(),
        timestamp: u256_to_u64_saturating(block.timestamp).saturating_mul(1000),
        transaction_count: transactions.len(),
        gas_used,
        gas_limit,
        network_utilization_pct: utilization_pct(gas_used, gas_limit),
        base_fee_per_gas: u256_to_u64_saturating(block.base_fee_per_gas),
        block_interval_ms,
        transactions,
    }
}

/// Degraded record used when the full block could not be resolved.
pub fn block_from_header(header: &RpcHeader, block_interval_ms: f64) -> BlockRecord {
    let gas_used = u256_to_u64_saturating(header.gas_used);
    let gas_limit = u256_to_u64_saturating(header.gas_limit);

    BlockRecord {
        number: header.number.as_u64(),
        hash: header.hash.map(|h| format!("0x{:x}", h)).unwrap_or_default(),
        timestamp: u256_to_u64_saturating(header.timestamp).saturating_mul(1000),
        transaction_count: 0,
        gas_used,
        gas_limit,
        network_utilization_pct: utilization_pct(gas_used, gas_limit),
        base_fee_per_gas: u256_to_u64_saturating(header.base_fee_per_gas),
        block_interval_ms,
        transactions: Vec::new(),
    }
}
