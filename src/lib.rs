pub mod api;
pub mod classifier;
pub mod config;
pub mod eth;
pub mod events;
pub mod ingest_stats;
pub mod manager;
pub mod models;
pub mod rpc;
pub mod store;
