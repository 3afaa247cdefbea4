mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use monad_galaxy::{
    api::{self, AppState},
    config::Config,
    events::{EventKind, ListenerId, ManagerEvent},
    manager::{ConnectionManager, NEW_PENDING_TRANSACTIONS},
    rpc::RpcGateway,
    store::AppStore,
};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::Serve { addr } => {
            let bind = addr.unwrap_or_else(|| config.http_bind_addr.clone());
            let (manager, store, listeners) = build(config)?;
            start(&manager).await;
            let ticker = Arc::clone(&store).spawn_tps_ticker();

            let state = AppState {
                store: Arc::clone(&store),
                manager: manager.clone(),
            };
            tokio::select! {
                result = api::run_http_server(&bind, state) => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("ctrl-c received, shutting down"),
            }
            ticker.abort();
            store.detach(&manager, &listeners);
            manager.disconnect();
        }
        Commands::Probe => {
            let gateway = RpcGateway::new(&config.rpc_url)?;
            match gateway.block_number().await {
                Some(latest) => println!("{} reachable, latest block {}", config.rpc_url, latest),
                None => anyhow::bail!("{} is unreachable", config.rpc_url),
            }
        }
        Commands::Watch {
            duration_secs,
            pending,
        } => {
            let (manager, store, listeners) = build(config)?;
            log_events(&manager);
            if pending {
                manager.subscribe(NEW_PENDING_TRANSACTIONS);
            }
            start(&manager).await;
            tracing::info!(topics = ?manager.requested_topics(), duration_secs, "watching");
            let ticker = Arc::clone(&store).spawn_tps_ticker();

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("ctrl-c received, stopping watch"),
            }
            ticker.abort();
            store.detach(&manager, &listeners);
            manager.disconnect();

            println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
            println!("{}", serde_json::to_string_pretty(&manager.stats())?);
        }
    }

    Ok(())
}

type Wiring = (ConnectionManager, Arc<AppStore>, Vec<(EventKind, ListenerId)>);

fn build(config: Config) -> anyhow::Result<Wiring> {
    let manager = ConnectionManager::new(config).context("failed to build connection manager")?;
    let store = Arc::new(AppStore::new());
    let listeners = store.attach(&manager);
    Ok((manager, store, listeners))
}

/// Failures are already reflected in manager and store state.
async fn start(manager: &ConnectionManager) {
    if let Err(err) = manager.connect().await {
        tracing::error!(error = %err, "initial connection failed");
    }
}

fn log_events(manager: &ConnectionManager) {
    let explorer = manager.config().clone();
    manager.on(EventKind::NewBlock, move |event: &ManagerEvent| {
        if let ManagerEvent::NewBlock(block) = event {
            tracing::info!(
                number = block.number,
                transactions = block.transaction_count,
                utilization = block.network_utilization_pct,
                url = %explorer.explorer_block_url(&block.hash),
                "block"
            );
        }
    });
    let explorer = manager.config().clone();
    manager.on(EventKind::NewTransaction, move |event: &ManagerEvent| {
        if let ManagerEvent::NewTransaction(tx) = event {
            tracing::info!(
                hash = %tx.hash,
                category = tx.category.as_str(),
                subtype = %tx.subtype,
                value = %tx.value_mon,
                url = %explorer.explorer_tx_url(&tx.hash),
                "transaction"
            );
        }
    });
    manager.on(EventKind::ConnectionFailed, |_: &ManagerEvent| {
        tracing::error!("connection failed, no further reconnects");
    });
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}
