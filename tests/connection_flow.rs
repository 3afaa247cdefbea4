mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use monad_galaxy::{
    events::{EventKind, ManagerEvent},
    manager::{ConnectError, ConnectionManager, NEW_PENDING_TRANSACTIONS},
    models::{ConnectionState, TxCategory},
    rpc::CallClass,
    store::AppStore,
};

use common::{config_for, hash_of, spawn_node, MockNode, BLOCK_HASH};

fn record_events(manager: &ConnectionManager) -> mpsc::UnboundedReceiver<ManagerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in [
        EventKind::NewBlock,
        EventKind::NewTransaction,
        EventKind::ConnectionFailed,
    ] {
        let tx = tx.clone();
        manager.on(kind, move |event: &ManagerEvent| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

async fn wait_for<F>(what: &str, mut done: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn new_head_flows_into_store() {
    let node = MockNode::new();
    let (addr, server) = spawn_node(node.clone()).await;

    let manager = ConnectionManager::new(config_for(&addr, 1000)).unwrap();
    let store = Arc::new(AppStore::new());
    store.attach(&manager);
    let mut events = record_events(&manager);

    manager.connect().await.unwrap();

    let mut blocks = Vec::new();
    let mut transactions = Vec::new();
    while blocks.is_empty() {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no block within 5s")
            .unwrap();
        match event {
            ManagerEvent::NewBlock(block) => blocks.push(block),
            ManagerEvent::NewTransaction(tx) => transactions.push(tx),
            ManagerEvent::ConnectionFailed => panic!("connection failed"),
        }
    }

    // transactions precede their block
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0].category, TxCategory::Defi);
    assert_eq!(transactions[0].subtype, "swap");
    assert_eq!(transactions[0].value_mon, "1.000000");
    assert_eq!(transactions[1].category, TxCategory::Other);

    let block = &blocks[0];
    assert_eq!(block.number, 101);
    assert_eq!(block.hash, BLOCK_HASH);
    assert_eq!(block.transaction_count, 2);
    assert_eq!(block.network_utilization_pct, 50.0);

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.is_connected());
    assert_eq!(manager.subscriptions(), vec!["newHeads"]);
    let ingest = manager.stats();
    assert_eq!(ingest.blocks_received, 1);
    assert_eq!(ingest.transactions_received, 2);
    assert_eq!(ingest.degraded_blocks, 0);

    let stats = store.stats();
    assert_eq!(stats.block_transactions, 2);
    assert_eq!(stats.total_transactions, 2);
    assert_eq!(stats.category_stats.defi, 1);
    assert_eq!(stats.category_stats.other, 1);
    assert_eq!(stats.category_stats.total(), 2);
    assert_eq!(stats.gas_price_gwei, 52.0);
    assert_eq!(store.status(), ConnectionState::Connected);
    let recent = store.recent_transactions(10);
    assert_eq!(recent[0].hash, hash_of(2));
    assert_eq!(recent[1].hash, hash_of(1));

    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    server.abort();
}

#[tokio::test]
async fn reconnects_until_attempts_are_exhausted() {
    let node = MockNode::new();
    node.state().drop_after_subscribe.store(true, Ordering::SeqCst);
    let (addr, server) = spawn_node(node.clone()).await;

    let manager = ConnectionManager::new(config_for(&addr, 10)).unwrap();
    let store = Arc::new(AppStore::new());
    store.attach(&manager);
    let mut events = record_events(&manager);

    manager.connect().await.unwrap();

    let failed = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(ManagerEvent::ConnectionFailed) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(failed.is_ok(), "connectionFailed never emitted");

    // delays are 10+20+40+80+160ms; a sixth attempt would have shown by now
    tokio::time::sleep(Duration::from_millis(500)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ManagerEvent::ConnectionFailed),
            "connectionFailed emitted twice"
        );
    }

    assert_eq!(node.state().ws_attempts.load(Ordering::SeqCst), 6);
    assert_eq!(manager.reconnect_attempts(), 5);
    assert_eq!(manager.state(), ConnectionState::Failed);
    assert!(!manager.is_connected());
    assert_eq!(store.status(), ConnectionState::Failed);
    assert!(!store.is_connected());

    server.abort();
}

#[tokio::test]
async fn manual_retry_recovers_after_failure() {
    let node = MockNode::new();
    node.state().drop_after_subscribe.store(true, Ordering::SeqCst);
    let (addr, server) = spawn_node(node.clone()).await;

    let mut config = config_for(&addr, 5);
    config.max_reconnect_attempts = 1;
    let manager = ConnectionManager::new(config).unwrap();

    manager.connect().await.unwrap();
    wait_for("terminal failure", || manager.state() == ConnectionState::Failed).await;

    node.state().drop_after_subscribe.store(false, Ordering::SeqCst);
    node.state().reject_ws.store(false, Ordering::SeqCst);

    manager.force_real_data_mode().await.unwrap();
    assert_eq!(manager.reconnect_attempts(), 0);
    wait_for("subscription ack", || manager.state() == ConnectionState::Connected).await;
    assert_eq!(manager.subscriptions(), vec!["newHeads"]);

    manager.disconnect();
    server.abort();
}

#[tokio::test]
async fn unreachable_rpc_never_opens_websocket() {
    let node = MockNode::new();
    node.state().probe_fails.store(true, Ordering::SeqCst);
    let (addr, server) = spawn_node(node.clone()).await;

    let manager = ConnectionManager::new(config_for(&addr, 10)).unwrap();
    let mut events = record_events(&manager);

    let result = manager.connect().await;
    assert!(matches!(result, Err(ConnectError::Unreachable)));
    assert_eq!(manager.state(), ConnectionState::Failed);
    assert_eq!(node.state().ws_attempts.load(Ordering::SeqCst), 0);

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ManagerEvent::ConnectionFailed));

    // retry also refuses while the endpoint is down
    let retry = manager.force_real_data_mode().await;
    assert!(matches!(retry, Err(ConnectError::Unreachable)));
    assert_eq!(node.state().ws_attempts.load(Ordering::SeqCst), 0);

    server.abort();
}

#[tokio::test]
async fn rate_limited_block_falls_back_to_header() {
    let node = MockNode::new();
    node.state().block_status.store(429, Ordering::SeqCst);
    let (addr, server) = spawn_node(node.clone()).await;

    let manager = ConnectionManager::new(config_for(&addr, 1000)).unwrap();
    let mut events = record_events(&manager);
    manager.connect().await.unwrap();

    let block = loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no block within 5s")
            .unwrap();
        match event {
            ManagerEvent::NewBlock(block) => break block,
            ManagerEvent::NewTransaction(_) => panic!("degraded block carries no transactions"),
            ManagerEvent::ConnectionFailed => panic!("connection failed"),
        }
    };

    assert_eq!(block.number, 101);
    assert_eq!(block.transaction_count, 0);
    assert!(block.transactions.is_empty());
    assert_eq!(manager.stats().degraded_blocks, 1);
    assert_eq!(
        manager
            .gateway()
            .current_delay(CallClass::Block),
        Some(Duration::from_millis(400))
    );

    manager.disconnect();
    server.abort();
}

#[tokio::test]
async fn queued_subscription_is_sent_once_the_socket_opens() {
    let node = MockNode::new();
    node.state().silent_heads.store(true, Ordering::SeqCst);
    let (addr, server) = spawn_node(node.clone()).await;

    let manager = ConnectionManager::new(config_for(&addr, 1000)).unwrap();
    manager.subscribe(NEW_PENDING_TRANSACTIONS);
    assert!(manager.subscriptions().is_empty());

    manager.connect().await.unwrap();
    wait_for("both acks", || manager.subscriptions().len() == 2).await;
    assert_eq!(
        manager.subscriptions(),
        vec!["newHeads", "newPendingTransactions"]
    );
    assert_eq!(
        manager.requested_topics(),
        vec!["newHeads", "newPendingTransactions"]
    );

    manager.disconnect();
    server.abort();
}

#[tokio::test]
async fn pending_hash_resolves_into_one_transaction() {
    let node = MockNode::new();
    node.state().silent_heads.store(true, Ordering::SeqCst);
    let (addr, server) = spawn_node(node.clone()).await;

    let manager = ConnectionManager::new(config_for(&addr, 1000)).unwrap();
    let store = Arc::new(AppStore::new());
    store.attach(&manager);
    let mut events = record_events(&manager);
    manager.subscribe(NEW_PENDING_TRANSACTIONS);
    manager.connect().await.unwrap();

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no transaction within 5s")
        .unwrap();
    let ManagerEvent::NewTransaction(tx) = event else {
        panic!("expected a transaction, got {:?}", event.kind());
    };
    assert_eq!(tx.hash, hash_of(1));
    assert_eq!(tx.category, TxCategory::Defi);
    assert_eq!(tx.subtype, "swap");

    // nothing else is pushed for a lone hash
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_err());

    let ingest = manager.stats();
    assert_eq!(ingest.transactions_received, 1);
    assert_eq!(ingest.blocks_received, 0);
    assert_eq!(ingest.dropped_transactions, 0);
    assert_eq!(store.recent_transactions(10).len(), 1);
    assert_eq!(store.stats().total_transactions, 1);

    manager.disconnect();
    server.abort();
}
