use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    eth::{block_from_header, normalize_block, normalize_tx, RpcHeader},
    events::{EventBus, EventKind, ListenerId, ManagerEvent},
    ingest_stats::{IngestSnapshot, RollingStats},
    models::ConnectionState,
    rpc::RpcGateway,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const NEW_HEADS: &str = "newHeads";
pub const NEW_PENDING_TRANSACTIONS: &str = "newPendingTransactions";

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base: config.reconnect_base(),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before the 1-based `attempt`; `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base.checked_mul(factor).unwrap_or(Duration::MAX))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("rpc endpoint is unreachable")]
    Unreachable,
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
    #[error("connection attempt was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    /// Socket open, no subscription acknowledged yet.
    Open,
    Connected,
    Reconnecting,
    Failed,
    Shutdown,
}

impl Phase {
    fn state(self) -> ConnectionState {
        match self {
            Phase::Idle | Phase::Connecting | Phase::Open | Phase::Reconnecting => {
                ConnectionState::Connecting
            }
            Phase::Connected => ConnectionState::Connected,
            Phase::Failed => ConnectionState::Failed,
            Phase::Shutdown => ConnectionState::Disconnected,
        }
    }

    fn socket_open(self) -> bool {
        matches!(self, Phase::Open | Phase::Connected)
    }

    /// Terminal phases accept no further emissions from in-flight resolutions.
    fn is_terminal(self) -> bool {
        matches!(self, Phase::Failed | Phase::Shutdown)
    }
}

struct Link {
    phase: Phase,
    reconnect_attempts: u32,
    /// Bumped for every connection attempt; stale socket tasks compare against it.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    socket_task: Option<JoinHandle<()>>,
    topics: Vec<String>,
    next_request_id: u64,
    pending: HashMap<u64, String>,
    subscriptions: HashMap<String, String>,
}

impl Link {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            reconnect_attempts: 0,
            generation: 0,
            outbound: None,
            socket_task: None,
            topics: Vec::new(),
            next_request_id: 0,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    fn teardown_socket(&mut self) -> Option<JoinHandle<()>> {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Message::Close(None));
        }
        self.pending.clear();
        self.subscriptions.clear();
        self.socket_task.take()
    }

    fn is_requested(&self, topic: &str) -> bool {
        self.pending.values().any(|t| t == topic) || self.subscriptions.values().any(|t| t == topic)
    }

    /// Sends `eth_subscribe` for `topic` on the open socket.
    fn send_subscribe(&mut self, topic: &str) -> bool {
        let Some(outbound) = self.outbound.clone() else {
            return false;
        };
        self.next_request_id += 1;
        let id = self.next_request_id;
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_subscribe",
            "params": [topic],
        });
        if outbound.send(Message::Text(request.to_string())).is_err() {
            return false;
        }
        self.pending.insert(id, topic.to_string());
        true
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<NotificationParams>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: String,
    result: Value,
}

struct Inner {
    config: Config,
    gateway: RpcGateway,
    policy: ReconnectPolicy,
    bus: Mutex<EventBus>,
    stats: Mutex<RollingStats>,
    link: Mutex<Link>,
}

/// Owns the WebSocket lifecycle and the block/transaction resolution pipeline.
///
/// Cloning yields another handle to the same manager. Locks are only held for
/// synchronous sections and listeners always run with no lock held, so a
/// listener may call back into the manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: Config) -> Result<Self> {
        let gateway = RpcGateway::new(&config.rpc_url)?;
        Ok(Self::with_gateway(config, gateway))
    }

    pub fn with_gateway(config: Config, gateway: RpcGateway) -> Self {
        let policy = ReconnectPolicy::from_config(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                gateway,
                policy,
                bus: Mutex::new(EventBus::new()),
                stats: Mutex::new(RollingStats::new(now_ms())),
                link: Mutex::new(Link::new()),
            }),
        }
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.inner.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rolling(&self) -> MutexGuard<'_, RollingStats> {
        self.inner.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bus(&self) -> MutexGuard<'_, EventBus> {
        self.inner.bus.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn gateway(&self) -> &RpcGateway {
        &self.inner.gateway
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ManagerEvent) + Send + Sync + 'static,
    {
        self.bus().on(kind, Arc::new(listener))
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.bus().off(kind, id)
    }

    pub fn emit(&self, event: ManagerEvent) {
        let kind = event.kind();
        let listeners = self.bus().listeners_for(kind);
        debug!(event = kind.name(), listeners = listeners.len(), "emit");
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.link().phase.state()
    }

    pub fn is_connected(&self) -> bool {
        self.link().phase.socket_open()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.link().reconnect_attempts
    }

    /// Topics with an acknowledged subscription on the current socket.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.link().subscriptions.values().cloned().collect();
        topics.sort();
        topics
    }

    pub fn stats(&self) -> IngestSnapshot {
        let (state, connected, attempts) = {
            let link = self.link();
            (link.phase.state(), link.phase.socket_open(), link.reconnect_attempts)
        };
        self.rolling().snapshot(state, connected, attempts)
    }

    /// Probes the RPC endpoint, then opens the socket and subscribes to new
    /// heads. Returns once the socket is open.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let (generation, stale) = {
            let mut link = self.link();
            let stale = link.teardown_socket();
            link.generation += 1;
            link.phase = match link.phase {
                Phase::Reconnecting => Phase::Reconnecting,
                _ => Phase::Connecting,
            };
            (link.generation, stale)
        };
        if let Some(task) = stale {
            task.abort();
        }

        let rpc_url = self.inner.config.rpc_url.as_str();
        match self.inner.gateway.block_number().await {
            Some(latest) => info!(rpc_url, latest_block = latest, "rpc endpoint reachable"),
            None => {
                error!(rpc_url, "rpc endpoint unreachable, not opening websocket");
                if self.is_current(generation) {
                    self.fail();
                }
                return Err(ConnectError::Unreachable);
            }
        }
        if !self.is_current(generation) {
            return Err(ConnectError::Cancelled);
        }

        let ws_url = self.inner.config.ws_url.as_str();
        info!(ws_url, "connecting websocket");
        let stream = match connect_async(ws_url).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                warn!(ws_url, error = %err, "websocket handshake failed");
                self.handle_close(generation);
                return Err(ConnectError::Handshake(err));
            }
        };

        let (mut sink, source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        {
            let mut link = self.link();
            if link.generation != generation || link.phase == Phase::Shutdown {
                return Err(ConnectError::Cancelled);
            }
            link.phase = Phase::Open;
            link.reconnect_attempts = 0;
            link.outbound = Some(outbound);

            if !link.topics.iter().any(|t| t == NEW_HEADS) {
                link.topics.insert(0, NEW_HEADS.to_string());
            }
            for topic in link.topics.clone() {
                if link.send_subscribe(&topic) {
                    info!(topic = %topic, "subscribed");
                }
            }
        }
        info!(ws_url, "websocket open");

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(err) = sink.send(message).await {
                    debug!(error = %err, "websocket writer stopped");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let manager = self.clone();
        let reader = tokio::spawn(async move {
            manager.read_loop(source, generation).await;
        });
        {
            let mut link = self.link();
            if link.generation == generation {
                link.socket_task = Some(reader);
            } else {
                reader.abort();
            }
        }

        Ok(())
    }

    async fn read_loop(self, mut source: SplitStream<WsStream>, generation: u64) {
        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => self.handle_message(&text),
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "websocket closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "websocket error");
                    break;
                }
                None => {
                    info!("websocket stream ended");
                    break;
                }
            }
        }
        self.handle_close(generation);
    }

    fn is_current(&self, generation: u64) -> bool {
        let link = self.link();
        link.generation == generation && link.phase != Phase::Shutdown
    }

    /// Applies the reconnect policy after the socket for `generation` went away.
    fn handle_close(&self, generation: u64) {
        let max_attempts = self.inner.policy.max_attempts;
        let next = {
            let mut link = self.link();
            if link.generation != generation || link.phase.is_terminal() {
                return;
            }
            link.outbound = None;
            link.socket_task = None;
            link.pending.clear();
            link.subscriptions.clear();

            if link.reconnect_attempts < max_attempts {
                link.reconnect_attempts += 1;
                link.phase = Phase::Reconnecting;
                let attempt = link.reconnect_attempts;
                self.inner
                    .policy
                    .delay_for(attempt)
                    .map(|delay| (attempt, delay))
            } else {
                None
            }
        };

        match next {
            Some((attempt, delay)) => {
                info!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.schedule_reconnect(generation, attempt, delay);
            }
            None => {
                error!(max_attempts, "max reconnection attempts reached");
                self.fail();
            }
        }
    }

    fn schedule_reconnect(&self, generation: u64, attempt: u32, delay: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_wanted = {
                let link = manager.link();
                link.generation == generation && link.phase == Phase::Reconnecting
            };
            if !still_wanted {
                debug!(attempt, "reconnect superseded");
                return;
            }
            if let Err(err) = manager.connect().await {
                warn!(attempt, error = %err, "reconnect attempt failed");
            }
        });
    }

    /// Terminal failure. Emits `connectionFailed` once per transition.
    fn fail(&self) {
        let task = {
            let mut link = self.link();
            if link.phase.is_terminal() {
                return;
            }
            link.phase = Phase::Failed;
            link.teardown_socket()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.emit(ManagerEvent::ConnectionFailed);
    }

    fn mark_connected(&self) {
        let mut link = self.link();
        if link.phase == Phase::Open {
            link.phase = Phase::Connected;
            info!("connected");
        }
    }

    /// Requests a subscription, queueing it until the socket is open.
    pub fn subscribe(&self, topic: &str) {
        let mut link = self.link();
        if !link.topics.iter().any(|t| t == topic) {
            link.topics.push(topic.to_string());
        }
        if !link.phase.socket_open() {
            debug!(topic, "socket not open, subscription queued");
            return;
        }
        if link.is_requested(topic) {
            return;
        }
        if link.send_subscribe(topic) {
            info!(topic, "subscribed");
        }
    }

    /// Topics that will be (re)subscribed whenever a socket opens.
    pub fn requested_topics(&self) -> Vec<String> {
        self.link().topics.clone()
    }

    /// Dispatches one inbound frame. Block and transaction resolution is
    /// spawned onto the current tokio runtime.
    pub fn handle_message(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "unparsable websocket frame");
                return;
            }
        };

        if let Some(Value::String(subscription_id)) = &envelope.result {
            if subscription_id.starts_with("0x") {
                self.on_subscription_confirmed(envelope.id.as_ref(), subscription_id);
                return;
            }
        }
        if let Some(err) = &envelope.error {
            warn!(error = %err, "websocket request rejected");
            return;
        }
        if envelope.method.as_deref() != Some("eth_subscription") {
            return;
        }
        let Some(params) = envelope.params else {
            return;
        };

        let result = params.result;
        if result.get("number").is_some() {
            match serde_json::from_value::<RpcHeader>(result) {
                Ok(header) => self.handle_new_block(header),
                Err(err) => warn!(
                    subscription = %params.subscription,
                    error = %err,
                    "malformed block header"
                ),
            }
        } else if let Some(hash) = result.as_str().filter(|h| h.starts_with("0x")) {
            self.handle_new_transaction(hash.to_string());
        } else {
            debug!(subscription = %params.subscription, "ignoring notification payload");
        }
    }

    fn on_subscription_confirmed(&self, id: Option<&Value>, subscription_id: &str) {
        let topic = {
            let mut link = self.link();
            let topic = id
                .and_then(Value::as_u64)
                .and_then(|id| link.pending.remove(&id))
                .unwrap_or_else(|| "unknown".to_string());
            link.subscriptions
                .insert(subscription_id.to_string(), topic.clone());
            topic
        };
        info!(topic = %topic, subscription_id, "subscription confirmed");
        self.mark_connected();
    }

    pub fn handle_new_block(&self, header: RpcHeader) {
        let interval = self.rolling().record_block(now_ms());
        debug!(number = %header.number, interval_ms = interval, "new block header");

        let manager = self.clone();
        tokio::spawn(async move {
            manager.resolve_block(header, interval).await;
        });
    }

    async fn resolve_block(&self, header: RpcHeader, interval_ms: f64) {
        let resolved = self
            .inner
            .gateway
            .get_block_by_hash(&header.identifier())
            .await;
        if self.link().phase.is_terminal() {
            debug!(number = %header.number, "block resolved after terminal state, dropping");
            return;
        }

        let record = match resolved {
            Some(block) => {
                let arrival = now_ms();
                let record = normalize_block(&block, interval_ms, arrival);
                {
                    let mut stats = self.rolling();
                    if record.transactions.is_empty() {
                        stats.refresh_tps(arrival);
                    }
                    for _ in &record.transactions {
                        stats.record_transaction(arrival);
                    }
                }
                info!(
                    number = record.number,
                    transactions = record.transaction_count,
                    utilization = record.network_utilization_pct,
                    "block resolved"
                );
                record
            }
            None => {
                self.rolling().inc_degraded_blocks();
                let record = block_from_header(&header, interval_ms);
                warn!(number = record.number, "block unresolved, using header only");
                record
            }
        };

        self.mark_connected();
        for tx in &record.transactions {
            self.emit(ManagerEvent::NewTransaction(Arc::new(tx.clone())));
        }
        self.emit(ManagerEvent::NewBlock(Arc::new(record)));
    }

    pub fn handle_new_transaction(&self, hash: String) {
        self.rolling().record_transaction(now_ms());

        let manager = self.clone();
        tokio::spawn(async move {
            match manager.inner.gateway.get_transaction_by_hash(&hash).await {
                Some(tx) => {
                    if manager.link().phase.is_terminal() {
                        debug!(tx = %hash, "transaction resolved after terminal state, dropping");
                        return;
                    }
                    let record = normalize_tx(&tx, now_ms());
                    debug!(tx = %record.hash, value = %record.value_mon, "transaction resolved");
                    manager.emit(ManagerEvent::NewTransaction(Arc::new(record)));
                }
                None => {
                    manager.rolling().inc_dropped_transactions();
                    warn!(tx = %hash, "transaction unresolved, dropping");
                }
            }
        });
    }

    /// Manual retry: re-probes the endpoint and, if reachable, starts a fresh
    /// connect cycle even after a terminal failure.
    pub async fn force_real_data_mode(&self) -> Result<(), ConnectError> {
        info!("forcing real data mode");
        if self.inner.gateway.block_number().await.is_none() {
            warn!("rpc endpoint still unreachable");
            return Err(ConnectError::Unreachable);
        }
        {
            let mut link = self.link();
            link.reconnect_attempts = 0;
            link.phase = Phase::Idle;
        }
        self.connect().await
    }

    /// Closes the socket and marks the manager disconnected. Idempotent.
    pub fn disconnect(&self) {
        let task = {
            let mut link = self.link();
            if link.phase == Phase::Shutdown {
                return;
            }
            link.phase = Phase::Shutdown;
            link.generation += 1;
            link.teardown_socket()
        };
        if let Some(task) = task {
            task.abort();
        }
        info!("disconnected");
    }
}
