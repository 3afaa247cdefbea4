#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use monad_galaxy::config::Config;

pub const BLOCK_HASH: &str = "0x9f1c0000000000000000000000000000000000000000000000000000000000aa";

pub fn hash_of(n: u64) -> String {
    format!("0x{:064x}", n)
}

pub fn address_of(n: u64) -> String {
    format!("0x{:040x}", n)
}

/// In-process stand-in for a Monad node: JSON-RPC over HTTP on `/` and
/// a subscription WebSocket on `/ws`.
#[derive(Clone, Default)]
pub struct MockNode {
    inner: Arc<MockInner>,
}

#[derive(Default)]
pub struct MockInner {
    pub reject_ws: AtomicBool,
    /// Close the socket right after acknowledging the subscription and refuse
    /// every later handshake.
    pub drop_after_subscribe: AtomicBool,
    pub probe_fails: AtomicBool,
    /// Acknowledge `newHeads` without ever pushing a header.
    pub silent_heads: AtomicBool,
    /// Non-zero overrides the status of block lookups.
    pub block_status: AtomicU16,
    pub block_delay_ms: AtomicU64,
    pub ws_attempts: AtomicUsize,
    pub probes: AtomicUsize,
    pub block_calls: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &MockInner {
        &self.inner
    }
}

pub fn sample_block() -> Value {
    json!({
        "number": "0x65",
        "hash": BLOCK_HASH,
        "timestamp": "0x6553f100",
        "gasUsed": "0x4c4b40",
        "gasLimit": "0x989680",
        "baseFeePerGas": "0xc0479e800",
        "transactions": [
            {
                "hash": hash_of(1),
                "from": address_of(0xaaaa),
                "to": address_of(0xbbbb),
                "value": "0xde0b6b3a7640000",
                "gasPrice": "0x3b9aca00",
                "gas": "0x5208",
                "nonce": "0x1",
                "blockNumber": "0x65",
                "input": "0xa9059cbb000000000000000000000000bbbb"
            },
            {
                "hash": hash_of(2),
                "from": address_of(0xcccc),
                "to": address_of(0xdddd),
                "value": "0x0",
                "gasPrice": "0x3b9aca00",
                "gas": "0x5208",
                "nonce": "0x2",
                "blockNumber": "0x65",
                "input": "0x"
            }
        ]
    })
}

async fn rpc(State(node): State<MockNode>, Json(body): Json<Value>) -> Response {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body.get("method").and_then(Value::as_str).unwrap_or_default();
    let state = node.state();

    let result = match method {
        "eth_blockNumber" => {
            state.probes.fetch_add(1, Ordering::SeqCst);
            if state.probe_fails.load(Ordering::SeqCst) {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            json!("0x64")
        }
        "eth_getBlockByHash" => {
            state.block_calls.fetch_add(1, Ordering::SeqCst);
            let delay = state.block_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let status = state.block_status.load(Ordering::SeqCst);
            if status != 0 {
                let code = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
                if code != StatusCode::OK {
                    return code.into_response();
                }
            }
            sample_block()
        }
        "eth_getTransactionByHash" => sample_block()["transactions"][0].clone(),
        _ => Value::Null,
    };

    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
}

async fn ws_handler(State(node): State<MockNode>, ws: WebSocketUpgrade) -> Response {
    let state = node.state();
    state.ws_attempts.fetch_add(1, Ordering::SeqCst);
    if state.reject_ws.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(socket, node))
}

async fn serve_socket(mut socket: WebSocket, node: MockNode) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if request.get("method").and_then(Value::as_str) != Some("eth_subscribe") {
            continue;
        }

        let subscription = format!("0x5ub{}", request["id"]);
        let ack = json!({ "jsonrpc": "2.0", "id": request["id"], "result": subscription });
        if socket.send(Message::Text(ack.to_string())).await.is_err() {
            return;
        }

        if node.state().drop_after_subscribe.load(Ordering::SeqCst) {
            node.state().reject_ws.store(true, Ordering::SeqCst);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }

        let result = match request["params"][0].as_str() {
            Some("newHeads") if !node.state().silent_heads.load(Ordering::SeqCst) => json!({
                "number": "0x65",
                "hash": BLOCK_HASH,
                "timestamp": "0x6553f100",
                "gasUsed": "0x4c4b40",
                "gasLimit": "0x989680",
                "baseFeePerGas": "0xc0479e800"
            }),
            Some("newPendingTransactions") => json!(hash_of(1)),
            _ => continue,
        };
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": { "subscription": subscription, "result": result }
        });
        if socket.send(Message::Text(notification.to_string())).await.is_err() {
            return;
        }
    }
}

pub async fn spawn_node(node: MockNode) -> (String, JoinHandle<()>) {
    let app = Router::new()
        .route("/", post(rpc))
        .route("/ws", get(ws_handler))
        .with_state(node);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let server = axum::serve(listener, app);
    let handle = tokio::spawn(async move {
        let _ = server.await;
    });

    (addr.to_string(), handle)
}

pub fn config_for(addr: &str, reconnect_base_ms: u64) -> Config {
    let mut config = Config::monad_testnet();
    config.rpc_url = format!("http://{}/", addr);
    config.ws_url = format!("ws://{}/ws", addr);
    config.reconnect_base_ms = reconnect_base_ms;
    config
}
