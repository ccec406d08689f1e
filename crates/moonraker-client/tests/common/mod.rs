//! Scripted in-process Moonraker for integration tests.
//!
//! Listens on `127.0.0.1:0`, answers JSON-RPC requests through a script,
//! records every request, and lets the test push notifications or drop the
//! live connections.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use moonraker_client::{ClientConfig, HostAddress};

/// How the fake server answers one request
pub enum Reply {
    Result(Value),
    Error(i64, String),
    /// Answer after a delay, without blocking other requests
    After(Duration, Value),
    /// Never answer
    Silent,
    /// Fall through to the default script
    Default,
}

pub type Script = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

pub struct FakeMoonraker {
    pub address: HostAddress,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    push_tx: broadcast::Sender<String>,
    kill_tx: broadcast::Sender<()>,
}

impl FakeMoonraker {
    /// Serve with the default script only.
    pub async fn start() -> Self {
        Self::with_script(|_, _| Reply::Default).await
    }

    pub async fn with_script(
        script: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (push_tx, _) = broadcast::channel(1024);
        let (kill_tx, _) = broadcast::channel(16);

        let server = Self {
            address: HostAddress::new("127.0.0.1", port),
            connections: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            push_tx,
            kill_tx,
        };

        let script: Script = Arc::new(script);
        let connections = server.connections.clone();
        let requests = server.requests.clone();
        let push_tx = server.push_tx.clone();
        let kill_tx = server.kill_tx.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(
                    stream,
                    script.clone(),
                    requests.clone(),
                    push_tx.subscribe(),
                    kill_tx.subscribe(),
                ));
            }
        });
        server
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Params of every request for `method`, in arrival order.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub async fn wait_for_connections(&self, count: usize) {
        let this = self;
        eventually("server connections", || async move {
            this.connections() >= count
        })
        .await;
    }

    pub async fn wait_for_requests(&self, method: &str, count: usize) {
        let this = self;
        eventually("server requests", || async move {
            this.requests(method).len() >= count
        })
        .await;
    }

    /// Send a notification to every live connection.
    pub fn push(&self, frame: Value) {
        let _ = self.push_tx.send(frame.to_string());
    }

    /// Drop every live connection without a close handshake.
    pub fn kill_connections(&self) {
        let _ = self.kill_tx.send(());
    }
}

async fn serve_connection(
    stream: TcpStream,
    script: Script,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    mut push_rx: broadcast::Receiver<String>,
    mut kill_rx: broadcast::Receiver<()>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let (delayed_tx, mut delayed_rx) = mpsc::unbounded_channel::<String>();

    loop {
        let outgoing = tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let method = request["method"].as_str().unwrap_or_default().to_string();
                    let params = request.get("params").cloned().unwrap_or(Value::Null);
                    let id = request["id"].clone();
                    requests.lock().push((method.clone(), params.clone()));

                    let reply = match script(&method, &params) {
                        Reply::Default => default_reply(&method),
                        other => other,
                    };
                    match reply {
                        Reply::Result(result) => {
                            json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
                        }
                        Reply::Error(code, message) => json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {"code": code, "message": message}
                        })
                        .to_string(),
                        Reply::After(delay, result) => {
                            let delayed_tx = delayed_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = delayed_tx.send(
                                    json!({"jsonrpc": "2.0", "id": id, "result": result})
                                        .to_string(),
                                );
                            });
                            continue;
                        }
                        Reply::Silent | Reply::Default => continue,
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
            pushed = push_rx.recv() => match pushed {
                Ok(frame) => frame,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(frame) = delayed_rx.recv() => frame,
            _ = kill_rx.recv() => break,
        };

        if write.send(Message::Text(outgoing.into())).await.is_err() {
            break;
        }
    }
}

/// A healthy, idle printer.
fn default_reply(method: &str) -> Reply {
    match method {
        "server.info" => Reply::Result(json!({
            "klippy_connected": true,
            "klippy_state": "ready",
            "moonraker_version": "v0.8.0"
        })),
        "printer.objects.subscribe" => Reply::Result(json!({"eventtime": 1.0, "status": {}})),
        "printer.objects.query" => Reply::Result(print_stats("standby", "", 0.0, 0.0)),
        _ => Reply::Error(-32601, format!("Method not found: {method}")),
    }
}

pub fn print_stats(state: &str, filename: &str, total: f64, printing: f64) -> Value {
    json!({
        "eventtime": 1.0,
        "status": {
            "print_stats": {
                "state": state,
                "filename": filename,
                "total_duration": total,
                "print_duration": printing,
                "message": ""
            }
        }
    })
}

pub fn notification(method: &str, payload: Value) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "params": [payload, 1234.5]})
}

/// Short timings so tests do not wait on production defaults.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout: Duration::from_secs(5),
        reconnect_backoff: Duration::from_millis(100),
        handshake_poll_interval: Duration::from_millis(20),
        ..ClientConfig::default()
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
