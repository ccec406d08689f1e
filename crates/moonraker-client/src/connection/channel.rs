//! The shared websocket write path and the correlated request call.
//!
//! `RpcChannel` holds the connection state (sink and readiness flags) under
//! one async lock, and the correlator under its own. A request never holds
//! both: the state lock is released once the frame is written, before the
//! caller starts waiting on the correlator.

use async_trait::async_trait;
use futures_util::SinkExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::adapters::transport::WsSink;
use crate::connection::correlator::{RpcCorrelator, WaitResult};
use crate::domain::envelope::{outcome_from_response, JsonRpcRequest};
use crate::error::RpcError;
use crate::ports::JsonRpcApi;
use crate::RpcOutcome;

/// Identifies one websocket session. Bumped on every attach.
pub type Generation = u64;

#[derive(Default)]
struct ConnectionState {
    sink: Option<WsSink>,
    handshake_ready: bool,
    generation: Generation,
    close_tx: Option<watch::Sender<bool>>,
}

impl ConnectionState {
    fn socket_open(&self) -> bool {
        self.sink.is_some()
    }
}

/// A session handed to the supervisor on attach.
pub struct Session {
    pub generation: Generation,
    /// Flips to `true` when the session must end
    pub close_rx: watch::Receiver<bool>,
}

/// Correlated JSON-RPC calls over whichever socket is currently attached
pub struct RpcChannel {
    /// Sink, readiness flags and generation; held across each write
    state: Mutex<ConnectionState>,
    /// Waiters for in-flight requests
    correlator: RpcCorrelator,
    /// Upper bound on each call's wait
    request_timeout: Duration,
}

impl RpcChannel {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(ConnectionState::default()),
            correlator: RpcCorrelator::new(),
            request_timeout,
        }
    }

    pub fn correlator(&self) -> &RpcCorrelator {
        &self.correlator
    }

    /// Install a freshly opened sink. The socket is open, not yet ready.
    pub async fn attach(&self, sink: WsSink) -> Session {
        let mut state = self.state.lock().await;
        let (close_tx, close_rx) = watch::channel(false);
        state.generation += 1;
        state.sink = Some(sink);
        state.handshake_ready = false;
        state.close_tx = Some(close_tx);
        Session {
            generation: state.generation,
            close_rx,
        }
    }

    /// Tear the session down: both flags clear and every waiter is released
    /// in the same step.
    pub async fn detach(&self, generation: Generation) {
        let sink = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.handshake_ready = false;
            state.close_tx = None;
            state.sink.take()
        };
        let released = self.correlator.release_all();
        if released > 0 {
            debug!(generation, released, "Pending requests released on teardown");
        }
        if let Some(mut sink) = sink {
            let _ = sink.close().await;
        }
    }

    /// Mark the session ready. False if it has already been replaced.
    pub async fn mark_ready(&self, generation: Generation) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation || !state.socket_open() {
            return false;
        }
        state.handshake_ready = true;
        true
    }

    /// Whether `generation` is still the live session.
    pub async fn is_current(&self, generation: Generation) -> bool {
        let state = self.state.lock().await;
        state.generation == generation && state.socket_open()
    }

    pub async fn is_ready(&self) -> bool {
        let state = self.state.lock().await;
        state.socket_open() && state.handshake_ready
    }

    /// Ask the active session to end. No-op without a socket.
    pub async fn close(&self) {
        let state = self.state.lock().await;
        if let Some(close_tx) = state.close_tx.as_ref() {
            debug!(generation = state.generation, "Closing moonraker websocket");
            let _ = close_tx.send(true);
        }
    }

    /// Ask a specific session to end, if it is still the live one.
    pub async fn close_generation(&self, generation: Generation) {
        let state = self.state.lock().await;
        if state.generation != generation {
            return;
        }
        if let Some(close_tx) = state.close_tx.as_ref() {
            let _ = close_tx.send(true);
        }
    }

    /// Write one text frame. Returns false instead of failing.
    ///
    /// Without `force`, the frame only goes out once the handshake is done.
    pub async fn send(&self, text: String, force: bool) -> bool {
        let mut state = self.state.lock().await;
        if !force && !state.handshake_ready {
            return false;
        }
        let Some(sink) = state.sink.as_mut() else {
            return false;
        };
        match sink.send(Message::Text(text.into())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Websocket send failed, closing connection");
                if let Some(close_tx) = state.close_tx.as_ref() {
                    let _ = close_tx.send(true);
                }
                false
            }
        }
    }

    /// Issue one correlated call and wait for its outcome.
    pub async fn call(&self, method: &str, params: Option<Value>, force: bool) -> RpcOutcome {
        let mut pending = self.correlator.allocate(method);
        let text = JsonRpcRequest::new(pending.id(), method, params.as_ref())
            .to_text()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if !self.send(text, force).await {
            return Err(RpcError::NotConnected);
        }

        match pending.wait(self.request_timeout).await {
            WaitResult::Resolved(body) => outcome_from_response(body),
            WaitResult::TimedOut => {
                debug!(method, request_id = pending.id(), "RPC request timed out");
                Err(RpcError::TimedOut)
            }
            WaitResult::Released => Err(RpcError::NotConnected),
        }
    }
}

#[async_trait]
impl JsonRpcApi for RpcChannel {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        force_ignore_readiness: bool,
    ) -> RpcOutcome {
        self.call(method, params, force_ignore_readiness).await
    }
}
