//! Connection supervisor.
//!
//! Owns the connect -> run -> teardown -> backoff loop. Runs until the
//! client shuts down; every failure only ends the current session.
//!
//! ```text
//! Idle -> Connecting -> Open -> Ready
//!   ^                                |
//!   +---- teardown + fixed backoff <-+  (close, error, handshake failure)
//! ```
//!
//! The read loop is the only reader of the socket. It resolves responses,
//! handles klippy link loss inline, and hands every other notification to
//! the dispatch queue without waiting.

use futures_util::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::adapters::transport::{self, WsSource};
use crate::connection::channel::{Generation, RpcChannel};
use crate::connection::handshake::HandshakeSequencer;
use crate::dispatch::EventDispatchQueue;
use crate::domain::envelope::{InboundFrame, METHOD_GCODE_RESPONSE};
use crate::domain::notification::Notification;
use crate::domain::ClientConfig;
use crate::error::ClientError;
use crate::ports::{HostAddress, HostAddressSource};
use crate::translator::PrinterStateTranslator;

/// Timing knobs for the supervisor and its handshakes
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTiming {
    /// Fixed sleep between sessions
    pub reconnect_backoff: Duration,
    /// Sleep between `server.info` polls while klippy starts
    pub handshake_poll_interval: Duration,
    /// Log readiness progress once every this many polls
    pub handshake_log_every: u32,
}

impl From<&ClientConfig> for SupervisorTiming {
    fn from(config: &ClientConfig) -> Self {
        Self {
            reconnect_backoff: config.reconnect_backoff,
            handshake_poll_interval: config.handshake_poll_interval,
            handshake_log_every: config.handshake_log_every,
        }
    }
}

/// Reconnect loop that runs one session at a time
pub struct ConnectionSupervisor {
    /// Write path each new socket is attached to
    channel: Arc<RpcChannel>,
    /// Told about klippy link loss, resynced by each handshake
    translator: Arc<PrinterStateTranslator>,
    /// Producer side of the notification queue
    queue: EventDispatchQueue,
    /// Re-read on every connect attempt
    address_source: Arc<dyn HostAddressSource>,
    /// Last resolved address, shared with the client
    address: Arc<RwLock<HostAddress>>,
    timing: SupervisorTiming,
}

impl ConnectionSupervisor {
    pub fn new(
        channel: Arc<RpcChannel>,
        translator: Arc<PrinterStateTranslator>,
        queue: EventDispatchQueue,
        address_source: Arc<dyn HostAddressSource>,
        address: Arc<RwLock<HostAddress>>,
        timing: SupervisorTiming,
    ) -> Self {
        Self {
            channel,
            translator,
            queue,
            address_source,
            address,
            timing,
        }
    }

    /// Reconnect forever, until `shutdown` flips to true or its sender drops.
    ///
    /// This should be spawned as a background task.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Moonraker client starting websocket connection loop");
        while !is_stopping(&shutdown) {
            match self.run_session(&mut shutdown).await {
                Ok(()) => info!("Moonraker client websocket connection lost, restarting it soon"),
                Err(e @ ClientError::QueueOverflow { .. }) => error!(
                    target: "telemetry",
                    error = %e,
                    "Notification queue overflowed, websocket restarted"
                ),
                Err(e) => warn!(error = %e, "Moonraker client websocket session failed"),
            }

            if is_stopping(&shutdown) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.timing.reconnect_backoff) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("Moonraker client connection loop stopped");
    }

    /// One connect attempt and, if it opens, one full session.
    ///
    /// Teardown always runs before this returns: flags clear and every
    /// pending request is released.
    async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), ClientError> {
        let address = self.resolve_address()?;
        info!(url = %address.websocket_url(), "Connecting to moonraker");
        let (sink, mut source) = tokio::select! {
            connected = transport::connect(&address) => connected?,
            _ = shutdown.changed() => return Ok(()),
        };

        let session = self.channel.attach(sink).await;
        info!(generation = session.generation, "Moonraker client websocket opened");

        let handshake = tokio::spawn(
            HandshakeSequencer::new(
                self.channel.clone(),
                self.translator.clone(),
                self.timing.handshake_poll_interval,
                self.timing.handshake_log_every,
            )
            .run(session.generation),
        );

        let result = self
            .read_loop(&mut source, session.generation, session.close_rx, shutdown)
            .await;

        handshake.abort();
        self.channel.detach(session.generation).await;
        result
    }

    fn resolve_address(&self) -> Result<HostAddress, ClientError> {
        match self.address_source.resolve() {
            Ok(address) => {
                *self.address.write() = address.clone();
                Ok(address)
            }
            Err(e) => {
                error!(error = %e, "Moonraker client failed to resolve the moonraker address");
                Err(e.into())
            }
        }
    }

    async fn read_loop(
        &self,
        source: &mut WsSource,
        generation: Generation,
        mut close_rx: watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        loop {
            tokio::select! {
                _ = close_rx.changed() => {
                    debug!(generation, "Websocket close requested");
                    return Ok(());
                }
                _ = shutdown.changed() => return Ok(()),
                message = source.next() => match message {
                    None => return Ok(()),
                    Some(Err(e)) => {
                        error!(
                            target: "telemetry",
                            error = %e,
                            "Exception from moonraker client websocket connection"
                        );
                        return Err(ClientError::Transport(e.to_string()));
                    }
                    Some(Ok(Message::Text(text))) => {
                        if !self.on_text(text.as_str())? {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(generation, ?frame, "Moonraker closed the websocket");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    /// Classify and route one text frame.
    ///
    /// Returns false when the session must end.
    fn on_text(&self, text: &str) -> Result<bool, ClientError> {
        let frame = InboundFrame::parse(text).inspect_err(|e| {
            error!(
                target: "telemetry",
                error = %e,
                "Failed to handle moonraker websocket message"
            );
        })?;

        match frame {
            InboundFrame::Response { id, body } => {
                trace!(request_id = id, "Ws <- response");
                self.channel.correlator().resolve(id, body);
            }
            InboundFrame::LinkLost { method } => {
                info!(
                    %method,
                    "Moonraker client received klippy link loss, restarting the connection"
                );
                self.translator.on_disconnected_or_shutdown();
                return Ok(false);
            }
            InboundFrame::Notification(notification) => {
                if let Some(method) = notification.method() {
                    if method != METHOD_GCODE_RESPONSE {
                        debug!(method, frame = text, "Ws <-");
                    }
                }
                if matches!(notification, Notification::Unrecognized { .. }) {
                    return Ok(true);
                }
                self.queue.try_enqueue(notification)?;
            }
        }
        Ok(true)
    }
}

/// Shutdown was requested, or the owner went away.
fn is_stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
