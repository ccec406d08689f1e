//! Readiness handshake, run once per opened socket.
//!
//! Moonraker accepts websocket connections before klippy is up. The
//! sequencer polls `server.info` until `klippy_state` is `ready`, then
//! subscribes to printer objects and resyncs the translator.
//!
//! A sequencer is bound to the generation it was spawned for. If the
//! channel has moved on to a newer session it stops without side effects.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::connection::channel::{Generation, RpcChannel};
use crate::domain::printer::KlippyState;
use crate::error::RpcError;
use crate::translator::PrinterStateTranslator;

/// How a handshake ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Ready, subscribed and resynced
    Ready,
    /// The session was replaced while polling
    Abandoned,
    /// The session was closed so the supervisor reconnects
    Failed(String),
}

pub struct HandshakeSequencer {
    channel: Arc<RpcChannel>,
    translator: Arc<PrinterStateTranslator>,
    poll_interval: Duration,
    log_every: u32,
}

impl HandshakeSequencer {
    pub fn new(
        channel: Arc<RpcChannel>,
        translator: Arc<PrinterStateTranslator>,
        poll_interval: Duration,
        log_every: u32,
    ) -> Self {
        Self {
            channel,
            translator,
            poll_interval,
            log_every: log_every.max(1),
        }
    }

    /// Drive the handshake for `generation`. Closes that session on failure.
    pub async fn run(self, generation: Generation) -> HandshakeOutcome {
        let outcome = self.drive(generation).await;
        match &outcome {
            HandshakeOutcome::Ready => info!(generation, "Moonraker client ready"),
            HandshakeOutcome::Abandoned => {
                debug!(generation, "Handshake abandoned for a replaced socket")
            }
            HandshakeOutcome::Failed(reason) => {
                warn!(generation, %reason, "Handshake failed, restarting websocket");
                self.channel.close_generation(generation).await;
            }
        }
        outcome
    }

    async fn drive(&self, generation: Generation) -> HandshakeOutcome {
        let mut polls: u32 = 0;
        loop {
            if !self.channel.is_current(generation).await {
                return HandshakeOutcome::Abandoned;
            }

            let state = match self.probe().await {
                Ok(state) => state,
                Err(RpcError::TimedOut) => {
                    return HandshakeOutcome::Failed("server.info timed out".into());
                }
                Err(e) => {
                    error!(
                        target: "telemetry",
                        error = %e.logging_str(),
                        "Moonraker client failed to query klippy state"
                    );
                    return HandshakeOutcome::Failed(e.logging_str());
                }
            };

            if state == KlippyState::Ready {
                return self.after_ready(generation).await;
            }
            if !state.is_transient() {
                return HandshakeOutcome::Failed(format!("unknown klippy state {state:?}"));
            }

            polls = polls.saturating_add(1);
            if (polls - 1) % self.log_every == 0 {
                info!(?state, polls, "Waiting for klippy to become ready");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn probe(&self) -> Result<KlippyState, RpcError> {
        let result = self.channel.call("server.info", None, true).await?;
        result
            .get("klippy_state")
            .and_then(Value::as_str)
            .map(KlippyState::parse)
            .ok_or_else(|| RpcError::MalformedResponse("server.info has no klippy_state".into()))
    }

    async fn after_ready(&self, generation: Generation) -> HandshakeOutcome {
        if !self.channel.mark_ready(generation).await {
            return HandshakeOutcome::Abandoned;
        }

        if let Err(e) = self.subscribe().await {
            error!(
                target: "telemetry",
                error = %e.logging_str(),
                "Failed to subscribe to printer objects"
            );
            return HandshakeOutcome::Failed(format!("subscribe failed: {}", e.logging_str()));
        }

        if !self.translator.on_connected_and_ready().await {
            return HandshakeOutcome::Failed("printer state resync failed".into());
        }
        HandshakeOutcome::Ready
    }

    async fn subscribe(&self) -> Result<Value, RpcError> {
        self.channel
            .call(
                "printer.objects.subscribe",
                Some(subscription_params()),
                false,
            )
            .await
    }
}

/// Objects whose changes Moonraker should push as status updates.
pub fn subscription_params() -> Value {
    json!({
        "objects": {
            "print_stats": ["state", "filename", "message"],
            "webhooks": null,
            "virtual_sdcard": null,
            "history": null
        }
    })
}
