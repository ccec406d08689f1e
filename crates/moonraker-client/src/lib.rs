//! Moonraker Client - persistent JSON-RPC websocket client for Moonraker.
//!
//! Keeps one connection to a Moonraker host alive, runs correlated
//! request/response calls for any number of concurrent callers, waits out
//! klippy's startup before the connection is used, and translates Moonraker's
//! notification stream into print lifecycle events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         MoonrakerClient                               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   callers ──request()──► RpcChannel ──send──► websocket sink          │
//! │                              │                                        │
//! │                        RpcCorrelator (id -> oneshot)                  │
//! │                              ▲                                        │
//! │   ConnectionSupervisor ──────┤ resolve(id)                            │
//! │     read loop ◄── websocket stream                                    │
//! │       ├── response ─────────┘                                         │
//! │       ├── klippy link lost ──► translator.on_disconnected_or_shutdown │
//! │       └── notification ──► EventDispatchQueue ──► dispatch worker     │
//! │                                                       │               │
//! │   HandshakeSequencer (per socket)                     ▼               │
//! │     server.info poll ─► subscribe ─► PrinterStateTranslator           │
//! │                                          │                            │
//! └──────────────────────────────────────────┼───────────────────────────┘
//!                                            ▼
//!                                      LifecycleSink
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use moonraker_client::{ClientConfig, EventChannelSink, MoonrakerClient};
//!
//! let (sink, mut events) = EventChannelSink::new();
//! let client = MoonrakerClient::new(ClientConfig::default(), Arc::new(sink))?;
//! client.start();
//!
//! let info = client.request("server.info", None, false).await;
//! let eta = client.printer().estimate_remaining_seconds().await;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod client;
pub mod connection;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod ports;
pub mod translator;

/// Result of one JSON-RPC call: the `result` payload, or why there is none.
pub type RpcOutcome = Result<serde_json::Value, error::RpcError>;

// Re-exports
pub use adapters::{EventChannelSink, LifecycleEvent, MoonrakerConfFile, StaticAddress};
pub use client::MoonrakerClient;
pub use domain::{ClientConfig, PrintState};
pub use error::{codes, ClientError, ConfigError, RpcError};
pub use ports::{HostAddress, HostAddressSource, JsonRpcApi, LifecycleSink, PrinterStateApi};
pub use translator::PrinterStateTranslator;
