//! Client root.
//!
//! Builds the whole object graph once and hands out handles. Construct one
//! `MoonrakerClient` at process start and pass it (or its [`rpc`] and
//! [`printer`] handles) to whatever needs Moonraker.
//!
//! [`rpc`]: MoonrakerClient::rpc
//! [`printer`]: MoonrakerClient::printer

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::adapters::moonraker_conf::MoonrakerConfFile;
use crate::connection::{ConnectionSupervisor, RpcChannel, SupervisorTiming};
use crate::dispatch::EventDispatchQueue;
use crate::domain::ClientConfig;
use crate::error::ClientError;
use crate::ports::{HostAddress, HostAddressSource, JsonRpcApi, LifecycleSink, PrinterStateApi};
use crate::translator::PrinterStateTranslator;
use crate::RpcOutcome;

struct ClientTasks {
    supervisor: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// The client and everything it owns
pub struct MoonrakerClient {
    config: ClientConfig,
    /// Shared write path and correlated calls
    channel: Arc<RpcChannel>,
    /// Notification consumer and printer-fact source
    translator: Arc<PrinterStateTranslator>,
    /// Where the supervisor looks up host and port
    address_source: Arc<dyn HostAddressSource>,
    /// Last resolved address, the fallback until the first resolve
    address: Arc<RwLock<HostAddress>>,
    /// Flipped to true to stop the background tasks
    shutdown_tx: watch::Sender<bool>,
    /// Set by the first `start()`
    started: AtomicBool,
    /// Join handles, taken by `shutdown()`
    tasks: Mutex<Option<ClientTasks>>,
}

impl MoonrakerClient {
    /// Build a client that reads its address from `config.moonraker_config_path`.
    pub fn new(config: ClientConfig, sink: Arc<dyn LifecycleSink>) -> Result<Self, ClientError> {
        let source = Arc::new(MoonrakerConfFile::new(config.moonraker_config_path.clone()));
        Self::with_address_source(config, source, sink)
    }

    /// Build a client with a custom address source.
    pub fn with_address_source(
        config: ClientConfig,
        address_source: Arc<dyn HostAddressSource>,
        sink: Arc<dyn LifecycleSink>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let fallback = HostAddress::parse(&config.fallback_address)?;

        let channel = Arc::new(RpcChannel::new(config.request_timeout));
        let translator = Arc::new(PrinterStateTranslator::new(channel.clone(), sink));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            channel,
            translator,
            address_source,
            address: Arc::new(RwLock::new(fallback)),
            shutdown_tx,
            started: AtomicBool::new(false),
            tasks: Mutex::new(None),
        })
    }

    /// Start the connection loop and the dispatch worker.
    ///
    /// Idempotent: returns false if already started. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("Starting Moonraker connection client");

        let (queue, worker) = EventDispatchQueue::new(
            self.config.dispatch_queue_capacity,
            self.translator.clone(),
        );
        let supervisor = ConnectionSupervisor::new(
            self.channel.clone(),
            self.translator.clone(),
            queue,
            self.address_source.clone(),
            self.address.clone(),
            SupervisorTiming::from(&self.config),
        );

        *self.tasks.lock() = Some(ClientTasks {
            supervisor: tokio::spawn(supervisor.run(self.shutdown_tx.subscribe())),
            worker: tokio::spawn(worker.run()),
        });
        true
    }

    /// Correlated JSON-RPC calls.
    pub fn rpc(&self) -> Arc<dyn JsonRpcApi> {
        self.channel.clone()
    }

    /// Printer facts for timers and progress reporting.
    pub fn printer(&self) -> Arc<dyn PrinterStateApi> {
        self.translator.clone()
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        force_ignore_readiness: bool,
    ) -> RpcOutcome {
        self.channel
            .call(method, params, force_ignore_readiness)
            .await
    }

    /// Last address read from the config, or the fallback before that.
    pub fn address(&self) -> HostAddress {
        self.address.read().clone()
    }

    /// Socket open and klippy ready.
    pub async fn is_ready(&self) -> bool {
        self.channel.is_ready().await
    }

    /// Translator resynced and emitting lifecycle events.
    pub fn is_translating(&self) -> bool {
        self.translator.is_ready()
    }

    /// Close the current socket. The connection loop reconnects after the
    /// backoff.
    pub async fn close(&self) {
        self.channel.close().await;
    }

    /// Stop for good: end the connection loop, then the worker.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            let _ = tasks.supervisor.await;
            let _ = tasks.worker.await;
        }
        info!("Moonraker connection client stopped");
    }
}
