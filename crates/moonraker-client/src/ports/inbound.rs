//! Inbound Ports (Driving Ports)
//!
//! The API that callers inside the process use: raw JSON-RPC calls, and the
//! printer facts derived from them.

use async_trait::async_trait;
use serde_json::Value;

use crate::RpcOutcome;

/// Correlated JSON-RPC calls over the shared websocket.
#[async_trait]
pub trait JsonRpcApi: Send + Sync {
    /// Send `method` and wait for its response.
    ///
    /// Never fails out-of-band: every failure is an `Err` in the outcome.
    /// `force_ignore_readiness` lets the call go out before klippy is ready.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        force_ignore_readiness: bool,
    ) -> RpcOutcome;
}

/// Printer facts for timers and progress reporting.
///
/// All methods degrade to a sentinel instead of failing.
#[async_trait]
pub trait PrinterStateApi: Send + Sync {
    /// Seconds left in the current print, or -1 if unknown.
    async fn estimate_remaining_seconds(&self) -> i64;

    /// Printing, but still heating up.
    async fn is_warming_up(&self) -> bool;

    /// Only the `printing` state runs timers; paused stops them.
    async fn should_timers_run(&self) -> bool;

    /// Current toolhead Z, or -1.0 if unknown.
    async fn current_z_offset(&self) -> f64;
}
