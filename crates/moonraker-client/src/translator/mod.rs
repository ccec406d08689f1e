//! Printer state translator.
//!
//! Turns Moonraker's unsolicited notifications into print lifecycle calls on
//! a [`LifecycleSink`], and answers printer-fact queries for timers and
//! progress reporting ([`PrinterStateApi`](crate::ports::PrinterStateApi)).
//!
//! Nothing is emitted until the translator has resynchronized with the
//! printer after a (re)connect; a klippy link loss disarms it again.

mod printer_state;

#[cfg(test)]
pub(crate) mod testing;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::estimate_cache::PrintJobEstimateCache;
use crate::domain::notification::{HistoryAction, HistoryChanged, Notification, StatusUpdate};
use crate::domain::printer::{PrintState, PrintStats};
use crate::error::RpcError;
use crate::ports::{JsonRpcApi, LifecycleSink};

/// A `printing` state only counts as a resume once the print is this far in.
///
/// A fresh start and a resume look identical on the wire; below this the
/// print is assumed to be just starting.
pub const RESUME_PROGRESS_THRESHOLD: f64 = 0.01;

/// Reason reported for every failed print; errors and user cancels are not
/// distinguishable upstream.
pub const FAILED_REASON_CANCELLED: &str = "cancelled";

pub const KLIPPER_DISCONNECTED_MESSAGE: &str = "Klipper Disconnected";

pub struct PrinterStateTranslator {
    rpc: Arc<dyn JsonRpcApi>,
    sink: Arc<dyn LifecycleSink>,
    ready: AtomicBool,
    estimates: Mutex<PrintJobEstimateCache>,
}

impl PrinterStateTranslator {
    pub fn new(rpc: Arc<dyn JsonRpcApi>, sink: Arc<dyn LifecycleSink>) -> Self {
        Self {
            rpc,
            sink,
            ready: AtomicBool::new(false),
            estimates: Mutex::new(PrintJobEstimateCache::new()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Resync with the printer after the handshake completed.
    ///
    /// Returns false if the printer state could not be fetched; the
    /// translator then stays disarmed.
    pub async fn on_connected_and_ready(&self) -> bool {
        let stats = match self.query_print_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                error!(
                    target: "telemetry",
                    error = %e.logging_str(),
                    "Moonraker client init sync failed to get the printer state"
                );
                return false;
            }
        };

        info!(state = %stats.state, "Printer state at socket connect");
        self.sink.on_restore_if_needed(
            &stats.state,
            stats.file_name(),
            Some(stats.total_duration),
        );
        self.ready.store(true, Ordering::SeqCst);
        true
    }

    /// Klippy went away. Emits one error event if the translator was armed.
    pub fn on_disconnected_or_shutdown(&self) {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Klippy link lost, lifecycle notifications paused until resync");
        self.sink.on_error(KLIPPER_DISCONNECTED_MESSAGE);
    }

    /// Handle one dequeued notification.
    pub async fn on_unsolicited(&self, notification: Notification) {
        if !self.is_ready() {
            return;
        }
        match notification {
            Notification::HistoryChanged(history) => self.on_history_changed(history),
            Notification::StatusUpdate(update) => self.on_status_update(update).await,
            Notification::Unrecognized { .. } => {}
        }
    }

    fn on_history_changed(&self, history: HistoryChanged) {
        let Some(job) = history.job else {
            return;
        };
        let Some(file_name) = job.filename.as_deref().filter(|f| !f.is_empty()) else {
            return;
        };

        match history.action {
            HistoryAction::Added => {
                self.sink.on_started(file_name);
                // Same file name may be a different print
                self.estimates.lock().invalidate();
            }
            HistoryAction::Finished => {
                // Complete prints arrive through the status update path
                if job.status.as_deref() != Some(FAILED_REASON_CANCELLED) {
                    return;
                }
                let Some(duration) = job.total_duration else {
                    return;
                };
                self.sink.on_failed(
                    file_name,
                    &format_duration_secs(duration),
                    FAILED_REASON_CANCELLED,
                );
            }
            HistoryAction::Other(_) => {}
        }
    }

    /// A state event ends handling of the update; progress is only reported
    /// when no state event fired.
    async fn on_status_update(&self, update: StatusUpdate) {
        match update.print_state {
            Some(PrintState::Paused) => {
                let file_name = self.current_file_name().await;
                self.sink.on_paused(file_name.as_deref());
                return;
            }
            Some(PrintState::Printing)
                if update
                    .progress
                    .map_or(true, |progress| progress > RESUME_PROGRESS_THRESHOLD) =>
            {
                let file_name = self.current_file_name().await;
                self.sink.on_resumed(file_name.as_deref());
                return;
            }
            Some(PrintState::Complete) => {
                self.sink.on_done(None, None);
                return;
            }
            _ => {}
        }

        if let Some(progress) = update.progress {
            self.sink.on_progress(progress * 100.0);
            self.sink.on_height_milestone();
        }
    }

    /// `print_stats` with every required field present.
    pub async fn query_print_stats(&self) -> Result<PrintStats, RpcError> {
        let result = self
            .rpc
            .request(
                "printer.objects.query",
                Some(json!({"objects": {"print_stats": null}})),
                false,
            )
            .await?;
        let stats = result.pointer("/status/print_stats").ok_or_else(|| {
            RpcError::MalformedResponse("no status.print_stats in query result".into())
        })?;
        PrintStats::deserialize(stats).map_err(|e| {
            RpcError::MalformedResponse(format!("print_stats is missing a required field: {e}"))
        })
    }

    async fn current_file_name(&self) -> Option<String> {
        match self.query_print_stats().await {
            Ok(stats) => stats.file_name().map(str::to_string),
            Err(e) => {
                warn!(error = %e.logging_str(), "Failed to get the current file name");
                None
            }
        }
    }

    /// Cached estimate for `file_name`, plus the cache epoch a fresh
    /// lookup must be stored under.
    fn cached_estimate(&self, file_name: &str) -> (Option<Option<f64>>, u64) {
        let cache = self.estimates.lock();
        (cache.lookup(file_name), cache.epoch())
    }

    fn store_estimate(&self, file_name: &str, estimate: Option<f64>, epoch: u64) {
        if self.estimates.lock().store(file_name, estimate, epoch) {
            debug!(file_name, ?estimate, "Caching slicer estimated time");
        } else {
            debug!(file_name, "New print started during metadata lookup, estimate not cached");
        }
    }
}

/// Seconds as a float string; whole numbers keep one decimal (`42.0`).
fn format_duration_secs(secs: f64) -> String {
    if secs.is_finite() && secs.fract() == 0.0 && secs.abs() < 1e15 {
        format!("{secs:.1}")
    } else {
        secs.to_string()
    }
}
