//! Printer facts answered on demand, each by one or two RPCs.
//!
//! Every query degrades to a sentinel value on failure.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::PrinterStateTranslator;
use crate::domain::printer::{slicer_estimate_from_metadata, EtaStatus, PrintState, Toolhead};
use crate::error::RpcError;
use crate::ports::PrinterStateApi;

#[derive(Deserialize)]
struct ToolheadStatus {
    toolhead: Toolhead,
}

impl PrinterStateTranslator {
    async fn query_eta_status(&self) -> Result<EtaStatus, RpcError> {
        let result = self
            .rpc
            .request(
                "printer.objects.query",
                Some(json!({
                    "objects": {
                        "virtual_sdcard": null,
                        "print_stats": null,
                        "gcode_move": null
                    }
                })),
                false,
            )
            .await?;
        let status = result
            .get("status")
            .ok_or_else(|| RpcError::MalformedResponse("no status in query result".into()))?;
        EtaStatus::deserialize(status).map_err(|e| RpcError::MalformedResponse(e.to_string()))
    }

    /// Slicer estimate for `file_name`, fetched once per file.
    ///
    /// A failed lookup is not cached, so the next query retries it.
    async fn slicer_estimate(&self, file_name: &str) -> Option<f64> {
        let (cached, epoch) = self.cached_estimate(file_name);
        if let Some(cached) = cached {
            return cached;
        }

        match self
            .rpc
            .request(
                "server.files.metadata",
                Some(json!({ "filename": file_name })),
                false,
            )
            .await
        {
            Ok(metadata) => {
                let estimate = slicer_estimate_from_metadata(&metadata);
                info!(file_name, ?estimate, "Fetched slicer estimated time");
                self.store_estimate(file_name, estimate, epoch);
                estimate
            }
            Err(e) => {
                error!(
                    file_name,
                    error = %e.logging_str(),
                    "Failed to get file metadata"
                );
                None
            }
        }
    }

    async fn query_z_position(&self) -> Result<f64, RpcError> {
        let result = self
            .rpc
            .request(
                "printer.objects.query",
                Some(json!({"objects": {"toolhead": null}})),
                false,
            )
            .await?;
        let status = result
            .get("status")
            .ok_or_else(|| RpcError::MalformedResponse("no status in query result".into()))?;
        ToolheadStatus::deserialize(status)
            .map_err(|e| RpcError::MalformedResponse(e.to_string()))?
            .toolhead
            .z()
            .ok_or_else(|| RpcError::MalformedResponse("toolhead position has no z".into()))
    }
}

#[async_trait]
impl PrinterStateApi for PrinterStateTranslator {
    async fn estimate_remaining_seconds(&self) -> i64 {
        let status = match self.query_eta_status().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e.logging_str(), "ETA query failed");
                return -1;
            }
        };

        let slicer_estimate = match status.file_name() {
            Some(file_name) => self.slicer_estimate(file_name).await,
            None => None,
        };
        status.remaining_seconds(slicer_estimate).unwrap_or(-1)
    }

    async fn is_warming_up(&self) -> bool {
        match self.query_print_stats().await {
            Ok(stats) => stats.is_warming_up(),
            Err(e) => {
                error!(error = %e.logging_str(), "Warm-up check failed to query print stats");
                false
            }
        }
    }

    async fn should_timers_run(&self) -> bool {
        match self.query_print_stats().await {
            Ok(stats) => stats.state == PrintState::Printing,
            Err(e) => {
                // Keep timers alive rather than stall them on a blip
                warn!(error = %e.logging_str(), "Timer check failed to get current state");
                true
            }
        }
    }

    async fn current_z_offset(&self) -> f64 {
        match self.query_z_position().await {
            Ok(z) => z,
            Err(e) => {
                error!(error = %e.logging_str(), "Failed to query toolhead position");
                -1.0
            }
        }
    }
}
