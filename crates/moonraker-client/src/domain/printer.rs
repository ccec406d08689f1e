//! Printer object shapes and the time-remaining estimate.
//!
//! Only the fields this client consumes are modelled. Moonraker returns far
//! more in each object; serde ignores the rest.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Below this progress fraction the fallback ETA cannot extrapolate.
pub const MIN_PROGRESS_FOR_EXTRAPOLATION: f64 = 0.0001;

/// Slicer estimates at or below this many seconds are treated as unknown.
pub const MIN_SLICER_ESTIMATE_SECS: f64 = 0.1;

/// `print_duration` below this means the printer is still heating.
pub const WARMUP_EPSILON_SECS: f64 = 0.00001;

/// `print_stats.state` as reported by klippy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PrintState {
    Standby,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
    Other(String),
}

impl PrintState {
    pub fn as_str(&self) -> &str {
        match self {
            PrintState::Standby => "standby",
            PrintState::Printing => "printing",
            PrintState::Paused => "paused",
            PrintState::Complete => "complete",
            PrintState::Cancelled => "cancelled",
            PrintState::Error => "error",
            PrintState::Other(s) => s,
        }
    }

    /// A job is loaded and has not finished.
    pub fn is_active(&self) -> bool {
        matches!(self, PrintState::Printing | PrintState::Paused)
    }
}

impl From<String> for PrintState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "standby" => PrintState::Standby,
            "printing" => PrintState::Printing,
            "paused" => PrintState::Paused,
            "complete" => PrintState::Complete,
            "cancelled" => PrintState::Cancelled,
            "error" => PrintState::Error,
            _ => PrintState::Other(s),
        }
    }
}

impl From<PrintState> for String {
    fn from(state: PrintState) -> Self {
        state.as_str().to_string()
    }
}

impl std::fmt::Display for PrintState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `klippy_state` from `server.info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KlippyState {
    Ready,
    Startup,
    Error,
    Shutdown,
    Other(String),
}

impl KlippyState {
    pub fn parse(s: &str) -> Self {
        match s {
            "ready" => KlippyState::Ready,
            "startup" => KlippyState::Startup,
            "error" => KlippyState::Error,
            "shutdown" => KlippyState::Shutdown,
            other => KlippyState::Other(other.to_string()),
        }
    }

    /// Klippy is on its way up (or being restarted); keep polling.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KlippyState::Startup | KlippyState::Error | KlippyState::Shutdown
        )
    }
}

/// Full `print_stats` object as returned by `printer.objects.query`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PrintStats {
    pub state: PrintState,
    /// Empty while no file is loaded
    pub filename: String,
    pub total_duration: f64,
    /// Time spent actually printing; excludes heating and pauses
    pub print_duration: f64,
}

impl PrintStats {
    /// File name, with Moonraker's empty string mapped to `None`
    pub fn file_name(&self) -> Option<&str> {
        Some(self.filename.as_str()).filter(|f| !f.is_empty())
    }

    /// Printing, but no time accumulated yet: the printer is heating.
    pub fn is_warming_up(&self) -> bool {
        self.state == PrintState::Printing && self.print_duration < WARMUP_EPSILON_SECS
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VirtualSdcard {
    /// 0.0 ..= 1.0
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GcodeMove {
    /// 1.0 is 100%
    pub speed_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Toolhead {
    pub position: Vec<f64>,
}

impl Toolhead {
    pub fn z(&self) -> Option<f64> {
        self.position.get(2).copied()
    }
}

/// `print_stats` subset needed for the ETA
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EtaPrintStats {
    pub print_duration: f64,
    #[serde(default)]
    pub filename: Option<String>,
}

/// `status` object of the ETA query
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EtaStatus {
    pub print_stats: EtaPrintStats,
    pub virtual_sdcard: VirtualSdcard,
    pub gcode_move: GcodeMove,
}

impl EtaStatus {
    pub fn file_name(&self) -> Option<&str> {
        self.print_stats
            .filename
            .as_deref()
            .filter(|f| !f.is_empty())
    }

    pub fn remaining_seconds(&self, slicer_estimate: Option<f64>) -> Option<i64> {
        estimate_remaining_seconds(
            self.print_stats.print_duration,
            self.virtual_sdcard.progress,
            self.gcode_move.speed_factor,
            slicer_estimate,
        )
    }
}

/// Time remaining in whole seconds, or `None` when it cannot be computed.
///
/// In priority order:
/// 1. slicer estimate: `estimate - progress * estimate`
/// 2. progress ~0: `print_duration` as a floor
/// 3. extrapolate: `print_duration / progress - print_duration`
///
/// Every path is then scaled by `1 / speed_factor` and truncated.
pub fn estimate_remaining_seconds(
    print_duration: f64,
    progress: f64,
    speed_factor: f64,
    slicer_estimate: Option<f64>,
) -> Option<i64> {
    if !speed_factor.is_finite() || speed_factor <= 0.0 {
        return None;
    }
    let inverse_speed = 1.0 / speed_factor;

    let remaining = match slicer_estimate.filter(|e| *e > MIN_SLICER_ESTIMATE_SECS) {
        Some(estimate) => estimate - progress * estimate,
        None if progress < MIN_PROGRESS_FOR_EXTRAPOLATION => print_duration,
        None => {
            let total = print_duration / progress;
            total - print_duration
        }
    };

    let scaled = remaining * inverse_speed;
    scaled.is_finite().then_some(scaled as i64)
}

/// Pull `estimated_time` from a `server.files.metadata` result.
pub fn slicer_estimate_from_metadata(metadata: &Value) -> Option<f64> {
    metadata
        .get("estimated_time")
        .and_then(Value::as_f64)
        .filter(|secs| *secs > MIN_SLICER_ESTIMATE_SECS)
}
