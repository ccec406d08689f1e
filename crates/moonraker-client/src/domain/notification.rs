//! Typed decode of unsolicited Moonraker notifications.
//!
//! Moonraker notifications look like `{"method": ..., "params": [..]}` where
//! the interesting object sits somewhere in `params`. Each known method is
//! mapped to a typed payload here, once, on the read path. Unknown methods
//! become [`Notification::Unrecognized`] and are dropped by the caller.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::printer::PrintState;

pub const METHOD_HISTORY_CHANGED: &str = "notify_history_changed";
pub const METHOD_STATUS_UPDATE: &str = "notify_status_update";

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    HistoryChanged(HistoryChanged),
    StatusUpdate(StatusUpdate),
    Unrecognized { method: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryChanged {
    pub action: HistoryAction,
    pub job: Option<HistoryJob>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryAction {
    Added,
    Finished,
    Other(String),
}

impl From<&str> for HistoryAction {
    fn from(s: &str) -> Self {
        match s {
            "added" => HistoryAction::Added,
            "finished" => HistoryAction::Finished,
            other => HistoryAction::Other(other.to_string()),
        }
    }
}

/// Job record carried by history notifications
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct HistoryJob {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub total_duration: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// The parts of a status update the translator reacts to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusUpdate {
    /// `virtual_sdcard.progress`, 0.0 ..= 1.0
    pub progress: Option<f64>,
    /// `print_stats.state`, only present when it changed
    pub print_state: Option<PrintState>,
}

impl Notification {
    /// Decode a parsed frame that is neither a response nor a link-lost signal.
    pub fn decode(frame: &Value) -> Self {
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase);
        let params = frame
            .get("params")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        match method.as_deref() {
            Some(METHOD_HISTORY_CHANGED) => match decode_history(params) {
                Some(history) => Notification::HistoryChanged(history),
                None => Notification::Unrecognized { method },
            },
            Some(METHOD_STATUS_UPDATE) => Notification::StatusUpdate(decode_status(params)),
            _ => Notification::Unrecognized { method },
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Notification::HistoryChanged(_) => Some(METHOD_HISTORY_CHANGED),
            Notification::StatusUpdate(_) => Some(METHOD_STATUS_UPDATE),
            Notification::Unrecognized { method } => method.as_deref(),
        }
    }
}

/// The value stored under `key` in the first params entry that has it.
fn find_param<'a>(params: &'a [Value], key: &str) -> Option<&'a Value> {
    params
        .iter()
        .filter_map(Value::as_object)
        .find_map(|entry| entry.get(key))
}

fn decode_history(params: &[Value]) -> Option<HistoryChanged> {
    let action = find_param(params, "action")?.as_str()?;
    let job = find_param(params, "job").and_then(|job| HistoryJob::deserialize(job).ok());
    Some(HistoryChanged {
        action: HistoryAction::from(action),
        job,
    })
}

fn decode_status(params: &[Value]) -> StatusUpdate {
    let progress = find_param(params, "virtual_sdcard")
        .and_then(|vsd| vsd.get("progress"))
        .and_then(Value::as_f64);
    let print_state = find_param(params, "print_stats")
        .and_then(|ps| ps.get("state"))
        .and_then(Value::as_str)
        .map(|s| PrintState::from(s.to_string()));
    StatusUpdate {
        progress,
        print_state,
    }
}
