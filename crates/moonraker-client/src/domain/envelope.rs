//! JSON-RPC 2.0 envelopes and read-path frame classification.
//!
//! Every inbound text frame is classified exactly once, in this order:
//!
//! 1. carries an `id` -> [`InboundFrame::Response`]
//! 2. method is a klippy link-lost signal -> [`InboundFrame::LinkLost`]
//! 3. anything else -> [`InboundFrame::Notification`] (typed decode)

use serde::Serialize;
use serde_json::Value;

use crate::domain::notification::Notification;
use crate::error::{ClientError, RpcError};
use crate::RpcOutcome;

/// JSON-RPC protocol version tag
pub const JSONRPC_VERSION: &str = "2.0";

/// Sent by Moonraker when klippy drops while idle.
pub const METHOD_KLIPPY_DISCONNECTED: &str = "notify_klippy_disconnected";
/// Sent by Moonraker when klippy drops mid-print.
pub const METHOD_KLIPPY_SHUTDOWN: &str = "notify_klippy_shutdown";
/// Console echo, far too chatty for debug logging.
pub const METHOD_GCODE_RESPONSE: &str = "notify_gcode_response";

/// Outgoing request envelope
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            id,
            params,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Result of classifying one inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Correlated reply to one of our requests
    Response { id: u64, body: Value },
    /// Moonraker lost its klippy link; the session must restart
    LinkLost { method: String },
    /// Unsolicited message destined for the dispatch queue
    Notification(Notification),
}

impl InboundFrame {
    /// Parse and classify a text frame.
    ///
    /// A frame that is not a JSON object is a connection-scope failure.
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ClientError::MalformedFrame(e.to_string()))?;
        if !value.is_object() {
            return Err(ClientError::MalformedFrame(
                "frame is not a JSON object".into(),
            ));
        }

        if let Some(id) = value.get("id") {
            let id = id
                .as_u64()
                .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| ClientError::MalformedFrame(format!("non-integer id {id}")))?;
            return Ok(InboundFrame::Response { id, body: value });
        }

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            if method == METHOD_KLIPPY_DISCONNECTED || method == METHOD_KLIPPY_SHUTDOWN {
                return Ok(InboundFrame::LinkLost {
                    method: method.to_string(),
                });
            }
        }

        Ok(InboundFrame::Notification(Notification::decode(&value)))
    }
}

/// Translate a response envelope into an outcome.
///
/// `error` wins over `result`; an envelope with neither is a transport error.
pub fn outcome_from_response(mut body: Value) -> RpcOutcome {
    if let Some(error) = body.get("error") {
        return Err(RpcError::from_error_object(error));
    }
    match body.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(RpcError::Transport(
            "response carried neither a result nor an error object".into(),
        )),
    }
}
