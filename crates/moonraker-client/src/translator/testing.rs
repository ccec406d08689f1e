//! Test doubles for the translator's ports.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::domain::printer::PrintState;
use crate::error::RpcError;
use crate::ports::{JsonRpcApi, LifecycleSink};
use crate::RpcOutcome;

type Handler = Box<dyn Fn(&str, Option<&Value>) -> RpcOutcome + Send + Sync>;

/// Answers every call through one closure and records what was asked.
pub struct MockRpc {
    handler: Handler,
    calls: Mutex<Vec<(String, Option<Value>)>>,
}

impl MockRpc {
    pub fn new(handler: impl Fn(&str, Option<&Value>) -> RpcOutcome + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails as if the socket were gone.
    pub fn disconnected() -> Self {
        Self::new(|_, _| Err(RpcError::NotConnected))
    }

    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }
}

#[async_trait]
impl JsonRpcApi for MockRpc {
    async fn request(&self, method: &str, params: Option<Value>, _force: bool) -> RpcOutcome {
        let outcome = (self.handler)(method, params.as_ref());
        self.calls.lock().push((method.to_string(), params));
        outcome
    }
}

/// `printer.objects.query` result carrying one `print_stats` object.
pub fn print_stats_result(state: &str, filename: &str, total: f64, printing: f64) -> Value {
    json!({
        "eventtime": 1234.5,
        "status": {
            "print_stats": {
                "state": state,
                "filename": filename,
                "total_duration": total,
                "print_duration": printing,
                "message": ""
            }
        }
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Started(String),
    Paused(Option<String>),
    Resumed(Option<String>),
    Progress(f64),
    HeightMilestone,
    Done(Option<String>, Option<f64>),
    Failed(String, String, String),
    Error(String),
    Restore(PrintState, Option<String>, Option<f64>),
}

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    fn push(&self, call: SinkCall) {
        self.calls.lock().push(call);
    }
}

impl LifecycleSink for RecordingSink {
    fn on_started(&self, file_name: &str) {
        self.push(SinkCall::Started(file_name.to_string()));
    }

    fn on_paused(&self, file_name: Option<&str>) {
        self.push(SinkCall::Paused(file_name.map(str::to_string)));
    }

    fn on_resumed(&self, file_name: Option<&str>) {
        self.push(SinkCall::Resumed(file_name.map(str::to_string)));
    }

    fn on_progress(&self, percent: f64) {
        self.push(SinkCall::Progress(percent));
    }

    fn on_height_milestone(&self) {
        self.push(SinkCall::HeightMilestone);
    }

    fn on_done(&self, file_name: Option<&str>, duration_secs: Option<f64>) {
        self.push(SinkCall::Done(file_name.map(str::to_string), duration_secs));
    }

    fn on_failed(&self, file_name: &str, duration_secs: &str, reason: &str) {
        self.push(SinkCall::Failed(
            file_name.to_string(),
            duration_secs.to_string(),
            reason.to_string(),
        ));
    }

    fn on_error(&self, message: &str) {
        self.push(SinkCall::Error(message.to_string()));
    }

    fn on_restore_if_needed(
        &self,
        state: &PrintState,
        file_name: Option<&str>,
        total_duration_secs: Option<f64>,
    ) {
        self.push(SinkCall::Restore(
            state.clone(),
            file_name.map(str::to_string),
            total_duration_secs,
        ));
    }
}
