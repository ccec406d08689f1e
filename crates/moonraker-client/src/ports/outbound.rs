//! Outbound Ports (Driven Ports)
//!
//! Collaborators the client depends on but does not own: where Moonraker
//! lives, and who is told about print lifecycle changes.

use std::fmt;

use crate::domain::printer::PrintState;
use crate::error::ConfigError;

/// A dialable Moonraker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidValue(format!("'{s}' is not host:port")))?;
        let port = port
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;
        Ok(Self::new(host, port))
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}/websocket", self.host, self.port)
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolves the Moonraker address. Called on every connect attempt.
pub trait HostAddressSource: Send + Sync {
    fn resolve(&self) -> Result<HostAddress, ConfigError>;
}

/// Receives print lifecycle events.
///
/// Implementations must return promptly; the translator calls these inline
/// and a slow sink stalls every later notification.
pub trait LifecycleSink: Send + Sync {
    fn on_started(&self, file_name: &str);

    fn on_paused(&self, file_name: Option<&str>);

    fn on_resumed(&self, file_name: Option<&str>);

    /// `percent` is 0.0 ..= 100.0
    fn on_progress(&self, percent: f64);

    /// Probe for the first-layer milestone. Called on every progress
    /// update; the sink decides whether it has already fired.
    fn on_height_milestone(&self);

    /// Neither value is known to the translator; the sink supplies its own.
    fn on_done(&self, file_name: Option<&str>, duration_secs: Option<f64>);

    fn on_failed(&self, file_name: &str, duration_secs: &str, reason: &str);

    fn on_error(&self, message: &str);

    /// Resync after a (re)connect. A print already running must be picked
    /// up as if it had just started.
    fn on_restore_if_needed(
        &self,
        state: &PrintState,
        file_name: Option<&str>,
        total_duration_secs: Option<f64>,
    );
}
