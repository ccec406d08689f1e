//! Domain types for the Moonraker client.
//!
//! Pure data and algorithms: wire envelopes, typed notifications, printer
//! objects, the ETA computation and configuration. No I/O lives here.

pub mod config;
pub mod envelope;
pub mod estimate_cache;
pub mod notification;
pub mod printer;

// Re-exports for convenience
pub use config::ClientConfig;
pub use envelope::{InboundFrame, JsonRpcRequest};
pub use estimate_cache::PrintJobEstimateCache;
pub use notification::{HistoryAction, HistoryChanged, HistoryJob, Notification, StatusUpdate};
pub use printer::{
    estimate_remaining_seconds, EtaStatus, KlippyState, PrintState, PrintStats, Toolhead,
};
