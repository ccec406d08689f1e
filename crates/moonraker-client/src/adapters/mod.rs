//! Adapters Layer
//!
//! Concrete implementations of the outbound ports, plus the websocket
//! transport.

pub mod event_sink;
pub mod moonraker_conf;
pub mod transport;

// Re-exports for convenience
pub use event_sink::{EventChannelSink, LifecycleEvent};
pub use moonraker_conf::{parse_server_address, MoonrakerConfFile, StaticAddress};
