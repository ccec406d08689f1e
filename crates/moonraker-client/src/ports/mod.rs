//! Ports Layer
//!
//! Defines the interfaces (traits) for:
//! - Driving Ports (inbound) - API for callers inside the process
//! - Driven Ports (outbound) - address discovery and the lifecycle sink

pub mod inbound;
pub mod outbound;

pub use inbound::{JsonRpcApi, PrinterStateApi};
pub use outbound::{HostAddress, HostAddressSource, LifecycleSink};
