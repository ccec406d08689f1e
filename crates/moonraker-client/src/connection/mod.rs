//! Connection management.
//!
//! - [`correlator`]: request ids and per-request waiters
//! - [`channel`]: shared write path, readiness flags, correlated calls
//! - [`handshake`]: per-socket readiness polling and post-ready setup
//! - [`supervisor`]: the reconnect loop and the single read path

pub mod channel;
pub mod correlator;
pub mod handshake;
pub mod supervisor;

pub use channel::{Generation, RpcChannel};
pub use correlator::{PendingCall, RpcCorrelator, WaitResult};
pub use handshake::{HandshakeOutcome, HandshakeSequencer};
pub use supervisor::{ConnectionSupervisor, SupervisorTiming};
