//! # Engine Module
//!
//! The connection lifecycle and liveness subsystem of the bridge.
//!
//! ## Core Components:
//!
//! - **`token_manager`**: Obtains and refreshes Sense credentials, retrying forever
//!   with a fixed delay when upstream or the network misbehaves.
//!
//! - **`retry_policy`**: The delay (plus optional jitter) used between credential
//!   attempts.
//!
//! - **`liveness`**: Heartbeat and data-staleness bookkeeping for one connection.
//!
//! - **`state_sink`**: The outbound state API (Home Assistant Supervisor) and the
//!   request body it receives.
//!
//! - **`forwarder`**: Duplicate suppression in front of the sink.
//!
//! - **`supervisor`**: The forever loop that reconnects after every session end.

/// Credential acquisition and renewal.
pub mod token_manager;
/// Delay policy for retried operations.
pub mod retry_policy;
/// Heartbeat and staleness bookkeeping.
pub mod liveness;
/// Outbound state sink.
pub mod state_sink;
/// Deduplicating forwarder in front of the sink.
pub mod forwarder;
/// Reconnect loop.
pub mod supervisor;

// --- Public API Re-exports ---
pub use forwarder::{ForwardOutcome, SampleForwarder};
pub use liveness::LivenessMonitor;
pub use retry_policy::RetryPolicy;
pub use state_sink::{DisabledSink, HomeAssistantSink, StateSink, StateUpdate};
pub use supervisor::{ConnectionSupervisor, SessionRunner, TerminationReason};
pub use token_manager::{AuthApi, AuthError, Login, TokenManager};
