//! # Data Ingestors Module
//!
//! Clients that pull data into the bridge. Each submodule owns the connection
//! lifecycle of one upstream feed and hands normalised readings to the engine.
//!
//! ## Contained Modules:
//! - **`sense_wss`**: The realtime websocket feed of the Sense energy monitor,
//!   with heartbeat and staleness supervision of each session.

/// The websocket client for the Sense realtime feed.
pub mod sense_wss;

pub use sense_wss::{RealtimeConfig, RealtimeConnection, SenseRealtimeIngestor};
