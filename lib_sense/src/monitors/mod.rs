//! # Power Monitor APIs Module
//!
//! Client implementations and data models for the upstream power-monitoring
//! services. Each submodule hides one vendor's REST and feed formats behind the
//! types the engine works with.
//!
//! ## Contained Modules:
//!
//! - **`sense`**: Authentication client (`/authenticate`, `/renew`), the cached
//!   credential record and the realtime feed frames of the Sense energy monitor.

/// Client and data model for the Sense energy monitor.
pub mod sense;
