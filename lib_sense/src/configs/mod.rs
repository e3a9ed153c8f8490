//! # Configuration Modules
//!
//! Durable state the bridge keeps between runs. Process settings (env, CLI, the
//! JSON settings file) are resolved by the server binary; this module only deals
//! with the cached credentials.

/// Cached Sense credentials on disk.
pub mod credential_store;
