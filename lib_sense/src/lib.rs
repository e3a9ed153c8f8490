//! Shared library of the Sense realtime bridge.
//!
//! Modules are grouped by folder: `configs` (credential cache), `retrieve` (HTTP
//! client), `monitors` (Sense API client and data model), `engine` (token manager,
//! liveness, forwarding, supervision) and `ingestors` (the realtime feed session).

#![forbid(unsafe_code)]

pub mod configs;
pub mod engine;
pub mod ingestors;
pub mod monitors;
pub mod retrieve;

pub use configs::credential_store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use monitors::sense::model::{Credentials, Sample};
