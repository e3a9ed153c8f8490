//! # Data Retrieval Module
//!
//! Generic HTTP plumbing shared by the upstream authentication client and the state
//! sink. Request building, bearer injection and response capture live here so the
//! callers only deal with their own payloads.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: An `ApiClient` built on `reqwest` and `reqwest-middleware`, with
//!   optional exponential-backoff retries for transient failures.

/// Generic HTTP API client with optional retry middleware.
pub mod ky_http;
