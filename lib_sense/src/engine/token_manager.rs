//! # Token Manager
//!
//! Obtains usable Sense credentials, preferring (in order) the cached access token,
//! a silent renewal with the cached refresh token, and a full login with the
//! configured email and password.
//!
//! `obtain` does not give up: every failure is logged, the retry policy's delay is
//! waited out and the whole decision is taken again from a fresh read of the cache.
//! The service cannot do anything useful without credentials and has nobody to
//! report the failure to, so blocking here is the intended behaviour.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::configs::credential_store::{CredentialStore, StoreError};
use crate::engine::retry_policy::RetryPolicy;
use crate::monitors::sense::model::{AuthenticateResponse, Credentials, RenewResponse};

/// Everything that can make a single credential attempt fail.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request did not complete (DNS, TLS, timeout, undecodable body, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The endpoint answered `{"status": "error", "error_reason": ...}`.
    #[error("Rejected by upstream: {0}")]
    Rejected(String),

    /// A 2xx answer without a field the contract requires.
    #[error("Upstream response is missing `{0}`")]
    MissingField(&'static str),

    /// A full login is needed but no email/password were configured.
    #[error("No email/password configured for a full login")]
    NoLogin,

    /// The fresh credentials could not be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The upstream authentication endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /authenticate` with the primary login.
    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthenticateResponse, AuthError>;

    /// `POST /renew` with a refresh token.
    async fn renew(&self, user_id: &str, refresh_token: &str) -> Result<RenewResponse, AuthError>;
}

/// Primary login, supplied out-of-band by configuration.
#[derive(Clone, Default)]
pub struct Login {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("email", &self.email)
            .field("password", &"*****")
            .finish()
    }
}

pub struct TokenManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    login: Option<Login>,
    retry: RetryPolicy,
}

impl TokenManager {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn CredentialStore>,
        login: Option<Login>,
        retry: RetryPolicy,
    ) -> Self {
        Self { api, store, login, retry }
    }

    /// Seeds an empty cache with an externally issued access token, so the warm-start
    /// path can run without a password. A cache that already holds an access token is
    /// left alone.
    pub fn seed(&self, access_token: &str, monitor_id: &str) -> Result<(), StoreError> {
        let mut cached = self.store.load();
        if cached.has_access_token() {
            return Ok(());
        }
        log::info!("Seeding credentials cache with the configured access token");
        cached.access_token = access_token.to_string();
        cached.monitor_id = monitor_id.to_string();
        self.store.save(&cached)
    }

    /// Returns usable credentials, retrying forever on failure.
    pub async fn obtain(&self, force_refresh: bool) -> Credentials {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.try_obtain(force_refresh).await {
                Ok(credentials) => return credentials,
                Err(e) => {
                    let wait = self.retry.next_delay();
                    log::error!(
                        "Failed to obtain Sense credentials (attempt {}): {}. Retrying in {:?}",
                        attempt,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// One pass of the credential decision, without retries.
    pub async fn try_obtain(&self, force_refresh: bool) -> Result<Credentials, AuthError> {
        let mut cached = self.store.load();

        if cached.has_access_token() && !force_refresh {
            log::info!("Using cached Access Token");
            return Ok(cached);
        }

        if cached.has_refresh_token() {
            log::info!("Requesting new Access Token via Refresh Token");
            let renewed = self.api.renew(&cached.user_id, &cached.refresh_token).await?;
            let access_token = renewed.access_token.ok_or(AuthError::MissingField("access_token"))?;
            let refresh_token = renewed.refresh_token.ok_or(AuthError::MissingField("refresh_token"))?;

            cached.access_token = access_token;
            cached.refresh_token = refresh_token;
            self.store.save(&cached)?;
            log::info!("Got Access Token");
            return Ok(cached);
        }

        let Some(login) = self.login.as_ref() else {
            // A seeded token cannot be renewed; keep using it until the feed rejects it.
            if cached.has_access_token() {
                log::warn!("No refresh token or login configured, reusing the cached Access Token");
                return Ok(cached);
            }
            return Err(AuthError::NoLogin);
        };
        log::info!("Requesting new Access Token");
        let response = self.api.authenticate(&login.email, &login.password).await?;

        let credentials = Credentials {
            access_token: response.access_token.ok_or(AuthError::MissingField("access_token"))?,
            refresh_token: response.refresh_token.ok_or(AuthError::MissingField("refresh_token"))?,
            user_id: response.user_id.ok_or(AuthError::MissingField("user_id"))?,
            monitor_id: response
                .monitors
                .into_iter()
                .next()
                .and_then(|m| m.id)
                .ok_or(AuthError::MissingField("monitors[0].id"))?,
        };
        self.store.save(&credentials)?;
        log::info!("Got Access Token for monitor {}", credentials.monitor_id);
        Ok(credentials)
    }
}
