//! # Connection Supervisor
//!
//! The outermost loop of the bridge. It owns no connection state itself: it asks
//! the token manager for credentials, hands them to a session runner, and when the
//! session ends for whatever reason it waits the reconnect delay, forces a
//! credential refresh and starts over. There is no exit path; the process runs
//! until it is killed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::token_manager::TokenManager;
use crate::monitors::sense::model::Credentials;

/// Why a realtime session ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminationReason {
    /// The websocket could not be opened.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The peer never sent `hello`.
    #[error("no hello received in time")]
    HandshakeTimeout,

    /// The previous heartbeat ping was never answered.
    #[error("heartbeat not acknowledged")]
    MissedPong,

    /// Pings are answered but no sample arrived within the staleness threshold.
    #[error("no realtime data for {silent_for_ms} ms")]
    StaleFeed { silent_for_ms: i64 },

    /// The feed sent an `Unauthorized` error frame.
    #[error("feed rejected the access token")]
    Unauthorized,

    /// The peer closed the socket.
    #[error("closed by remote (code {code:?}): {reason}")]
    RemoteClosed { code: Option<u16>, reason: String },

    /// Read or write failure on the socket.
    #[error("transport error: {0}")]
    TransportError(String),
}

/// Runs one realtime session to completion.
#[async_trait]
pub trait SessionRunner: Send + Sync {
    async fn run_session(&self, credentials: &Credentials) -> TerminationReason;
}

pub struct ConnectionSupervisor {
    tokens: TokenManager,
    runner: Arc<dyn SessionRunner>,
    reconnect_delay: Duration,
}

impl ConnectionSupervisor {
    pub fn new(tokens: TokenManager, runner: Arc<dyn SessionRunner>, reconnect_delay: Duration) -> Self {
        Self {
            tokens,
            runner,
            reconnect_delay,
        }
    }

    /// Runs forever.
    pub async fn run(&self) {
        let mut credentials = self.tokens.obtain(false).await;
        loop {
            credentials = self.cycle(&credentials).await;
        }
    }

    /// One session plus the reconnect preparation; returns the credentials for the
    /// next session.
    pub async fn cycle(&self, credentials: &Credentials) -> Credentials {
        let reason = self.runner.run_session(credentials).await;
        match reason {
            TerminationReason::Unauthorized => {
                log::error!("Connection Closed: {}. Renewing credentials before reconnecting", reason)
            }
            _ => log::warn!("Connection Closed: {}", reason),
        }

        log::warn!("Attempting to reconnect in {:?}", self.reconnect_delay);
        tokio::time::sleep(self.reconnect_delay).await;
        self.tokens.obtain(true).await
    }
}
