//! # Sense WSS Ingestor
//!
//! Realtime feed client for the Sense energy monitor.
//!
//! One session is modelled as a [`RealtimeConnection`]: an explicit state machine
//! (`Connecting → Established → Closing → Closed`) with one handler per event kind
//! (text frame, pong, heartbeat tick, report tick, termination). The handlers do
//! not touch the socket, so the whole lifecycle can be driven in tests without a
//! network. [`SenseRealtimeIngestor`] is the thin async driver that owns the
//! websocket and multiplexes frames and both timers in a single `select!` loop.
//!
//! Ingestion and egress are decoupled: `realtime_update` frames only replace the
//! current sample, and the report timer is the only thing that forwards it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};
use url::Url;

use crate::engine::forwarder::{ForwardOutcome, SampleForwarder};
use crate::engine::liveness::LivenessMonitor;
use crate::engine::state_sink::StateSink;
use crate::engine::supervisor::{SessionRunner, TerminationReason};
use crate::monitors::sense::model::{Credentials, FeedMessage, Sample};

/// Default base of the realtime feed.
pub const DEFAULT_WS_URL: &str = "wss://clientrt.sense.com/monitors";

/// Timing and endpoint settings for realtime sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub ws_url: String,
    /// Period of the report timer (sink egress rate).
    pub report_interval: Duration,
    /// Period of the heartbeat timer.
    pub heartbeat_interval: Duration,
    /// Maximum sample age before the feed is considered dead. Also bounds the
    /// connect and `hello` handshake.
    pub stale_after: Duration,
    /// Upper bound for the close handshake.
    pub close_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            report_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle of one realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Established,
    Closing,
    Closed,
}

/// What the driver must do after a text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEffect {
    None,
    /// Handshake complete: start the report and heartbeat timers.
    Established,
    Terminate(TerminationReason),
}

/// What the driver must do on a heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Not established yet (or already closing); nothing to do.
    Skip,
    SendPing,
    Terminate(TerminationReason),
}

pub struct RealtimeConnection {
    config: RealtimeConfig,
    state: ConnectionState,
    sample: Option<Sample>,
    liveness: LivenessMonitor,
    forwarder: SampleForwarder,
}

impl RealtimeConnection {
    pub fn new(config: RealtimeConfig, forwarder: SampleForwarder, now_epoch: i64) -> Self {
        Self {
            config,
            state: ConnectionState::Connecting,
            sample: None,
            liveness: LivenessMonitor::new(now_epoch),
            forwarder,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Established
    }

    pub fn sample(&self) -> Option<&Sample> {
        self.sample.as_ref()
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    /// Handles one inbound text frame received at `now_epoch`.
    pub fn on_text(&mut self, text: &str, now_epoch: i64) -> FrameEffect {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return FrameEffect::None;
        }

        let message = match FeedMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Ignoring undecodable frame: {}", e);
                return FrameEffect::None;
            }
        };

        match message {
            FeedMessage::Hello => {
                log::info!("Connection established");
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Established;
                    return FrameEffect::Established;
                }
                FrameEffect::None
            }
            FeedMessage::Error { reason } => {
                log::error!("Feed error: {}", reason);
                match reason.as_str() {
                    "Unauthorized" => FrameEffect::Terminate(TerminationReason::Unauthorized),
                    // Transient on the Sense side; liveness checks catch a feed that stays down.
                    "Unavailable" => FrameEffect::None,
                    _ => FrameEffect::None,
                }
            }
            FeedMessage::RealtimeUpdate(payload) => {
                let captured_at = self
                    .sample
                    .as_ref()
                    .map_or(now_epoch, |previous| now_epoch.max(previous.captured_at_epoch));
                self.sample = Some(Sample::from_payload(&payload, captured_at));
                self.liveness.mark_sample_received(captured_at);
                FrameEffect::None
            }
            FeedMessage::Other(kind) => {
                log::trace!("Ignoring feed message of kind {}", kind);
                FrameEffect::None
            }
        }
    }

    pub fn on_pong(&mut self) {
        self.liveness.mark_pong_received();
    }

    /// Heartbeat tick: unanswered ping first, then data staleness, else a new ping.
    pub fn on_heartbeat_tick(&mut self, now_epoch: i64) -> HeartbeatAction {
        if !self.is_established() {
            return HeartbeatAction::Skip;
        }

        if self.liveness.is_awaiting_unanswered_pong() {
            log::warn!("Heartbeat not acknowledged, terminating connection");
            return HeartbeatAction::Terminate(TerminationReason::MissedPong);
        }

        let threshold_ms = self.config.stale_after.as_millis() as i64;
        if self.liveness.is_stale(threshold_ms, now_epoch) {
            let silent_for_ms = now_epoch - self.liveness.last_sample_at_epoch();
            log::warn!("No realtime data for {} ms, terminating connection", silent_for_ms);
            return HeartbeatAction::Terminate(TerminationReason::StaleFeed { silent_for_ms });
        }

        self.liveness.mark_ping_sent();
        HeartbeatAction::SendPing
    }

    /// Report tick: hands the current sample to the forwarder.
    pub async fn on_report_tick(&mut self) -> Option<ForwardOutcome> {
        if !self.is_established() {
            return None;
        }
        let sample = self.sample.as_ref()?;
        Some(self.forwarder.forward(sample).await)
    }

    /// Any termination trigger: stop reacting to frames and ticks.
    pub fn begin_close(&mut self, reason: &TerminationReason) {
        if self.state != ConnectionState::Closed {
            log::debug!("Closing connection: {}", reason);
            self.state = ConnectionState::Closing;
        }
    }

    /// Socket teardown complete. The sample dies with the connection.
    pub fn finish_close(&mut self) {
        self.state = ConnectionState::Closed;
        self.sample = None;
    }
}

/// Builds `<base>/<monitor_id>/realtimefeed?access_token=<token>`.
pub fn feed_url(base: &str, credentials: &Credentials) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push(&credentials.monitor_id)
        .push("realtimefeed");
    url.query_pairs_mut().append_pair("access_token", &credentials.access_token);
    Ok(url)
}

fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn report_timer(period: Duration) -> Interval {
    // First tick completes immediately: report as soon as the feed is up.
    let mut timer = interval(period.max(Duration::from_millis(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

fn heartbeat_timer(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Opens realtime sessions against the Sense feed and forwards samples to a sink.
pub struct SenseRealtimeIngestor {
    config: RealtimeConfig,
    sink: Arc<dyn StateSink>,
}

impl SenseRealtimeIngestor {
    pub fn new(config: RealtimeConfig, sink: Arc<dyn StateSink>) -> Self {
        Self { config, sink }
    }

    /// Runs a session over an already opened websocket until it terminates.
    pub async fn drive<S>(&self, ws: S) -> TerminationReason
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
    {
        let mut conn = RealtimeConnection::new(
            self.config.clone(),
            SampleForwarder::new(self.sink.clone()),
            epoch_ms(),
        );
        let (mut write, mut read) = ws.split();

        let mut report: Option<Interval> = None;
        let mut heartbeat: Option<Interval> = None;
        let handshake = tokio::time::sleep(self.config.stale_after);
        tokio::pin!(handshake);

        let reason = loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match conn.on_text(text.as_str(), epoch_ms()) {
                        FrameEffect::Established => {
                            report = Some(report_timer(self.config.report_interval));
                            heartbeat = Some(heartbeat_timer(self.config.heartbeat_interval));
                        }
                        FrameEffect::Terminate(reason) => break reason,
                        FrameEffect::None => {}
                    },
                    Some(Ok(Message::Pong(_))) => conn.on_pong(),
                    Some(Ok(Message::Close(frame))) => {
                        break TerminationReason::RemoteClosed {
                            code: frame.as_ref().map(|f| u16::from(f.code)),
                            reason: frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break TerminationReason::TransportError(e.to_string()),
                    None => {
                        break TerminationReason::RemoteClosed { code: None, reason: "stream ended".to_string() };
                    }
                },
                _ = next_tick(&mut report) => {
                    conn.on_report_tick().await;
                }
                _ = next_tick(&mut heartbeat) => match conn.on_heartbeat_tick(epoch_ms()) {
                    HeartbeatAction::SendPing => {
                        if let Err(e) = write.send(Message::Ping(Default::default())).await {
                            break TerminationReason::TransportError(e.to_string());
                        }
                    }
                    HeartbeatAction::Terminate(reason) => break reason,
                    HeartbeatAction::Skip => {}
                },
                _ = &mut handshake, if !conn.is_established() => {
                    break TerminationReason::HandshakeTimeout;
                }
            }
        };

        conn.begin_close(&reason);
        if tokio::time::timeout(self.config.close_timeout, write.close()).await.is_err() {
            log::debug!("Close handshake timed out");
        }
        conn.finish_close();
        reason
    }
}

#[async_trait]
impl SessionRunner for SenseRealtimeIngestor {
    async fn run_session(&self, credentials: &Credentials) -> TerminationReason {
        let url = match feed_url(&self.config.ws_url, credentials) {
            Ok(url) => url,
            Err(e) => return TerminationReason::ConnectFailed(format!("invalid feed URL: {}", e)),
        };

        log::info!(
            "Connecting to websocket for monitor {}... (report interval: {:?})",
            credentials.monitor_id,
            self.config.report_interval
        );

        match tokio::time::timeout(self.config.stale_after, connect_async(url.as_str())).await {
            Ok(Ok((ws_stream, _))) => self.drive(ws_stream).await,
            Ok(Err(e)) => TerminationReason::ConnectFailed(e.to_string()),
            Err(_) => TerminationReason::ConnectFailed("connect timed out".to_string()),
        }
    }
}
