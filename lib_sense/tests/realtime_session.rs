//! End-to-end sessions against a loopback websocket peer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use lib_sense::engine::token_manager::{AuthApi, AuthError};
use lib_sense::engine::{ConnectionSupervisor, RetryPolicy, StateSink, StateUpdate, TerminationReason, TokenManager};
use lib_sense::engine::SessionRunner;
use lib_sense::ingestors::{RealtimeConfig, SenseRealtimeIngestor};
use lib_sense::monitors::sense::model::{AuthenticateResponse, RenewResponse};
use lib_sense::{CredentialStore, Credentials, MemoryCredentialStore};

const HELLO: &str = r#"{"type":"hello","payload":{"online":true}}"#;
const UPDATE: &str = r#"{"type":"realtime_update","payload":{"d_w":1200,"devices":[{"name":"Living Room","w":45.6}],"voltage":[120.1,119.9]}}"#;

#[derive(Default)]
struct CollectingSink {
    posted: Mutex<Vec<StateUpdate>>,
}

#[async_trait]
impl StateSink for CollectingSink {
    async fn post_state(&self, update: &StateUpdate) -> anyhow::Result<()> {
        self.posted.lock().unwrap().push(update.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RenewOnlyApi {
    renewals: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl AuthApi for RenewOnlyApi {
    async fn authenticate(&self, _email: &str, _password: &str) -> Result<AuthenticateResponse, AuthError> {
        Err(AuthError::Rejected("unexpected login".to_string()))
    }

    async fn renew(&self, user_id: &str, refresh_token: &str) -> Result<RenewResponse, AuthError> {
        self.renewals
            .lock()
            .unwrap()
            .push((user_id.to_string(), refresh_token.to_string()));
        Ok(RenewResponse {
            access_token: Some("access-2".to_string()),
            refresh_token: Some("refresh-2".to_string()),
        })
    }
}

fn credentials() -> Credentials {
    Credentials {
        access_token: "access-1".to_string(),
        refresh_token: "refresh-1".to_string(),
        user_id: "7".to_string(),
        monitor_id: "42".to_string(),
    }
}

fn fast_config(ws_url: String) -> RealtimeConfig {
    RealtimeConfig {
        ws_url,
        report_interval: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(100),
        stale_after: Duration::from_secs(10),
        close_timeout: Duration::from_millis(200),
    }
}

/// Accepts one websocket client, records the request URI and hands the socket to `script`.
async fn serve_once<F, Fut>(script: F) -> (String, JoinHandle<String>)
where
    F: FnOnce(WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("ws://{}/monitors", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_in_callback = seen.clone();
        let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen_in_callback.lock().unwrap() = req.uri().to_string();
            Ok(resp)
        })
        .await
        .unwrap();

        script(ws).await;
        let uri = seen.lock().unwrap().clone();
        uri
    });

    (base, handle)
}

async fn hello_update_then_close(mut ws: WebSocketStream<tokio::net::TcpStream>) {
    ws.send(Message::Text(HELLO.into())).await.unwrap();
    ws.send(Message::Text(UPDATE.into())).await.unwrap();
    // Keep reading so pings get their automatic pong.
    let _ = tokio::time::timeout(Duration::from_millis(400), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "bye".into(),
    }))
    .await
    .unwrap();
    while let Some(Ok(_)) = ws.next().await {}
}

#[tokio::test]
async fn test_unanswered_ping_terminates_session() {
    let (base, server) = serve_once(|mut ws| async move {
        ws.send(Message::Text(HELLO.into())).await.unwrap();
        // Never read again, so no pong ever goes back.
        tokio::time::sleep(Duration::from_secs(5)).await;
    })
    .await;

    let sink = Arc::new(CollectingSink::default());
    let ingestor = SenseRealtimeIngestor::new(fast_config(base), sink.clone());

    let reason = tokio::time::timeout(Duration::from_secs(3), ingestor.run_session(&credentials()))
        .await
        .unwrap();

    assert_eq!(reason, TerminationReason::MissedPong);
    assert!(sink.posted.lock().unwrap().is_empty());
    server.abort();
}

#[tokio::test]
async fn test_update_is_posted_once_until_remote_close() {
    let (base, server) = serve_once(hello_update_then_close).await;

    let sink = Arc::new(CollectingSink::default());
    let ingestor = SenseRealtimeIngestor::new(fast_config(base), sink.clone());

    let reason = tokio::time::timeout(Duration::from_secs(3), ingestor.run_session(&credentials()))
        .await
        .unwrap();

    assert_eq!(
        reason,
        TerminationReason::RemoteClosed {
            code: Some(1000),
            reason: "bye".to_string()
        }
    );

    let posted = sink.posted.lock().unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].state, 1200);
    assert_eq!(posted[0].attributes.devices.get("living_room"), Some(&46));
    assert_eq!(posted[0].attributes.voltage, Some([120.1, 119.9]));

    let uri = server.await.unwrap();
    assert_eq!(uri, "/monitors/42/realtimefeed?access_token=access-1");
}

#[tokio::test]
async fn test_supervisor_cycle_renews_after_session_ends() {
    let (base, server) = serve_once(hello_update_then_close).await;

    let api = Arc::new(RenewOnlyApi::default());
    let store = Arc::new(MemoryCredentialStore::new(credentials()));
    let tokens = TokenManager::new(
        api.clone(),
        store.clone(),
        None,
        RetryPolicy::fixed(Duration::from_millis(10)),
    );
    let sink = Arc::new(CollectingSink::default());
    let ingestor = Arc::new(SenseRealtimeIngestor::new(fast_config(base), sink.clone()));
    let supervisor = ConnectionSupervisor::new(tokens, ingestor, Duration::from_millis(20));

    let next = tokio::time::timeout(Duration::from_secs(3), supervisor.cycle(&credentials()))
        .await
        .unwrap();

    assert_eq!(next.access_token, "access-2");
    assert_eq!(next.refresh_token, "refresh-2");
    assert_eq!(next.monitor_id, "42");
    assert_eq!(store.load(), next);
    assert_eq!(
        *api.renewals.lock().unwrap(),
        vec![("7".to_string(), "refresh-1".to_string())]
    );
    assert_eq!(sink.posted.lock().unwrap().len(), 1);
    server.await.unwrap();
}
