use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use lib_sense::configs::credential_store::{CredentialStore, FileCredentialStore};
use lib_sense::engine::{ConnectionSupervisor, DisabledSink, HomeAssistantSink, RetryPolicy, StateSink, TokenManager};
use lib_sense::ingestors::{RealtimeConfig, SenseRealtimeIngestor};
use lib_sense::monitors::sense::apicall::SenseApiCall;

mod sense_logic;
use sense_logic::config::{self, Settings};
use sense_logic::logger;

/// Timeout of a single REST call (authentication or state post).
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn build_supervisor(settings: &Settings) -> Result<ConnectionSupervisor> {
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(&settings.credentials_path));
    let api = Arc::new(SenseApiCall::new(&settings.api_url, HTTP_TIMEOUT).context("Failed to build Sense API client")?);
    let tokens = TokenManager::new(
        api,
        store,
        settings.login.clone(),
        RetryPolicy::with_jitter(settings.auth_retry, settings.auth_retry_jitter),
    );

    if let Some((access_token, monitor_id)) = &settings.seed {
        tokens
            .seed(access_token, monitor_id)
            .context("Failed to seed the credentials cache")?;
    }
    if settings.login.is_none() && settings.seed.is_none() {
        log::warn!("No login configured; relying on the credentials cache at {}", settings.credentials_path.display());
    }

    let sink: Arc<dyn StateSink> = if settings.sink_enabled {
        if settings.sink_token.is_none() {
            log::warn!("SUPERVISOR_TOKEN is not set; state posts will be unauthenticated");
        }
        Arc::new(
            HomeAssistantSink::new(&settings.sink_url, &settings.entity_id, settings.sink_token.clone(), HTTP_TIMEOUT)
                .context("Failed to build state sink")?,
        )
    } else {
        log::info!("State sink disabled");
        Arc::new(DisabledSink)
    };

    let realtime = RealtimeConfig {
        ws_url: settings.ws_url.clone(),
        report_interval: settings.report_interval,
        heartbeat_interval: settings.heartbeat_interval,
        stale_after: settings.stale_after,
        ..Default::default()
    };
    let ingestor = Arc::new(SenseRealtimeIngestor::new(realtime, sink));

    Ok(ConnectionSupervisor::new(tokens, ingestor, settings.reconnect_delay))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                tokio::select! {
                    _ = signal::ctrl_c() => log::info!("Ctrl-C received, initiating shutdown."),
                    _ = term_signal.recv() => log::info!("SIGTERM received, initiating shutdown."),
                }
            }
            Err(e) => {
                log::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = signal::ctrl_c().await;
                log::info!("Ctrl-C received, initiating shutdown.");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        log::info!("Ctrl-C received, initiating shutdown.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let settings = Settings::resolve(config::load_config())?;
    logger::setup_logging(settings.log_dir.as_deref(), &settings.log_level)?;
    log::info!("Sense realtime bridge v{} starting", settings.version);

    let supervisor = build_supervisor(&settings)?;

    tokio::select! {
        _ = supervisor.run() => {}
        _ = shutdown_signal() => {}
    }

    log::info!("Shutdown complete.");
    Ok(())
}
