use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_sense::configs::credential_store::DEFAULT_CREDENTIALS_PATH;
use lib_sense::engine::state_sink::{DEFAULT_ENTITY_ID, DEFAULT_SINK_URL};
use lib_sense::engine::Login;
use lib_sense::ingestors::sense_wss::DEFAULT_WS_URL;
use lib_sense::monitors::sense::apicall::DEFAULT_API_URL;

const CONFIG_FILE_NAME: &str = "server_sense.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Sense realtime energy usage bridge", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SENSE_EMAIL", help = "Sense account email.")]
    pub email: Option<String>,

    #[clap(long, env = "SENSE_PASSWORD", hide_env_values = true, help = "Sense account password.")]
    pub password: Option<String>,

    #[clap(long, env = "SENSE_ACCESS_TOKEN", hide_env_values = true, help = "Pre-issued access token used to seed an empty credentials cache.")]
    pub access_token: Option<String>,

    #[clap(long, env = "SENSE_MONITOR_ID", help = "Monitor id that goes with --access-token.")]
    pub monitor_id: Option<String>,

    #[clap(long, env = "SENSE_CONFIG_PATH", help = "Path to the JSON settings file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SENSE_CREDENTIALS_PATH", help = "Path of the credentials cache file.")]
    pub credentials_path: Option<PathBuf>,

    #[clap(long, env = "SENSE_API_URL", help = "Base URL of the Sense REST API.")]
    pub api_url: Option<String>,

    #[clap(long, env = "SENSE_WS_URL", help = "Base URL of the Sense realtime feed.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "SENSE_SINK_URL", help = "Base URL of the state sink API.")]
    pub sink_url: Option<String>,

    #[clap(long, env = "SENSE_ENTITY_ID", help = "Entity id the realtime usage is published as.")]
    pub entity_id: Option<String>,

    #[clap(long, env = "SUPERVISOR_TOKEN", hide_env_values = true, help = "Bearer token for the state sink.")]
    pub sink_token: Option<String>,

    #[clap(long, env = "SENSE_REPORT_INTERVAL_SECONDS", help = "Seconds between two state reports.")]
    pub report_interval_seconds: Option<u64>,

    #[clap(long, env = "SENSE_STALE_TIMEOUT_SECONDS", help = "Seconds without realtime data before the feed is considered dead.")]
    pub stale_timeout_seconds: Option<u64>,

    #[clap(long, env = "SENSE_HEARTBEAT_SECONDS", help = "Seconds between two heartbeat pings.")]
    pub heartbeat_seconds: Option<u64>,

    #[clap(long, env = "SENSE_RECONNECT_DELAY_MS", help = "Delay in milliseconds before reconnecting a closed feed.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "SENSE_AUTH_RETRY_SECONDS", help = "Seconds between two failed credential attempts.")]
    pub auth_retry_seconds: Option<u64>,

    #[clap(long, env = "SENSE_AUTH_RETRY_JITTER_MS", help = "Upper bound in milliseconds of a random extra wait added to each credential retry.")]
    pub auth_retry_jitter_ms: Option<u64>,

    #[clap(long, env = "SENSE_DEBUG", num_args = 0..=1, default_missing_value = "true", value_parser = clap::builder::BoolishValueParser::new(), help = "Enable debug logging.")]
    pub debug: Option<bool>,

    #[clap(long, env = "SENSE_DISABLE_SINK", num_args = 0..=1, default_missing_value = "true", value_parser = clap::builder::BoolishValueParser::new(), help = "Log samples instead of posting them.")]
    pub disable_sink: Option<bool>,

    #[clap(long, env = "SENSE_LOG_DIR", help = "Directory for log files. Stdout only when unset.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SENSE_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            email: other.email.or(self.email),
            password: other.password.or(self.password),
            access_token: other.access_token.or(self.access_token),
            monitor_id: other.monitor_id.or(self.monitor_id),
            config_path: other.config_path.or(self.config_path),
            credentials_path: other.credentials_path.or(self.credentials_path),
            api_url: other.api_url.or(self.api_url),
            ws_url: other.ws_url.or(self.ws_url),
            sink_url: other.sink_url.or(self.sink_url),
            entity_id: other.entity_id.or(self.entity_id),
            sink_token: other.sink_token.or(self.sink_token),
            report_interval_seconds: other.report_interval_seconds.or(self.report_interval_seconds),
            stale_timeout_seconds: other.stale_timeout_seconds.or(self.stale_timeout_seconds),
            heartbeat_seconds: other.heartbeat_seconds.or(self.heartbeat_seconds),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            auth_retry_seconds: other.auth_retry_seconds.or(self.auth_retry_seconds),
            auth_retry_jitter_ms: other.auth_retry_jitter_ms.or(self.auth_retry_jitter_ms),
            debug: other.debug.or(self.debug),
            disable_sink: other.disable_sink.or(self.disable_sink),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    fn defaults() -> Config {
        Config {
            credentials_path: Some(PathBuf::from(DEFAULT_CREDENTIALS_PATH)),
            api_url: Some(DEFAULT_API_URL.to_string()),
            ws_url: Some(DEFAULT_WS_URL.to_string()),
            sink_url: Some(DEFAULT_SINK_URL.to_string()),
            entity_id: Some(DEFAULT_ENTITY_ID.to_string()),
            report_interval_seconds: Some(5),
            stale_timeout_seconds: Some(120),
            heartbeat_seconds: Some(30),
            reconnect_delay_ms: Some(1000),
            auth_retry_seconds: Some(60),
            auth_retry_jitter_ms: Some(0),
            debug: Some(false),
            disable_sink: Some(false),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }
}

pub fn load_config() -> Config {
    load_config_from(Config::parse())
}

/// Layers defaults, the settings file and `cli` (CLI arguments plus environment).
pub fn load_config_from(cli: Config) -> Config {
    // 1. Load defaults
    let mut current_config = Config::defaults();

    // 2. Load from the settings file if present.
    //    Explicit path first, then the working directory, then the user config dir.
    let config_file_path = cli.config_path.clone().unwrap_or_else(default_config_path);

    if config_file_path.exists() {
        match read_config_file(&config_file_path) {
            Ok(file_config) => current_config = current_config.merge(file_config),
            Err(e) => log::warn!("{:#}. Falling back to other sources.", e),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. Override with environment variables and CLI arguments
    current_config.merge(cli)
}

fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("sense").join(CONFIG_FILE_NAME))
        .unwrap_or(local)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub login: Option<Login>,
    /// Access token and monitor id used to seed an empty credentials cache.
    pub seed: Option<(String, String)>,
    pub credentials_path: PathBuf,
    pub api_url: String,
    pub ws_url: String,
    pub sink_url: String,
    pub entity_id: String,
    pub sink_token: Option<String>,
    pub sink_enabled: bool,
    pub report_interval: Duration,
    pub stale_after: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub auth_retry: Duration,
    pub auth_retry_jitter: Duration,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub version: String,
}

impl Settings {
    pub fn resolve(config: Config) -> Result<Settings> {
        let defaults = Config::defaults();

        let login = match (non_empty(config.email), non_empty(config.password)) {
            (Some(email), Some(password)) => Some(Login { email, password }),
            (None, None) => None,
            _ => bail!("Both email and password must be set to log in"),
        };

        let seed = match (non_empty(config.access_token), non_empty(config.monitor_id)) {
            (Some(token), Some(monitor)) => Some((token, monitor)),
            (None, _) => None,
            (Some(_), None) => bail!("An access token needs a monitor id"),
        };

        let log_level = if config.debug.unwrap_or(false) {
            "debug".to_string()
        } else {
            config.log_level.or(defaults.log_level).unwrap_or_default()
        };

        Ok(Settings {
            login,
            seed,
            credentials_path: config.credentials_path.or(defaults.credentials_path).unwrap_or_default(),
            api_url: config.api_url.or(defaults.api_url).unwrap_or_default(),
            ws_url: config.ws_url.or(defaults.ws_url).unwrap_or_default(),
            sink_url: config.sink_url.or(defaults.sink_url).unwrap_or_default(),
            entity_id: config.entity_id.or(defaults.entity_id).unwrap_or_default(),
            sink_token: non_empty(config.sink_token),
            sink_enabled: !config.disable_sink.unwrap_or(false),
            report_interval: seconds("report interval", config.report_interval_seconds.or(defaults.report_interval_seconds))?,
            stale_after: seconds("stale timeout", config.stale_timeout_seconds.or(defaults.stale_timeout_seconds))?,
            heartbeat_interval: seconds("heartbeat", config.heartbeat_seconds.or(defaults.heartbeat_seconds))?,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms.or(defaults.reconnect_delay_ms).unwrap_or_default()),
            auth_retry: Duration::from_secs(config.auth_retry_seconds.or(defaults.auth_retry_seconds).unwrap_or_default()),
            auth_retry_jitter: Duration::from_millis(config.auth_retry_jitter_ms.or(defaults.auth_retry_jitter_ms).unwrap_or_default()),
            log_dir: config.log_dir,
            log_level,
            version: std::env::var("SENSE_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn seconds(name: &str, value: Option<u64>) -> Result<Duration> {
    match value {
        Some(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => bail!("The {} must be at least one second", name),
    }
}
