//! # State Sink
//!
//! Outbound side of the bridge: the Home Assistant Supervisor states API, or a
//! disabled sink that only logs what would have been posted.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::monitors::sense::model::Sample;
use crate::retrieve::ky_http::ApiClient;

/// Default Supervisor core API base.
pub const DEFAULT_SINK_URL: &str = "http://supervisor/core/api/";
/// Default entity the readings are published under.
pub const DEFAULT_ENTITY_ID: &str = "sensor.sense_realtime_energy_usage";

/// Body of a state update request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateUpdate {
    pub state: i64,
    pub timestamp: String,
    pub attributes: StateAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateAttributes {
    pub friendly_name: &'static str,
    pub state_class: &'static str,
    pub unit_of_measurement: &'static str,
    pub device_class: &'static str,
    pub icon: &'static str,
    pub devices: BTreeMap<String, i64>,
    pub voltage: Option<[f64; 2]>,
}

impl StateUpdate {
    /// Builds the update for a sample. `None` when the sample carries no wattage.
    pub fn from_sample(sample: &Sample, timestamp: String) -> Option<Self> {
        let watts = sample.power_watts?;
        Some(Self {
            state: watts.round() as i64,
            timestamp,
            attributes: StateAttributes {
                friendly_name: "Sense Realtime Energy Usage",
                state_class: "measurement",
                unit_of_measurement: "W",
                device_class: "power",
                icon: "mdi:flash",
                devices: sample.per_device_watts.clone(),
                voltage: sample.voltage_legs.map(|(a, b)| [a, b]),
            },
        })
    }
}

/// Receiver of state updates.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn post_state(&self, update: &StateUpdate) -> anyhow::Result<()>;
}

/// Posts to `<base>/states/<entity_id>` with the Supervisor bearer token.
pub struct HomeAssistantSink {
    client: ApiClient,
    path: String,
}

impl HomeAssistantSink {
    pub fn new(base_url: &str, entity_id: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: ApiClient::new(base_url, token, 0, timeout)?,
            path: format!("states/{}", entity_id),
        })
    }
}

#[async_trait]
impl StateSink for HomeAssistantSink {
    async fn post_state(&self, update: &StateUpdate) -> anyhow::Result<()> {
        let response = self
            .client
            .request::<Value, _>(Method::POST, &self.path, Some(update))
            .await?;
        if !response.success {
            bail!(
                "Sink answered HTTP {}: {}",
                response.status,
                response.error_body.unwrap_or_default()
            );
        }
        Ok(())
    }
}

/// Sink used when publishing is switched off.
#[derive(Debug, Default)]
pub struct DisabledSink;

#[async_trait]
impl StateSink for DisabledSink {
    async fn post_state(&self, update: &StateUpdate) -> anyhow::Result<()> {
        log::debug!("Sink disabled, dropping state {} W", update.state);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Records every update; fails when `fail` is set.
    #[derive(Default)]
    pub struct RecordingSink {
        pub posted: Mutex<Vec<StateUpdate>>,
        pub fail: bool,
    }

    impl RecordingSink {
        pub fn count(&self) -> usize {
            self.posted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl StateSink for RecordingSink {
        async fn post_state(&self, update: &StateUpdate) -> anyhow::Result<()> {
            self.posted.lock().unwrap().push(update.clone());
            if self.fail {
                bail!("sink unavailable");
            }
            Ok(())
        }
    }
}
