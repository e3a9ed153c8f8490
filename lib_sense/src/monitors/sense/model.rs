//! # Sense Data Model
//!
//! Wire and domain types shared by the credential cache, the authentication client
//! and the realtime feed. Upstream is loose about identifier types (`user_id` and the
//! monitor `id` arrive as JSON numbers), so identifiers are normalised to strings on
//! the way in.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Cached Sense credentials, persisted as-is to the credentials file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, deserialize_with = "de_id")]
    pub access_token: String,
    #[serde(default, deserialize_with = "de_id")]
    pub refresh_token: String,
    #[serde(default, deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(default, deserialize_with = "de_id")]
    pub monitor_id: String,
}

impl Credentials {
    /// True when the access token can be used to open a feed.
    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// True when a silent renewal can be attempted.
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// Body of a successful `POST /authenticate`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthenticateResponse {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub access_token: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub monitors: Vec<MonitorInfo>,
}

/// One entry of the `monitors` array. Only the id is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorInfo {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
}

/// Body of a successful `POST /renew`. Both fields are required by contract but are
/// parsed leniently so the caller can report which one was missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenewResponse {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub access_token: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub refresh_token: Option<String>,
}

/// Envelope of every realtime feed frame.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// A decoded realtime feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Hello,
    Error { reason: String },
    RealtimeUpdate(RealtimePayload),
    Other(String),
}

impl FeedMessage {
    /// Decodes a text frame. Unknown kinds are preserved as `Other`.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let envelope: FeedEnvelope = serde_json::from_str(text)?;
        Ok(match envelope.kind.as_str() {
            "hello" => FeedMessage::Hello,
            "error" => FeedMessage::Error {
                reason: envelope
                    .payload
                    .get("error_reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            },
            "realtime_update" => {
                FeedMessage::RealtimeUpdate(serde_json::from_value(envelope.payload)?)
            }
            other => FeedMessage::Other(other.to_string()),
        })
    }
}

/// Payload of a `realtime_update` frame, reduced to the fields the bridge forwards.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RealtimePayload {
    #[serde(default)]
    pub d_w: Option<f64>,
    #[serde(default)]
    pub devices: Option<Vec<DeviceReading>>,
    #[serde(default)]
    pub voltage: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceReading {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub w: Option<f64>,
}

/// The latest reading held by a realtime connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub power_watts: Option<f64>,
    pub per_device_watts: BTreeMap<String, i64>,
    pub voltage_legs: Option<(f64, f64)>,
    pub captured_at_epoch: i64,
}

impl Sample {
    /// Builds a sample from a feed payload, stamping it with `captured_at_epoch` (ms).
    pub fn from_payload(payload: &RealtimePayload, captured_at_epoch: i64) -> Self {
        let per_device_watts = payload
            .devices
            .iter()
            .flatten()
            .filter_map(|device| {
                let watts = device.w?;
                Some((slugify(device.name.as_deref()?), watts.round() as i64))
            })
            .filter(|(slug, _)| !slug.is_empty())
            .collect();

        let voltage_legs = match payload.voltage.as_deref().unwrap_or_default() {
            [first, second, ..] => Some((*first, *second)),
            _ => None,
        };

        Self {
            power_watts: payload.d_w,
            per_device_watts,
            voltage_legs,
            captured_at_epoch,
        }
    }
}

/// Lower-cases a device name and collapses every run of non-alphanumerics into `_`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    de_opt_id(deserializer).map(Option::unwrap_or_default)
}
