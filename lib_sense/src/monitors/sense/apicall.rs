use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::engine::token_manager::{AuthApi, AuthError};
use crate::monitors::sense::model::{AuthenticateResponse, RenewResponse};
use crate::retrieve::ky_http::ApiClient;

/// Default base of the Sense REST API.
pub const DEFAULT_API_URL: &str = "https://api.sense.com/apiservice/api/v1/";

/// Client for the Sense authentication endpoints.
pub struct SenseApiCall {
    client: ApiClient,
}

impl SenseApiCall {
    /// Builds the client. No transient retries: the token manager owns the retry policy.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: ApiClient::new(base_url, None, 0, timeout)?,
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> Result<T, AuthError> {
        let response = self
            .client
            .post_form::<Value, _>(path, form)
            .await
            .map_err(|e| AuthError::Network(format!("{:#}", e)))?;

        if !response.success {
            let body = response.error_body.unwrap_or_default();
            // Sense reports bad logins as `{"status":"error"}` on a 4xx as well.
            if let Some(reason) = serde_json::from_str::<Value>(&body).ok().as_ref().and_then(error_reason) {
                return Err(AuthError::Rejected(reason));
            }
            return Err(AuthError::Http { status: response.status, body });
        }

        let body = response.data.unwrap_or(Value::Null);
        if let Some(reason) = error_reason(&body) {
            return Err(AuthError::Rejected(reason));
        }

        serde_json::from_value(body).map_err(|e| AuthError::Network(format!("Undecodable {} response: {}", path, e)))
    }
}

/// Extracts the reason of a `{"status":"error"}` body.
fn error_reason(body: &Value) -> Option<String> {
    if body.get("status").and_then(Value::as_str) != Some("error") {
        return None;
    }
    Some(
        body.get("error_reason")
            .and_then(Value::as_str)
            .unwrap_or("unspecified")
            .to_string(),
    )
}

#[async_trait]
impl AuthApi for SenseApiCall {
    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthenticateResponse, AuthError> {
        self.post("authenticate", &[("email", email), ("password", password)]).await
    }

    async fn renew(&self, user_id: &str, refresh_token: &str) -> Result<RenewResponse, AuthError> {
        self.post("renew", &[("user_id", user_id), ("refresh_token", refresh_token)]).await
    }
}
