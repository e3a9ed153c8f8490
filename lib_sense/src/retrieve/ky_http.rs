//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`, with optional transient-error
//! retries through `reqwest-middleware` and standardized response handling for JSON
//! and form-encoded requests.

use std::time::Duration;

use anyhow::Context;
use reqwest::{header::{AUTHORIZATION, CONTENT_TYPE}, Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

/// A standardized container for API responses.
///
/// Wraps the deserialized data along with metadata about the HTTP transaction.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
}

/// A flexible asynchronous HTTP client.
///
/// Handles base URLs, bearer tokens and, when `max_retries > 0`, automatic retries of
/// transient failures with exponential backoff.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient`.
    ///
    /// # Arguments
    /// * `base_url` - Absolute base URL, e.g. `https://api.example.com/v1/`. Relative
    ///   paths are joined onto it, so it should end with a slash.
    /// * `auth_token` - Optional bearer token sent with every request.
    /// * `max_retries` - Transient retries performed by the middleware. Callers that
    ///   own their own retry policy pass `0`.
    /// * `timeout` - Per-request timeout.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the TLS backend cannot initialise.
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        max_retries: u32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)
            .with_context(|| format!("Invalid base URL (must be absolute): {}", base_url))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sense-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let mut builder = ClientBuilder::new(http);
        if max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self {
            inner: builder.build(),
            base_url: url,
            auth_token,
        })
    }

    /// Performs a request with an optional JSON body.
    ///
    /// Non-2xx statuses are not errors: they come back with `success == false` and the
    /// raw body in `error_body`.
    ///
    /// # Errors
    /// Returns an error if URL joining, body serialization, the network call, or the
    /// decoding of a 2xx body fails.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let mut req = self.prepare(method, path)?;

        if let Some(b) = body {
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        Self::execute(req).await
    }

    /// Performs a `POST` with an `application/x-www-form-urlencoded` body.
    ///
    /// # Errors
    /// Same conditions as [`ApiClient::request`].
    pub async fn post_form<T, F>(&self, path: &str, form: &F) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        F: Serialize + ?Sized,
    {
        let req = self.prepare(Method::POST, path)?.form(form);
        Self::execute(req).await
    }

    fn prepare(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        Ok(req)
    }

    async fn execute<T: DeserializeOwned>(req: RequestBuilder) -> anyhow::Result<ApiResponse<T>> {
        let response: reqwest::Response = req.send().await?;
        let status = response.status();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
            })
        }
    }
}
