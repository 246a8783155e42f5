//! HTTP client for the alarm daemon's API.

pub mod types;

use anyhow::{Context, Result, bail};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use types::{AlarmPatchRequest, AlarmRequest, AlarmView, ErrorView, NextWakeView, SnoozeRequest};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7786";

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v0{}", self.base_url, path)
    }

    pub async fn list_alarms(&self) -> Result<Vec<AlarmView>> {
        self.json(self.http.get(self.url("/alarms"))).await
    }

    pub async fn get_alarm(&self, id: &str) -> Result<AlarmView> {
        self.json(self.http.get(self.url(&format!("/alarms/{id}"))))
            .await
    }

    pub async fn create_alarm(&self, request: &AlarmRequest) -> Result<AlarmView> {
        self.json(self.http.post(self.url("/alarms")).json(request))
            .await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<AlarmView> {
        let patch = AlarmPatchRequest {
            enabled: Some(enabled),
        };
        self.json(
            self.http
                .patch(self.url(&format!("/alarms/{id}")))
                .json(&patch),
        )
        .await
    }

    /// Returns `None` when the alarm deleted itself on dismissal.
    pub async fn dismiss(&self, id: &str) -> Result<Option<AlarmView>> {
        self.json(self.http.post(self.url(&format!("/alarms/{id}/dismiss"))))
            .await
    }

    pub async fn snooze(&self, id: &str, minutes: Option<u32>) -> Result<AlarmView> {
        self.json(
            self.http
                .post(self.url(&format!("/alarms/{id}/snooze")))
                .json(&SnoozeRequest { minutes }),
        )
        .await
    }

    pub async fn delete_alarm(&self, id: &str) -> Result<()> {
        let response = self.send(self.http.delete(self.url(&format!("/alarms/{id}")))).await?;
        check(response).await.map(drop)
    }

    pub async fn next_wake(&self) -> Result<NextWakeView> {
        self.json(self.http.get(self.url("/next-wake"))).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base_url))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = check(self.send(request).await?).await?;
        response.json().await.context("malformed response body")
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a non-2xx response into an error carrying the server's message.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorView>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    bail!("{} ({})", message, status.as_u16())
}
