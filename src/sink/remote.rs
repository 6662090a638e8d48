//! HTTP violation store.
//!
//! Talks to a violation-logging server exposing `POST /violations`,
//! `GET /violations/:session_id`, `GET /sessions/:id` and
//! `POST /sessions/:id/complete` (the routes served by this crate's own
//! `server` feature).

use super::{sort_by_timestamp, ViolationStore};
use crate::collector::types::{Severity, ViolationEvent, ViolationType};
use crate::error::StoreError;
use crate::session::{Session, SessionStatus, SessionSubmitter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote store endpoint configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL, e.g. `http://127.0.0.1:3000`
    pub base_url: String,
    /// Optional bearer token
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn violations_url(&self) -> String {
        format!("{}/violations", self.base_url)
    }

    pub fn session_violations_url(&self, session_id: &str) -> String {
        format!("{}/violations/{}", self.base_url, session_id)
    }

    pub fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.base_url, session_id)
    }

    pub fn complete_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}/complete", self.base_url, session_id)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

/// Body of `POST /violations`.
#[derive(Debug, Serialize)]
struct NewViolation<'a> {
    session_id: &'a str,
    #[serde(rename = "type")]
    kind: ViolationType,
    severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Value>,
}

/// The part of `GET /sessions/:id` needed to check a session.
#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    session: Session,
}

/// Async client for a remote violation store.
pub struct RemoteStore {
    config: RemoteConfig,
    client: reqwest::Client,
    client_id: String,
}

impl RemoteStore {
    pub fn new(config: RemoteConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Network(format!("Failed to create HTTP client: {e}")))?;

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let client_id = format!(
            "exam-agent-{}-{}",
            hostname,
            &uuid::Uuid::new_v4().to_string()[..8]
        );

        Ok(Self {
            config,
            client,
            client_id,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("X-Client-Id", &self.client_id);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Check that the server answers its health endpoint.
    pub async fn test_connection(&self) -> Result<bool, StoreError> {
        let response = self
            .request(reqwest::Method::GET, self.config.health_url())
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }

    pub async fn append(&self, event: &ViolationEvent) -> Result<ViolationEvent, StoreError> {
        let body = NewViolation {
            session_id: &event.session_id,
            kind: event.kind,
            severity: event.severity,
            metadata: event.metadata.as_ref(),
        };
        let response = self
            .request(reqwest::Method::POST, self.config.violations_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        read_json(response).await
    }

    pub async fn list_by_session(&self, session_id: &str) -> Result<Vec<ViolationEvent>, StoreError> {
        let response = self
            .request(
                reqwest::Method::GET,
                self.config.session_violations_url(session_id),
            )
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        let mut events: Vec<ViolationEvent> = read_json(response).await?;
        sort_by_timestamp(&mut events);
        Ok(events)
    }

    /// Look up a session. A 404 means it does not exist.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let response = self
            .request(reqwest::Method::GET, self.config.session_url(session_id))
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: SessionEnvelope = read_json(response).await?;
        Ok(Some(envelope.session))
    }

    /// Mark a session completed. A 409 means it already was, which counts
    /// as success for a retried submission.
    pub async fn complete_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let response = self
            .request(reqwest::Method::POST, self.config.complete_url(session_id))
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(None);
        }
        read_json(response).await.map(Some)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(StoreError::Remote {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json()
        .await
        .map_err(|e| StoreError::Network(format!("Invalid response body: {e}")))
}

/// Blocking wrapper for use from the sink's writer thread.
///
/// Must not be called from inside an async runtime.
pub struct BlockingRemoteStore {
    inner: RemoteStore,
    runtime: tokio::runtime::Runtime,
}

impl BlockingRemoteStore {
    pub fn new(config: RemoteConfig) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: RemoteStore::new(config)?,
            runtime,
        })
    }

    pub fn test_connection(&self) -> Result<bool, StoreError> {
        self.runtime.block_on(self.inner.test_connection())
    }

    pub fn client_id(&self) -> &str {
        self.inner.client_id()
    }
}

impl ViolationStore for BlockingRemoteStore {
    fn append(&self, event: &ViolationEvent) -> Result<ViolationEvent, StoreError> {
        self.runtime.block_on(self.inner.append(event))
    }

    fn list_by_session(&self, session_id: &str) -> Result<Vec<ViolationEvent>, StoreError> {
        self.runtime.block_on(self.inner.list_by_session(session_id))
    }
}

impl SessionSubmitter for BlockingRemoteStore {
    fn submit_completion(&self, session_id: &str, _ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.runtime
            .block_on(self.inner.complete_session(session_id))
            .map(|_| ())
    }

    fn session_status(&self, session_id: &str) -> Result<Option<SessionStatus>, StoreError> {
        self.runtime
            .block_on(self.inner.get_session(session_id))
            .map(|session| session.map(|s| s.status))
    }
}
