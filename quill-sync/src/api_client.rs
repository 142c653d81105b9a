//! HTTP client for the remote write API.
//!
//! Carries the operation's declared base version and content hash so the
//! server can run its optimistic-concurrency check; a 409 response returns
//! the authoritative current version and content instead of committing.
//! Uses reqwest with JSON serialization and a hard per-request timeout.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use quill_types::QueueOperation;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of replaying one write against the remote API.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The write committed; the server assigned this version.
    Committed { version: i64 },
    /// Optimistic-concurrency rejection with the authoritative state.
    Conflict {
        current_version: i64,
        current_content: Value,
    },
}

#[derive(Deserialize)]
struct CommitResponse {
    version: i64,
}

#[derive(Deserialize)]
struct ConflictResponse {
    current_version: i64,
    current_content: Value,
}

/// Client for the remote write API and its liveness endpoint.
pub struct RemoteApiClient {
    client: Client,
    config: SyncConfig,
}

impl RemoteApiClient {
    /// Builds a client with the configured request timeout.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Probes the liveness endpoint, returning the round-trip time.
    pub async fn probe(&self) -> SyncResult<Duration> {
        let url = format!("{}{}", self.config.api_base_url, self.config.probe_path);
        let started = Instant::now();
        let resp = self.client.get(&url).send().await.map_err(map_transport)?;
        resp.error_for_status()
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;
        Ok(started.elapsed())
    }

    /// Replays one queued write.
    ///
    /// A 409 is a normal outcome here, not an error — it carries the
    /// authoritative version and content for the conflict detector. Timeouts
    /// and 5xx map to [`SyncError::TransientNetwork`]; other 4xx map to
    /// [`SyncError::Validation`].
    pub async fn push_write(&self, op: &QueueOperation) -> SyncResult<PushOutcome> {
        let url = format!("{}/api/writes", self.config.api_base_url);
        let resp = self
            .client
            .post(&url)
            .json(op)
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status();

        if status == reqwest::StatusCode::CONFLICT {
            let conflict: ConflictResponse = resp.json().await.map_err(map_transport)?;
            debug!(
                operation = %op.id,
                current_version = conflict.current_version,
                "write rejected by optimistic-concurrency check"
            );
            return Ok(PushOutcome::Conflict {
                current_version: conflict.current_version,
                current_content: conflict.current_content,
            });
        }

        if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            return Err(SyncError::TransientNetwork(format!(
                "server returned {status}"
            )));
        }

        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Validation(format!(
                "server rejected write ({status}): {body}"
            )));
        }

        let commit: CommitResponse = resp.json().await.map_err(map_transport)?;
        Ok(PushOutcome::Committed {
            version: commit.version,
        })
    }
}

/// Transport-level reqwest errors are transient by definition; everything
/// else surfaces as an HTTP error.
fn map_transport(e: reqwest::Error) -> SyncError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SyncError::TransientNetwork(e.to_string())
    } else {
        SyncError::Http(e)
    }
}
