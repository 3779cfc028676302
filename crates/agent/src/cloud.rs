// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated HTTPS client for the cloud control plane.
//!
//! Token state lives behind an `RwLock`: `login` is the only writer, every
//! other call re-authenticates through [`CloudClient::ensure_authenticated`]
//! when the token is missing or past its expiry. A failed login preserves
//! the previous token so callers decide whether to retry.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::event::{EventKind, QueuedEvent};
use crate::site::ConfigDocument;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// An authenticated cloud session.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<FixedOffset>,
    pub school_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    expires_at: String,
    school_id: i64,
}

/// Result of a batch submission. The server accepts a prefix of the batch:
/// the first `processed` events landed, the remaining `failed` did not.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SubmitOutcome {
    pub processed: usize,
    #[serde(default)]
    pub failed: usize,
}

/// Liveness report sent on every heartbeat tick.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub agent_id: String,
    pub status: String,
    pub active_cameras: usize,
    pub events_processed: u64,
    pub events_queued_offline: u64,
    pub version: String,
    pub hostname: String,
    pub ip_address: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<'a> {
    #[serde(rename = "type")]
    kind: EventKind,
    camera_id: i64,
    timestamp: &'a str,
    data: &'a serde_json::Value,
}

/// Client for the cloud edge API.
pub struct CloudClient {
    http: reqwest::Client,
    api_url: String,
    agent_id: String,
    secret: String,
    school_code: String,
    session: RwLock<Option<Session>>,
}

impl CloudClient {
    pub fn new(api_url: &str, agent_id: &str, secret: &str, school_code: &str) -> Self {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default();
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_owned(),
            agent_id: agent_id.to_owned(),
            secret: secret.to_owned(),
            school_code: school_code.to_owned(),
            session: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header("X-Agent-Id", &self.agent_id);
        match self.session.read().await.as_ref() {
            Some(session) => req.bearer_auth(&session.token),
            None => req,
        }
    }

    /// Authenticate and store the session token. Returns whether a fresh
    /// token was obtained; on failure the previous token is left in place.
    pub async fn login(&self) -> bool {
        let body = serde_json::json!({
            "agentId": self.agent_id,
            "secret": self.secret,
            "schoolCode": self.school_code,
        });
        let resp = match self.http.post(self.url("/api/edge/login")).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(err = %e, "login request failed");
                return false;
            }
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::error!(%status, body = %text, "login rejected");
            return false;
        }
        let login: LoginResponse = match resp.json().await {
            Ok(login) => login,
            Err(e) => {
                tracing::error!(err = %e, "login response undecodable");
                return false;
            }
        };
        let expires_at = match DateTime::parse_from_rfc3339(&login.expires_at) {
            Ok(ts) => ts,
            Err(e) => {
                tracing::error!(err = %e, raw = %login.expires_at, "login expiry undecodable");
                return false;
            }
        };
        let school_id = login.school_id;
        *self.session.write().await =
            Some(Session { token: login.token, expires_at, school_id });
        tracing::info!(school_id, "authenticated with cloud");
        true
    }

    /// Re-authenticate when the token is absent or expired. Other methods
    /// call this first; a failure here surfaces as their own request failing.
    pub async fn ensure_authenticated(&self) {
        let expired = match self.session.read().await.as_ref() {
            None => true,
            Some(session) => Utc::now() >= session.expires_at.with_timezone(&Utc),
        };
        if expired {
            self.login().await;
        }
    }

    /// Fetch the site configuration document. `None` on any failure; the
    /// caller keeps its current configuration.
    pub async fn get_config(&self) -> Option<ConfigDocument> {
        self.ensure_authenticated().await;
        let req = self.http.get(self.url("/api/edge/config"));
        let resp = match self.apply_auth(req).await.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(err = %e, "config fetch failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "config fetch rejected");
            return None;
        }
        match resp.json().await {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(err = %e, "config document undecodable");
                None
            }
        }
    }

    /// Submit a batch of events. On transport or server error the whole
    /// batch counts as failed.
    pub async fn submit_events(&self, events: &[QueuedEvent]) -> SubmitOutcome {
        self.ensure_authenticated().await;
        let wire: Vec<WireEvent<'_>> = events
            .iter()
            .map(|e| WireEvent {
                kind: e.kind,
                camera_id: e.camera_id,
                timestamp: &e.timestamp,
                data: &e.data,
            })
            .collect();
        let body = serde_json::json!({ "agentId": self.agent_id, "events": wire });

        let all_failed = SubmitOutcome { processed: 0, failed: events.len() };
        let req = self.http.post(self.url("/api/edge/events")).json(&body);
        let resp = match self.apply_auth(req).await.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(err = %e, count = events.len(), "event submit failed");
                return all_failed;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), count = events.len(), "event submit rejected");
            return all_failed;
        }
        match resp.json().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(err = %e, "submit response undecodable");
                all_failed
            }
        }
    }

    /// Fire-and-forget heartbeat. No retry.
    pub async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> bool {
        self.ensure_authenticated().await;
        let req = self.http.post(self.url("/api/edge/heartbeat")).json(heartbeat);
        match self.apply_auth(req).await.send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "heartbeat rejected");
                false
            }
            Err(e) => {
                tracing::warn!(err = %e, "heartbeat failed");
                false
            }
        }
    }

    /// Snapshot of the current session, if authenticated.
    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }
}

#[cfg(test)]
#[path = "cloud_tests.rs"]
mod tests;
