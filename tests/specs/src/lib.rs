// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenario tests: an in-process fake cloud,
//! scripted captures and a synthetic face backend that always matches the
//! first enrollment.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};

use parikshan_edge::capture::{CaptureFactory, Frame, FrameSource};
use parikshan_edge::detect::{DetectorBackends, FaceBackend};
use parikshan_edge::site::{encode_embedding, EMBEDDING_DIM};

// -- Fake cloud ----------------------------------------------------------------

/// Mutable behavior knobs for the fake cloud, shared with the test body.
pub struct FakeCloudState {
    pub logins: AtomicUsize,
    pub heartbeats: AtomicUsize,
    pub fail_login: AtomicBool,
    pub fail_events: AtomicBool,
    /// How many leading events of each batch the server accepts.
    pub accept_prefix: AtomicUsize,
    /// Lifetime of issued tokens; negative = already expired.
    pub token_ttl_secs: AtomicI64,
    pub config_doc: Mutex<serde_json::Value>,
}

pub struct FakeCloud {
    pub state: Arc<FakeCloudState>,
    base_url: String,
}

impl FakeCloud {
    pub async fn start(config_doc: serde_json::Value) -> anyhow::Result<Self> {
        let state = Arc::new(FakeCloudState {
            logins: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
            fail_login: AtomicBool::new(false),
            fail_events: AtomicBool::new(false),
            accept_prefix: AtomicUsize::new(usize::MAX),
            token_ttl_secs: AtomicI64::new(3600),
            config_doc: Mutex::new(config_doc),
        });

        let router = Router::new()
            .route("/api/edge/login", post(login))
            .route("/api/edge/config", get(config))
            .route("/api/edge/events", post(events))
            .route("/api/edge/heartbeat", post(heartbeat))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { state, base_url: format!("http://{addr}") })
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }
}

async fn login(State(s): State<Arc<FakeCloudState>>) -> (StatusCode, Json<serde_json::Value>) {
    if s.fail_login.load(Ordering::Relaxed) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "bad secret"})));
    }
    let n = s.logins.fetch_add(1, Ordering::Relaxed) + 1;
    let ttl = s.token_ttl_secs.load(Ordering::Relaxed);
    let expires_at =
        (Utc::now() + ChronoDuration::seconds(ttl)).to_rfc3339_opts(SecondsFormat::Secs, true);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "token": format!("tok-{n}"),
            "expiresAt": expires_at,
            "schoolId": 11,
        })),
    )
}

async fn config(State(s): State<Arc<FakeCloudState>>) -> (StatusCode, Json<serde_json::Value>) {
    let doc = s.config_doc.lock().map(|d| d.clone()).unwrap_or_default();
    (StatusCode::OK, Json(doc))
}

async fn events(
    State(s): State<Arc<FakeCloudState>>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    if s.fail_events.load(Ordering::Relaxed) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({})));
    }
    let count = body["events"].as_array().map(Vec::len).unwrap_or(0);
    let processed = s.accept_prefix.load(Ordering::Relaxed).min(count);
    (
        StatusCode::OK,
        Json(serde_json::json!({ "processed": processed, "failed": count - processed })),
    )
}

async fn heartbeat(State(s): State<Arc<FakeCloudState>>) -> StatusCode {
    s.heartbeats.fetch_add(1, Ordering::Relaxed);
    StatusCode::OK
}

// -- Fixtures ------------------------------------------------------------------

/// One entry camera plus one enrolled student `{STUDENT, 42, section 7}`
/// with an all-zeros embedding, thresholds at their wire defaults.
pub fn student_site_doc() -> serde_json::Value {
    serde_json::json!({
        "cameras": [
            {"id": 1, "name": "Gate", "rtspUrl": "rtsp://gate/stream", "type": "ENTRY",
             "isActive": true}
        ],
        "nvrs": [],
        "faceEncodings": [
            {"entityType": "STUDENT", "entityId": 42, "sectionId": 7,
             "encoding": encode_embedding(&vec![0.0; EMBEDDING_DIM])}
        ],
        "schoolConfig": {
            "enableFaceRecognition": true,
            "enableDisciplineAlerts": true,
            "attendanceConfidenceThreshold": 80,
            "fightConfidenceThreshold": 85,
            "crowdingThreshold": 30,
            "runningThreshold": 5
        }
    })
}

// -- Fake capture and inference ------------------------------------------------

struct EndlessSource;

impl FrameSource for EndlessSource {
    fn read(&mut self) -> anyhow::Result<Frame> {
        std::thread::sleep(Duration::from_millis(1));
        Frame::new(2, 2, Bytes::from(vec![0u8; 12]))
    }
}

struct EndlessFactory;

impl CaptureFactory for EndlessFactory {
    fn open(&self, _url: &str) -> anyhow::Result<Box<dyn FrameSource>> {
        Ok(Box::new(EndlessSource))
    }
}

/// A capture factory that connects to anything and streams blank frames.
pub fn endless_capture() -> Arc<dyn CaptureFactory> {
    Arc::new(EndlessFactory)
}

struct NearZeroFace;

impl FaceBackend for NearZeroFace {
    fn embeddings(&mut self, _frame: &Frame) -> anyhow::Result<Vec<Vec<f64>>> {
        // Distance to an all-zeros enrollment ≈ 0.011 → confidence ≈ 0.989.
        Ok(vec![vec![0.001; EMBEDDING_DIM]])
    }
}

/// Backends whose face model always reports one face close to the all-zeros
/// embedding; person detection stays unavailable.
pub fn matching_backends() -> DetectorBackends {
    DetectorBackends {
        face: Arc::new(|| Ok(Box::new(NearZeroFace) as Box<dyn FaceBackend>)),
        person: Arc::new(|| anyhow::bail!("no person backend in specs")),
    }
}
