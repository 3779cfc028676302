// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Site state synced from the cloud: cameras, NVRs, face enrollments and the
//! school-level detection configuration.
//!
//! The cloud document is applied wholesale on every sync; cameras and
//! enrollments are replaced, never merged. Thresholds arrive as integer
//! percentages and are normalized to `[0.0, 1.0]` on ingest, which keeps
//! re-applying the same document idempotent.

use std::sync::Arc;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Dimensionality of a face embedding vector.
pub const EMBEDDING_DIM: usize = 128;

/// Fallback NVR URL template when the NVR record does not carry one.
const DEFAULT_RTSP_TEMPLATE: &str =
    "rtsp://{username}:{password}@{ip}:{port}/cam/realmonitor?channel={channel}&subtype=0";

// -- Wire document ------------------------------------------------------------

/// The configuration document returned by `GET /api/edge/config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default)]
    pub cameras: Vec<CameraDoc>,
    #[serde(default)]
    pub nvrs: Vec<NvrDoc>,
    #[serde(default)]
    pub face_encodings: Vec<FaceEncodingDoc>,
    #[serde(default)]
    pub school_config: Option<SchoolConfigDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDoc {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub rtsp_url: String,
    #[serde(default, rename = "type")]
    pub kind: CameraKind,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub nvr_id: Option<i64>,
    #[serde(default)]
    pub channel_number: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvrDoc {
    pub id: i64,
    pub name: String,
    pub ip_address: String,
    #[serde(default = "default_rtsp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub rtsp_template: String,
    #[serde(default = "default_channels")]
    pub total_channels: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceEncodingDoc {
    pub entity_type: String,
    pub entity_id: i64,
    #[serde(default)]
    pub section_id: Option<i64>,
    /// Base64 of 128 little-endian f64 values (1024 bytes).
    #[serde(default)]
    pub encoding: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolConfigDoc {
    #[serde(default = "default_true")]
    pub enable_face_recognition: bool,
    #[serde(default = "default_true")]
    pub enable_discipline_alerts: bool,
    /// Integer percentage in [0, 100].
    #[serde(default = "default_attendance_pct")]
    pub attendance_confidence_threshold: u32,
    /// Integer percentage in [0, 100].
    #[serde(default = "default_fight_pct")]
    pub fight_confidence_threshold: u32,
    #[serde(default = "default_crowding")]
    pub crowding_threshold: usize,
    #[serde(default = "default_running")]
    pub running_threshold: usize,
}

fn default_true() -> bool {
    true
}
fn default_rtsp_port() -> u16 {
    554
}
fn default_channels() -> u16 {
    16
}
fn default_attendance_pct() -> u32 {
    80
}
fn default_fight_pct() -> u32 {
    85
}
fn default_crowding() -> usize {
    30
}
fn default_running() -> usize {
    5
}

// -- Resolved site state -------------------------------------------------------

/// Camera placement category; gates which detectors run on the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraKind {
    Entry,
    Classroom,
    Corridor,
    #[default]
    #[serde(other)]
    General,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub id: i64,
    pub name: String,
    pub rtsp_url: String,
    pub kind: CameraKind,
    pub location: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct NvrConfig {
    pub id: i64,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub rtsp_template: String,
    pub total_channels: u16,
}

/// A stored face embedding associated with an identity. Immutable once
/// decoded; replaced wholesale by the next sync.
#[derive(Debug, Clone)]
pub struct FaceEnrollment {
    pub entity_type: String,
    pub entity_id: i64,
    pub section_id: Option<i64>,
    pub embedding: Vec<f64>,
}

/// School-level feature toggles and thresholds, normalized to `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SchoolConfig {
    pub enable_face_recognition: bool,
    pub enable_discipline_alerts: bool,
    pub attendance_confidence_threshold: f64,
    pub fight_confidence_threshold: f64,
    pub crowding_threshold: usize,
    pub running_threshold: usize,
}

impl Default for SchoolConfig {
    fn default() -> Self {
        Self {
            enable_face_recognition: true,
            enable_discipline_alerts: true,
            attendance_confidence_threshold: 0.80,
            fight_confidence_threshold: 0.85,
            crowding_threshold: 30,
            running_threshold: 5,
        }
    }
}

/// The full site view held by the orchestrator between syncs.
#[derive(Debug, Clone, Default)]
pub struct SiteConfig {
    pub cameras: Vec<CameraConfig>,
    pub nvrs: Vec<NvrConfig>,
    pub enrollments: Arc<[FaceEnrollment]>,
    pub school: SchoolConfig,
}

impl SiteConfig {
    /// Apply a freshly fetched cloud document, replacing the synced state.
    ///
    /// NVRs are applied before cameras so URL synthesis sees the NVR set the
    /// document itself shipped.
    pub fn apply(&mut self, doc: &ConfigDocument) {
        self.nvrs = doc
            .nvrs
            .iter()
            .map(|n| NvrConfig {
                id: n.id,
                name: n.name.clone(),
                ip_address: n.ip_address.clone(),
                port: n.port,
                username: n.username.clone(),
                password: n.password.clone(),
                rtsp_template: n.rtsp_template.clone(),
                total_channels: n.total_channels,
            })
            .collect();

        self.cameras = doc
            .cameras
            .iter()
            .map(|c| {
                let rtsp_url = if c.rtsp_url.is_empty() && c.nvr_id.is_some() {
                    self.synthesize_rtsp_url(c)
                } else {
                    c.rtsp_url.clone()
                };
                CameraConfig {
                    id: c.id,
                    name: c.name.clone(),
                    rtsp_url,
                    kind: c.kind,
                    location: c.location.clone(),
                    enabled: c.is_active,
                }
            })
            .collect();

        let mut enrollments = Vec::with_capacity(doc.face_encodings.len());
        for fe in &doc.face_encodings {
            match decode_embedding(&fe.encoding) {
                Ok(embedding) => enrollments.push(FaceEnrollment {
                    entity_type: fe.entity_type.clone(),
                    entity_id: fe.entity_id,
                    section_id: fe.section_id,
                    embedding,
                }),
                Err(e) => {
                    tracing::warn!(
                        entity_id = fe.entity_id,
                        err = %e,
                        "discarding undecodable face encoding"
                    );
                }
            }
        }
        self.enrollments = enrollments.into();

        if let Some(ref sc) = doc.school_config {
            self.school = SchoolConfig {
                enable_face_recognition: sc.enable_face_recognition,
                enable_discipline_alerts: sc.enable_discipline_alerts,
                attendance_confidence_threshold: f64::from(sc.attendance_confidence_threshold)
                    / 100.0,
                fight_confidence_threshold: f64::from(sc.fight_confidence_threshold) / 100.0,
                crowding_threshold: sc.crowding_threshold,
                running_threshold: sc.running_threshold,
            };
        }
    }

    /// Cameras eligible for streaming: enabled with a usable URL.
    pub fn active_cameras(&self) -> Vec<CameraConfig> {
        self.cameras.iter().filter(|c| c.enabled && !c.rtsp_url.is_empty()).cloned().collect()
    }

    fn synthesize_rtsp_url(&self, camera: &CameraDoc) -> String {
        let Some(nvr_id) = camera.nvr_id else {
            return String::new();
        };
        let Some(nvr) = self.nvrs.iter().find(|n| n.id == nvr_id) else {
            tracing::warn!(camera_id = camera.id, nvr_id, "camera references unknown NVR");
            return String::new();
        };
        let channel = camera.channel_number.unwrap_or(1);
        let template = if nvr.rtsp_template.is_empty() {
            DEFAULT_RTSP_TEMPLATE
        } else {
            &nvr.rtsp_template
        };
        template
            .replace("{username}", &nvr.username)
            .replace("{password}", &nvr.password)
            .replace("{ip}", &nvr.ip_address)
            .replace("{port}", &nvr.port.to_string())
            .replace("{channel}", &channel.to_string())
    }
}

/// Decode a base64 face embedding into 128 little-endian f64 values.
pub fn decode_embedding(encoded: &str) -> anyhow::Result<Vec<f64>> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    if bytes.len() != EMBEDDING_DIM * 8 {
        anyhow::bail!("embedding is {} bytes, expected {}", bytes.len(), EMBEDDING_DIM * 8);
    }
    let mut values = Vec::with_capacity(EMBEDDING_DIM);
    for chunk in bytes.chunks_exact(8) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        values.push(f64::from_le_bytes(raw));
    }
    Ok(values)
}

/// Encode an embedding back to its base64 wire form.
pub fn encode_embedding(embedding: &[f64]) -> String {
    let mut bytes = Vec::with_capacity(embedding.len() * 8);
    for v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
#[path = "site_tests.rs"]
mod tests;
