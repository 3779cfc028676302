// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-camera detection: a composite of enabled detectors invoked on each
//! decimated frame.
//!
//! Detectors implement a narrow capability trait; the heavy model backends
//! sit behind loader closures so builds without an inference stack degrade
//! to no-op detectors instead of failing. One detector's failure never masks
//! another's output.

pub mod discipline;
pub mod face;

use std::sync::Arc;

use crate::capture::Frame;
use crate::event::EventKind;
use crate::site::{CameraKind, FaceEnrollment, SchoolConfig};

pub use self::discipline::{DisciplineDetector, PersonBackend, PersonBox};
pub use self::face::{FaceBackend, FaceDetector};

/// A structured observation produced by a detector for a single frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub kind: EventKind,
    pub data: serde_json::Value,
}

/// Capability interface for a single detector variant.
pub trait Detector: Send {
    fn name(&self) -> &'static str;
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>>;
}

/// Loader for the face recognition backend (locates faces, computes
/// embeddings). Invoked once, lazily, on the first frame.
pub type FaceBackendLoader = Arc<dyn Fn() -> anyhow::Result<Box<dyn FaceBackend>> + Send + Sync>;

/// Loader for the person detection backend.
pub type PersonBackendLoader =
    Arc<dyn Fn() -> anyhow::Result<Box<dyn PersonBackend>> + Send + Sync>;

/// The pluggable model seam handed to every stream task.
#[derive(Clone)]
pub struct DetectorBackends {
    pub face: FaceBackendLoader,
    pub person: PersonBackendLoader,
}

impl DetectorBackends {
    /// Backends for builds without an inference stack: every load fails and
    /// the detectors run as no-ops.
    pub fn unavailable() -> Self {
        Self {
            face: Arc::new(|| anyhow::bail!("no face recognition backend linked into this build")),
            person: Arc::new(|| anyhow::bail!("no person detection backend linked into this build")),
        }
    }
}

/// Runs every configured detector on a frame, concatenating results.
pub struct CompositeDetector {
    detectors: Vec<Box<dyn Detector>>,
}

impl CompositeDetector {
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Invoke each detector, swallowing per-detector errors so one failure
    /// cannot mask another detector's output.
    pub fn detect_all(&mut self, frame: &Frame) -> Vec<Detection> {
        let mut all = Vec::new();
        for detector in &mut self.detectors {
            match detector.detect(frame) {
                Ok(detections) => all.extend(detections),
                Err(e) => {
                    tracing::debug!(detector = detector.name(), err = %e, "detector failed on frame");
                }
            }
        }
        all
    }
}

/// Compose the detector set for a camera from its type and the school
/// configuration. Pure: the same inputs always yield the same composition.
pub fn build_detector(
    camera_kind: CameraKind,
    enrollments: Arc<[FaceEnrollment]>,
    school: &SchoolConfig,
    backends: &DetectorBackends,
) -> CompositeDetector {
    let mut detectors: Vec<Box<dyn Detector>> = Vec::new();

    if school.enable_face_recognition {
        detectors.push(Box::new(FaceDetector::new(
            enrollments,
            school.attendance_confidence_threshold,
            Arc::clone(&backends.face),
        )));
    }

    if school.enable_discipline_alerts
        && matches!(camera_kind, CameraKind::Corridor | CameraKind::Classroom | CameraKind::Entry)
    {
        detectors.push(Box::new(DisciplineDetector::new(
            school.fight_confidence_threshold,
            school.crowding_threshold,
            school.running_threshold,
            Arc::clone(&backends.person),
        )));
    }

    CompositeDetector { detectors }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
