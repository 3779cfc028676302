// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Face recognition for attendance tracking.
//!
//! The frame is downsampled 2x and converted to RGB before the backend
//! locates faces and produces 128-dimensional embeddings. Matching is
//! nearest-enrollment by Euclidean distance; `confidence = 1 - distance`.

use std::sync::Arc;

use bytes::Bytes;

use crate::capture::Frame;
use crate::event::EventKind;
use crate::site::{FaceEnrollment, EMBEDDING_DIM};

use super::{Detection, Detector, FaceBackendLoader};

/// Model seam: face location + embedding extraction over an RGB frame.
pub trait FaceBackend: Send {
    /// One 128-dimensional embedding per face found in the frame.
    fn embeddings(&mut self, frame: &Frame) -> anyhow::Result<Vec<Vec<f64>>>;
}

/// Recognizes enrolled faces and emits ATTENDANCE detections.
pub struct FaceDetector {
    enrollments: Arc<[FaceEnrollment]>,
    threshold: f64,
    loader: FaceBackendLoader,
    backend: Option<Box<dyn FaceBackend>>,
    init_attempted: bool,
}

impl FaceDetector {
    pub fn new(
        enrollments: Arc<[FaceEnrollment]>,
        threshold: f64,
        loader: FaceBackendLoader,
    ) -> Self {
        Self { enrollments, threshold, loader, backend: None, init_attempted: false }
    }

    /// One-shot backend load. A load failure leaves this detector a no-op.
    fn ensure_initialized(&mut self) {
        if self.init_attempted {
            return;
        }
        self.init_attempted = true;
        match (self.loader)() {
            Ok(backend) => {
                tracing::info!(enrollments = self.enrollments.len(), "face backend loaded");
                self.backend = Some(backend);
            }
            Err(e) => {
                tracing::warn!(err = %e, "face backend unavailable, face detection disabled");
            }
        }
    }
}

impl Detector for FaceDetector {
    fn name(&self) -> &'static str {
        "face"
    }

    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        self.ensure_initialized();
        let Some(backend) = self.backend.as_mut() else {
            return Ok(Vec::new());
        };
        if self.enrollments.is_empty() {
            return Ok(Vec::new());
        }

        let small = downsample_half(frame);
        let rgb = bgr_to_rgb(&small);
        let probes = backend.embeddings(&rgb)?;

        let mut detections = Vec::new();
        for probe in &probes {
            let Some((best, distance)) = nearest_enrollment(&self.enrollments, probe) else {
                continue;
            };
            let confidence = 1.0 - distance;
            if confidence >= self.threshold {
                detections.push(Detection {
                    kind: EventKind::Attendance,
                    data: serde_json::json!({
                        "entityType": best.entity_type,
                        "entityId": best.entity_id,
                        "sectionId": best.section_id,
                        "confidence": confidence,
                    }),
                });
            }
        }
        Ok(detections)
    }
}

/// Nearest enrollment by Euclidean distance over the embedding space.
fn nearest_enrollment<'a>(
    enrollments: &'a [FaceEnrollment],
    probe: &[f64],
) -> Option<(&'a FaceEnrollment, f64)> {
    if probe.len() != EMBEDDING_DIM {
        return None;
    }
    enrollments
        .iter()
        .map(|e| (e, euclidean(&e.embedding, probe)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

/// Sample every other pixel in each axis.
pub(crate) fn downsample_half(frame: &Frame) -> Frame {
    let width = frame.width.div_ceil(2);
    let height = frame.height.div_ceil(2);
    let src = frame.data.as_ref();
    let stride = frame.width as usize * 3;

    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for y in (0..frame.height as usize).step_by(2) {
        for x in (0..frame.width as usize).step_by(2) {
            let offset = y * stride + x * 3;
            data.extend_from_slice(&src[offset..offset + 3]);
        }
    }
    Frame { width, height, data: Bytes::from(data) }
}

/// Swap the BGR channel order to RGB.
pub(crate) fn bgr_to_rgb(frame: &Frame) -> Frame {
    let mut data = frame.data.to_vec();
    for pixel in data.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }
    Frame { width: frame.width, height: frame.height, data: Bytes::from(data) }
}

#[cfg(test)]
#[path = "face_tests.rs"]
mod tests;
