// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discipline event detection: crowding, running and fighting heuristics
//! over person boxes from an object detection backend.

use crate::capture::Frame;
use crate::event::EventKind;

use super::{Detection, Detector, PersonBackendLoader};

/// Backend detections below this confidence are ignored.
const PERSON_CONFIDENCE_FLOOR: f64 = 0.5;
/// Centroid displacement between consecutive frames that counts as running.
const RUNNING_DISPLACEMENT_PX: f64 = 50.0;
const CROWDING_CONFIDENCE: f64 = 0.9;
const RUNNING_CONFIDENCE: f64 = 0.85;
const FIGHT_CONFIDENCE: f64 = 0.85;

/// An axis-aligned person bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub confidence: f64,
}

impl PersonBox {
    pub fn centroid(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

/// Model seam: person detection over a BGR frame.
pub trait PersonBackend: Send {
    fn detect_persons(&mut self, frame: &Frame) -> anyhow::Result<Vec<PersonBox>>;
}

/// Emits DISCIPLINE detections from three single-pass heuristics.
pub struct DisciplineDetector {
    fight_threshold: f64,
    crowding_threshold: usize,
    running_threshold: usize,
    loader: PersonBackendLoader,
    backend: Option<Box<dyn PersonBackend>>,
    init_attempted: bool,
    /// Centroids from the previous frame, overwritten on every call.
    prev_centroids: Vec<(f64, f64)>,
}

impl DisciplineDetector {
    pub fn new(
        fight_threshold: f64,
        crowding_threshold: usize,
        running_threshold: usize,
        loader: PersonBackendLoader,
    ) -> Self {
        Self {
            fight_threshold,
            crowding_threshold,
            running_threshold,
            loader,
            backend: None,
            init_attempted: false,
            prev_centroids: Vec::new(),
        }
    }

    fn ensure_initialized(&mut self) {
        if self.init_attempted {
            return;
        }
        self.init_attempted = true;
        match (self.loader)() {
            Ok(backend) => {
                tracing::info!("person detection backend loaded");
                self.backend = Some(backend);
            }
            Err(e) => {
                tracing::warn!(err = %e, "person backend unavailable, discipline detection disabled");
            }
        }
    }

    /// Count boxes whose centroid moved more than the running displacement
    /// since the previous frame. Boxes are paired with the previous frame's
    /// by ordinal index; identity is not tracked across reordering.
    fn count_runners(&mut self, boxes: &[PersonBox]) -> usize {
        let mut current = Vec::with_capacity(boxes.len());
        let mut running = 0usize;
        for (i, person) in boxes.iter().enumerate() {
            let centroid = person.centroid();
            if let Some(prev) = self.prev_centroids.get(i) {
                let dx = centroid.0 - prev.0;
                let dy = centroid.1 - prev.1;
                if (dx * dx + dy * dy).sqrt() > RUNNING_DISPLACEMENT_PX {
                    running += 1;
                }
            }
            current.push(centroid);
        }
        self.prev_centroids = current;
        running
    }
}

impl Detector for DisciplineDetector {
    fn name(&self) -> &'static str {
        "discipline"
    }

    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        self.ensure_initialized();
        let Some(backend) = self.backend.as_mut() else {
            return Ok(Vec::new());
        };

        let boxes: Vec<PersonBox> = backend
            .detect_persons(frame)?
            .into_iter()
            .filter(|b| b.confidence > PERSON_CONFIDENCE_FLOOR)
            .collect();

        let mut detections = Vec::new();

        if boxes.len() >= self.crowding_threshold {
            detections.push(Detection {
                kind: EventKind::Discipline,
                data: serde_json::json!({
                    "eventType": "CROWDING",
                    "count": boxes.len(),
                    "confidence": CROWDING_CONFIDENCE,
                }),
            });
        }

        let running = self.count_runners(&boxes);
        if running >= self.running_threshold {
            detections.push(Detection {
                kind: EventKind::Discipline,
                data: serde_json::json!({
                    "eventType": "RUNNING",
                    "count": running,
                    "confidence": RUNNING_CONFIDENCE,
                }),
            });
        }

        let fight = fight_confidence(&boxes);
        if fight >= self.fight_threshold {
            detections.push(Detection {
                kind: EventKind::Discipline,
                data: serde_json::json!({
                    "eventType": "FIGHT",
                    "confidence": fight,
                }),
            });
        }

        Ok(detections)
    }
}

/// Fight heuristic: any two centroids closer than half the average box
/// height. Returns the fixed confidence or 0.0.
fn fight_confidence(boxes: &[PersonBox]) -> f64 {
    for i in 0..boxes.len() {
        for j in (i + 1)..boxes.len() {
            let (x1, y1) = boxes[i].centroid();
            let (x2, y2) = boxes[j].centroid();
            let distance = ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt();
            let avg_height = (boxes[i].height() + boxes[j].height()) / 2.0;
            if distance < avg_height * 0.5 {
                return FIGHT_CONFIDENCE;
            }
        }
    }
    0.0
}

#[cfg(test)]
#[path = "discipline_tests.rs"]
mod tests;
