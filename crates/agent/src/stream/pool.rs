// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded worker pool for CPU-bound inference. Stream tasks hand their
//! detector and frame to a blocking worker and suspend until the result is
//! back; other camera tasks keep running meanwhile.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::capture::Frame;
use crate::detect::{CompositeDetector, Detection};

/// Semaphore-bounded dispatcher onto the blocking thread pool.
#[derive(Clone)]
pub struct DetectPool {
    permits: Arc<Semaphore>,
}

impl DetectPool {
    pub fn new(workers: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(workers.max(1))) }
    }

    /// Run one detection pass. The detector moves into the worker and back
    /// so the caller keeps its cross-frame state (motion history, lazy
    /// backends) between passes.
    pub async fn run(
        &self,
        mut detector: CompositeDetector,
        frame: Frame,
    ) -> anyhow::Result<(CompositeDetector, Vec<Detection>)> {
        let _permit = self.permits.acquire().await?;
        let result = tokio::task::spawn_blocking(move || {
            let detections = detector.detect_all(&frame);
            (detector, detections)
        })
        .await?;
        Ok(result)
    }
}
