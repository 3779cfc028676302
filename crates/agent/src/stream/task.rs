// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-camera stream task: connect, pull frames, decimate, pace
//! inference, publish detections, reconnect with bounded backoff.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::capture::{self, CaptureFactory, FrameSource};
use crate::detect::{build_detector, CompositeDetector, DetectorBackends};
use crate::event::NewEvent;

use super::pool::DetectPool;
use super::stats::epoch_ms;
use super::{EventSink, SiteSnapshot, StreamHandle, StreamSettings};

pub(crate) const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Next reconnect delay: doubles per consecutive failure, capped.
pub(crate) fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Everything one stream task needs, cloned out of the supervisor.
pub(crate) struct StreamContext {
    pub handle: Arc<StreamHandle>,
    pub site: Arc<RwLock<SiteSnapshot>>,
    pub capture: Arc<dyn CaptureFactory>,
    pub backends: DetectorBackends,
    pub pool: DetectPool,
    pub sink: EventSink,
    pub settings: StreamSettings,
}

enum StreamEnd {
    Cancelled,
    Lost,
}

/// Drive one camera until its token is cancelled.
pub(crate) async fn run(ctx: StreamContext) {
    let cancel = ctx.handle.cancel.clone();
    let camera_id = ctx.handle.camera.id;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        match connect(&ctx).await {
            Ok(source) => {
                backoff = INITIAL_BACKOFF;
                ctx.handle.stats.connected.store(true, Ordering::Relaxed);
                tracing::info!(camera_id, name = %ctx.handle.camera.name, "camera connected");

                let end = streaming(&ctx, source, &cancel).await;
                ctx.handle.stats.connected.store(false, Ordering::Relaxed);
                match end {
                    StreamEnd::Cancelled => break,
                    StreamEnd::Lost => {
                        tracing::warn!(camera_id, "stream lost, reconnecting");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    camera_id,
                    err = %e,
                    delay_secs = backoff.as_secs(),
                    "camera connect failed, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = next_backoff(backoff);
            }
        }
    }
    tracing::debug!(camera_id, "stream task terminated");
}

/// Open the capture on the blocking pool; RTSP negotiation may stall.
async fn connect(ctx: &StreamContext) -> anyhow::Result<Box<dyn FrameSource>> {
    let factory = Arc::clone(&ctx.capture);
    let url = ctx.handle.camera.rtsp_url.clone();
    tokio::task::spawn_blocking(move || factory.open(&url)).await?
}

async fn streaming(
    ctx: &StreamContext,
    source: Box<dyn FrameSource>,
    cancel: &CancellationToken,
) -> StreamEnd {
    let reader_cancel = cancel.child_token();
    let mut frames = capture::spawn_reader(source, reader_cancel.clone());
    let stats = &ctx.handle.stats;
    let camera = &ctx.handle.camera;
    let frame_skip = ctx.settings.frame_skip.max(1);

    let mut frame_count: u64 = 0;
    let mut last_detection: Option<Instant> = None;
    let mut detector: Option<CompositeDetector> = None;
    let mut generation = 0u64;

    let end = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => {
                    stats.errors_count.fetch_add(1, Ordering::Relaxed);
                    break StreamEnd::Lost;
                }
            }
        };
        frame_count += 1;
        stats.frames_processed.fetch_add(1, Ordering::Relaxed);
        stats.last_frame_ms.store(epoch_ms(), Ordering::Relaxed);

        // Frame decimation, then a hard floor on the inference rate.
        if frame_count % frame_skip != 0 {
            continue;
        }
        if let Some(last) = last_detection {
            if last.elapsed() < ctx.settings.detection_interval {
                continue;
            }
        }
        last_detection = Some(Instant::now());
        let started_at = Local::now().fixed_offset();

        {
            let site = ctx.site.read().await;
            if detector.is_none() || generation != site.generation {
                detector = Some(build_detector(
                    camera.kind,
                    Arc::clone(&site.enrollments),
                    &site.school,
                    &ctx.backends,
                ));
                generation = site.generation;
            }
        }
        let Some(current) = detector.take() else {
            continue;
        };

        match ctx.pool.run(current, frame).await {
            Ok((returned, detections)) => {
                detector = Some(returned);
                if !detections.is_empty() {
                    stats.detections_count.fetch_add(detections.len() as u64, Ordering::Relaxed);
                }
                for detection in detections {
                    let event = NewEvent {
                        kind: detection.kind,
                        camera_id: camera.id,
                        timestamp: started_at,
                        data: detection.data,
                    };
                    if let Err(e) = (ctx.sink)(event) {
                        stats.errors_count.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(camera_id = camera.id, err = %e, "event publication failed");
                    }
                }
            }
            Err(e) => {
                // Detector was lost with the worker; rebuilt on the next
                // candidate frame.
                stats.errors_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(camera_id = camera.id, err = %e, "detection dispatch failed");
            }
        }
    };
    reader_cancel.cancel();
    end
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
