// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream supervision: one long-lived task per enabled camera.
//!
//! The supervisor owns the map of stream tasks; only the orchestrator
//! mutates it (start, config update, stop). Tasks share nothing with each
//! other: detections flow out through the supervisor-wide event sink and
//! enrollment updates flow in through a shared, versioned site snapshot.

pub mod pool;
pub mod stats;
mod task;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::capture::CaptureFactory;
use crate::detect::DetectorBackends;
use crate::event::NewEvent;
use crate::site::{CameraConfig, FaceEnrollment, SchoolConfig};

use self::pool::DetectPool;
use self::stats::{StatsSnapshot, StreamStats};

/// Callback that publishes a detection event; supplied by the orchestrator.
/// Errors are logged by the stream task, never fatal to it.
pub type EventSink = Arc<dyn Fn(NewEvent) -> anyhow::Result<()> + Send + Sync>;

/// Frame pacing knobs shared by all stream tasks.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Only every N-th captured frame is an inference candidate.
    pub frame_skip: u64,
    /// Hard floor between inference runs per camera.
    pub detection_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { frame_skip: 5, detection_interval: Duration::from_millis(1000) }
    }
}

/// Enrollments and school configuration shared with running tasks. The
/// generation bumps on every sync; tasks rebuild their detector lazily on
/// the next frame when it changes.
#[derive(Debug)]
pub struct SiteSnapshot {
    pub enrollments: Arc<[FaceEnrollment]>,
    pub school: SchoolConfig,
    pub generation: u64,
}

impl SiteSnapshot {
    pub fn new(enrollments: Arc<[FaceEnrollment]>, school: SchoolConfig) -> Self {
        Self { enrollments, school, generation: 0 }
    }
}

/// One registered camera stream: its config, counters and cancel token.
pub struct StreamHandle {
    pub camera: CameraConfig,
    pub stats: StreamStats,
    pub cancel: CancellationToken,
}

/// Lifecycle manager for all camera streams.
pub struct StreamSupervisor {
    streams: RwLock<HashMap<i64, Arc<StreamHandle>>>,
    site: Arc<RwLock<SiteSnapshot>>,
    capture: Arc<dyn CaptureFactory>,
    backends: DetectorBackends,
    sink: EventSink,
    pool: DetectPool,
    settings: StreamSettings,
    shutdown: CancellationToken,
}

impl StreamSupervisor {
    pub fn new(
        capture: Arc<dyn CaptureFactory>,
        backends: DetectorBackends,
        sink: EventSink,
        settings: StreamSettings,
        detect_workers: usize,
        site: SiteSnapshot,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            site: Arc::new(RwLock::new(site)),
            capture,
            backends,
            sink,
            pool: DetectPool::new(detect_workers),
            settings,
            shutdown,
        }
    }

    /// Spawn a stream task for every eligible camera.
    pub async fn start(&self, cameras: &[CameraConfig]) {
        let mut started = 0usize;
        for camera in cameras {
            if camera.enabled && !camera.rtsp_url.is_empty() {
                self.spawn_stream(camera.clone()).await;
                started += 1;
            }
        }
        tracing::info!(streams = started, "stream supervisor started");
    }

    async fn spawn_stream(&self, camera: CameraConfig) {
        let camera_id = camera.id;
        let handle = Arc::new(StreamHandle {
            stats: StreamStats::new(camera_id),
            cancel: self.shutdown.child_token(),
            camera,
        });
        self.streams.write().await.insert(camera_id, Arc::clone(&handle));

        let ctx = task::StreamContext {
            handle,
            site: Arc::clone(&self.site),
            capture: Arc::clone(&self.capture),
            backends: self.backends.clone(),
            pool: self.pool.clone(),
            sink: Arc::clone(&self.sink),
            settings: self.settings.clone(),
        };
        tokio::spawn(task::run(ctx));
    }

    /// Apply a config sync: terminate removed cameras, spawn added ones, and
    /// swap the enrollment reference for the rest without restarting them.
    pub async fn update_config(
        &self,
        cameras: &[CameraConfig],
        enrollments: Arc<[FaceEnrollment]>,
    ) {
        {
            let mut site = self.site.write().await;
            site.enrollments = enrollments;
            site.generation += 1;
        }

        let desired: HashMap<i64, &CameraConfig> = cameras
            .iter()
            .filter(|c| c.enabled && !c.rtsp_url.is_empty())
            .map(|c| (c.id, c))
            .collect();

        let added: Vec<CameraConfig> = {
            let mut streams = self.streams.write().await;
            let stale: Vec<i64> =
                streams.keys().filter(|id| !desired.contains_key(id)).copied().collect();
            for id in stale {
                if let Some(handle) = streams.remove(&id) {
                    handle.cancel.cancel();
                    tracing::info!(camera_id = id, "stream removed by config sync");
                }
            }
            desired
                .values()
                .filter(|c| !streams.contains_key(&c.id))
                .map(|c| (*c).clone())
                .collect()
        };

        for camera in added {
            tracing::info!(camera_id = camera.id, "stream added by config sync");
            self.spawn_stream(camera).await;
        }
    }

    /// Terminate every stream task and clear the map.
    pub async fn stop(&self) {
        let mut streams = self.streams.write().await;
        for handle in streams.values() {
            handle.cancel.cancel();
        }
        streams.clear();
        tracing::info!("stream supervisor stopped");
    }

    /// Count of streams currently connected to their camera.
    pub async fn active_camera_count(&self) -> usize {
        self.streams
            .read()
            .await
            .values()
            .filter(|h| h.stats.connected.load(std::sync::atomic::Ordering::Relaxed))
            .count()
    }

    /// Count of registered streams, connected or not.
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Eventually consistent view of all per-stream counters.
    pub async fn stats_snapshot(&self) -> Vec<StatsSnapshot> {
        let mut snapshots: Vec<StatsSnapshot> =
            self.streams.read().await.values().map(|h| h.stats.snapshot()).collect();
        snapshots.sort_by_key(|s| s.camera_id);
        snapshots
    }

    /// Handle for a registered stream, if present.
    pub async fn stream_handle(&self, camera_id: i64) -> Option<Arc<StreamHandle>> {
        self.streams.read().await.get(&camera_id).map(Arc::clone)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
