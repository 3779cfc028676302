// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator: boots components in order, runs the periodic loops and
//! unwinds everything on shutdown.
//!
//! Boot is fail-fast: a queue that cannot open or an initial login that is
//! rejected aborts the process. Everything after boot is resilient, with
//! loops logging transient failures and trying again on their next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::CaptureFactory;
use crate::cloud::{CloudClient, Heartbeat};
use crate::config::{AgentConfig, VERSION};
use crate::detect::DetectorBackends;
use crate::event::NewEvent;
use crate::health::{self, HealthState};
use crate::queue::EventQueue;
use crate::site::SiteConfig;
use crate::stream::{EventSink, SiteSnapshot, StreamSupervisor};

const GC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Run the agent until a shutdown signal arrives.
pub async fn run(
    config: AgentConfig,
    capture: Arc<dyn CaptureFactory>,
    backends: DetectorBackends,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    run_with_shutdown(config, capture, backends, shutdown).await
}

/// Run the agent against an externally controlled shutdown token.
pub async fn run_with_shutdown(
    config: AgentConfig,
    capture: Arc<dyn CaptureFactory>,
    backends: DetectorBackends,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(version = VERSION, agent_id = %config.agent_id, "starting edge agent");

    let queue = Arc::new(EventQueue::open(&config.queue_db_path)?);

    let cloud = Arc::new(CloudClient::new(
        &config.api_url,
        &config.agent_id,
        &config.agent_secret,
        &config.school_code,
    ));
    if !cloud.login().await {
        anyhow::bail!("initial authentication with the cloud failed");
    }

    let mut site = SiteConfig::default();
    match cloud.get_config().await {
        Some(doc) => {
            site.apply(&doc);
            info!(
                cameras = site.cameras.len(),
                enrollments = site.enrollments.len(),
                "configuration synced from cloud"
            );
        }
        None => warn!("no configuration received from cloud, starting with empty camera set"),
    }

    let sink: EventSink = {
        let queue = Arc::clone(&queue);
        Arc::new(move |event: NewEvent| queue.enqueue(&event).map(|_| ()))
    };
    let supervisor = Arc::new(StreamSupervisor::new(
        capture,
        backends,
        sink,
        config.stream_settings(),
        config.detect_workers,
        SiteSnapshot::new(Arc::clone(&site.enrollments), site.school.clone()),
        shutdown.child_token(),
    ));

    let health_state = Arc::new(HealthState {
        ready: AtomicBool::new(false),
        agent_id: config.agent_id.clone(),
        version: VERSION.to_owned(),
        queue: Arc::clone(&queue),
        streams: Arc::clone(&supervisor),
    });
    start_health_server(&config, Arc::clone(&health_state), shutdown.clone()).await?;

    supervisor.start(&site.active_cameras()).await;
    health_state.ready.store(true, Ordering::Release);

    spawn_drain_loop(
        Arc::clone(&queue),
        Arc::clone(&cloud),
        config.event_sync_interval(),
        config.event_batch_size,
        shutdown.clone(),
    );
    spawn_heartbeat_loop(
        Arc::clone(&cloud),
        Arc::clone(&queue),
        Arc::clone(&supervisor),
        config.agent_id.clone(),
        config.heartbeat_interval(),
        shutdown.clone(),
    );
    spawn_refresh_loop(
        Arc::clone(&cloud),
        Arc::clone(&supervisor),
        site,
        config.config_refresh_interval(),
        shutdown.clone(),
    );
    spawn_gc_loop(Arc::clone(&queue), config.event_retention_days, shutdown.clone());
    info!("all services started");

    shutdown.cancelled().await;

    info!("stopping edge agent");
    health_state.ready.store(false, Ordering::Release);
    supervisor.stop().await;
    queue.flush()?;
    info!("edge agent stopped");
    Ok(())
}

/// One event drain cycle: submit the oldest pending batch and record the
/// prefix the server accepted.
pub async fn drain_once(
    queue: &EventQueue,
    cloud: &CloudClient,
    batch_size: usize,
) -> anyhow::Result<()> {
    let events = queue.get_pending(batch_size)?;
    if events.is_empty() {
        return Ok(());
    }
    let outcome = cloud.submit_events(&events).await;
    let processed = outcome.processed.min(events.len());
    let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
    queue.mark_processed(&ids[..processed])?;
    queue.mark_failed(&ids[processed..])?;
    info!(processed, failed = ids.len() - processed, "event batch drained");
    Ok(())
}

fn spawn_drain_loop(
    queue: Arc<EventQueue>,
    cloud: Arc<CloudClient>,
    period: Duration,
    batch_size: usize,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = drain_once(&queue, &cloud, batch_size).await {
                warn!(err = %e, "event drain failed");
            }
        }
    });
}

fn spawn_heartbeat_loop(
    cloud: Arc<CloudClient>,
    queue: Arc<EventQueue>,
    supervisor: Arc<StreamSupervisor>,
    agent_id: String,
    period: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let heartbeat = Heartbeat {
                agent_id: agent_id.clone(),
                status: "ONLINE".to_owned(),
                active_cameras: supervisor.active_camera_count().await,
                events_processed: queue.processed_count(),
                events_queued_offline: queue.pending_count().unwrap_or(0),
                version: VERSION.to_owned(),
                hostname: hostname(),
                ip_address: local_ip(),
            };
            cloud.send_heartbeat(&heartbeat).await;
        }
    });
}

fn spawn_refresh_loop(
    cloud: Arc<CloudClient>,
    supervisor: Arc<StreamSupervisor>,
    mut site: SiteConfig,
    period: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        // Sleep first: the boot sequence already synced once.
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let Some(doc) = cloud.get_config().await else {
                warn!("config refresh failed, keeping current configuration");
                continue;
            };
            site.apply(&doc);
            supervisor
                .update_config(&site.active_cameras(), Arc::clone(&site.enrollments))
                .await;
            info!(
                cameras = site.cameras.len(),
                enrollments = site.enrollments.len(),
                "configuration refreshed"
            );
        }
    });
}

fn spawn_gc_loop(queue: Arc<EventQueue>, retention_days: u32, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + GC_INTERVAL, GC_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = queue.cleanup_old(retention_days) {
                warn!(err = %e, "queue cleanup failed");
            }
        }
    });
}

async fn start_health_server(
    config: &AgentConfig,
    state: Arc<HealthState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", config.health_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "health surface listening");
    let router = health::build_router(state);
    tokio::spawn(async move {
        if let Err(e) =
            axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await
        {
            tracing::error!(err = %e, "health surface terminated");
        }
    });
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    tracing::error!(err = %e, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("shutdown signal received");
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });
}

/// Node name reported in heartbeats.
fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned())
}

/// Local address as seen on the default route. Connecting a UDP socket
/// sends no packets.
fn local_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "unknown".to_owned())
}
