// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: frames in, durable events out, delivered to a fake
//! cloud across outages, retries and token expiry.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use parikshan_edge::agent::{self, drain_once};
use parikshan_edge::cloud::CloudClient;
use parikshan_edge::config::AgentConfig;
use parikshan_edge::event::{EventKind, NewEvent};
use parikshan_edge::queue::EventQueue;
use parikshan_edge::site::SiteConfig;
use parikshan_edge::stream::{EventSink, SiteSnapshot, StreamSettings, StreamSupervisor};

use edge_specs::{endless_capture, matching_backends, student_site_doc, FakeCloud};

const TIMEOUT: Duration = Duration::from_secs(10);

fn open_queue(tmp: &tempfile::TempDir) -> anyhow::Result<Arc<EventQueue>> {
    Ok(Arc::new(EventQueue::open(&tmp.path().join("queue.db"))?))
}

fn sample_event(marker: i64) -> NewEvent {
    NewEvent {
        kind: EventKind::Discipline,
        camera_id: 2,
        timestamp: Local::now().fixed_offset(),
        data: serde_json::json!({ "marker": marker }),
    }
}

// -- Scenario: happy-path attendance ------------------------------------------

#[tokio::test]
async fn attendance_flows_from_frame_to_processed_event() -> anyhow::Result<()> {
    let cloud = FakeCloud::start(student_site_doc()).await?;
    let tmp = tempfile::tempdir()?;
    let queue = open_queue(&tmp)?;
    let client = CloudClient::new(cloud.url(), "agent-1", "s3cret", "SCH-1");
    anyhow::ensure!(client.login().await, "login must succeed");

    let mut site = SiteConfig::default();
    let doc = client.get_config().await.ok_or_else(|| anyhow::anyhow!("no config served"))?;
    site.apply(&doc);
    assert_eq!(site.enrollments.len(), 1);

    let sink: EventSink = {
        let queue = Arc::clone(&queue);
        Arc::new(move |event| queue.enqueue(&event).map(|_| ()))
    };
    let supervisor = Arc::new(StreamSupervisor::new(
        endless_capture(),
        matching_backends(),
        sink,
        StreamSettings { frame_skip: 1, detection_interval: Duration::from_millis(50) },
        2,
        SiteSnapshot::new(Arc::clone(&site.enrollments), site.school.clone()),
        CancellationToken::new(),
    ));
    supervisor.start(&site.active_cameras()).await;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while queue.pending_count()? == 0 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no attendance event enqueued");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    supervisor.stop().await;
    // Let any in-flight detection settle before counting.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pending = queue.get_pending(50)?;
    let first = pending.first().ok_or_else(|| anyhow::anyhow!("queue drained itself?"))?;
    assert_eq!(first.kind, EventKind::Attendance);
    assert_eq!(first.camera_id, 1);
    assert_eq!(first.data["entityType"], "STUDENT");
    assert_eq!(first.data["entityId"], 42);
    assert_eq!(first.data["sectionId"], 7);
    let confidence = first.data["confidence"]
        .as_f64()
        .ok_or_else(|| anyhow::anyhow!("missing confidence"))?;
    assert!(confidence >= 0.80, "confidence {confidence}");

    let total = queue.pending_count()?;
    assert!(total >= 1);
    while queue.pending_count()? > 0 {
        drain_once(&queue, &client, 50).await?;
    }
    assert!(queue.processed_count() >= total);
    assert_eq!(queue.stats()?.failed, 0);
    Ok(())
}

// -- Scenario: offline buffering ----------------------------------------------

#[tokio::test]
async fn offline_events_buffer_without_failing_and_recover() -> anyhow::Result<()> {
    let cloud = FakeCloud::start(serde_json::json!({})).await?;
    let tmp = tempfile::tempdir()?;
    let queue = open_queue(&tmp)?;
    let client = CloudClient::new(cloud.url(), "agent-1", "s3cret", "SCH-1");
    anyhow::ensure!(client.login().await);

    cloud.state.fail_events.store(true, Ordering::Relaxed);
    for marker in 0..10 {
        queue.enqueue(&sample_event(marker))?;
    }
    for _ in 0..3 {
        drain_once(&queue, &client, 50).await?;
    }

    let stats = queue.stats()?;
    assert_eq!(stats.pending, 10, "outage must not lose events");
    assert_eq!(stats.failed, 0, "short outages must not exhaust retries");

    cloud.state.fail_events.store(false, Ordering::Relaxed);
    drain_once(&queue, &client, 50).await?;

    let stats = queue.stats()?;
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.total_processed, 10);
    assert_eq!(queue.processed_count(), 10);
    Ok(())
}

// -- Scenario: retry exhaustion -----------------------------------------------

#[tokio::test]
async fn five_rejected_drains_make_an_event_terminal() -> anyhow::Result<()> {
    let cloud = FakeCloud::start(serde_json::json!({})).await?;
    let tmp = tempfile::tempdir()?;
    let queue = open_queue(&tmp)?;
    let client = CloudClient::new(cloud.url(), "agent-1", "s3cret", "SCH-1");
    anyhow::ensure!(client.login().await);

    // The server answers 200 but accepts nothing.
    cloud.state.accept_prefix.store(0, Ordering::Relaxed);
    queue.enqueue(&sample_event(1))?;

    for _ in 0..4 {
        drain_once(&queue, &client, 50).await?;
    }
    let pending = queue.get_pending(50)?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 4);

    drain_once(&queue, &client, 50).await?;
    let stats = queue.stats()?;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
    assert!(queue.get_pending(50)?.is_empty(), "terminal events are never re-drained");

    // Further drains are no-ops.
    drain_once(&queue, &client, 50).await?;
    assert_eq!(queue.stats()?.failed, 1);
    Ok(())
}

// -- Scenario: token expiry mid-run -------------------------------------------

#[tokio::test]
async fn expired_tokens_reauthenticate_without_losing_events() -> anyhow::Result<()> {
    let cloud = FakeCloud::start(serde_json::json!({})).await?;
    cloud.state.token_ttl_secs.store(-5, Ordering::Relaxed);
    let tmp = tempfile::tempdir()?;
    let queue = open_queue(&tmp)?;
    let client = CloudClient::new(cloud.url(), "agent-1", "s3cret", "SCH-1");
    anyhow::ensure!(client.login().await);
    assert_eq!(cloud.state.logins.load(Ordering::Relaxed), 1);

    queue.enqueue(&sample_event(1))?;
    drain_once(&queue, &client, 50).await?;

    assert!(cloud.state.logins.load(Ordering::Relaxed) >= 2, "expiry must re-authenticate");
    assert_eq!(queue.processed_count(), 1);
    assert_eq!(queue.pending_count()?, 0);
    Ok(())
}

// -- Scenario: full boot and graceful shutdown --------------------------------

fn agent_config(api_url: &str, tmp: &tempfile::TempDir) -> AgentConfig {
    let db = tmp.path().join("queue.db").display().to_string();
    let args: Vec<String> = [
        "parikshan-edge",
        "--api-url",
        api_url,
        "--agent-id",
        "agent-1",
        "--agent-secret",
        "s3cret",
        "--school-code",
        "SCH-1",
        "--queue-db-path",
        &db,
        "--health-port",
        "0",
        "--event-sync-secs",
        "1",
        "--heartbeat-secs",
        "1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    AgentConfig::parse_from(args)
}

#[tokio::test]
async fn agent_boots_heartbeats_and_shuts_down_cleanly() -> anyhow::Result<()> {
    let cloud = FakeCloud::start(student_site_doc()).await?;
    let tmp = tempfile::tempdir()?;
    let config = agent_config(cloud.url(), &tmp);

    let shutdown = CancellationToken::new();
    let agent = tokio::spawn(agent::run_with_shutdown(
        config,
        endless_capture(),
        matching_backends(),
        shutdown.clone(),
    ));

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while cloud.state.heartbeats.load(Ordering::Relaxed) == 0 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no heartbeat arrived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown.cancel();
    agent.await??;
    Ok(())
}

#[tokio::test]
async fn rejected_initial_authentication_is_fatal() -> anyhow::Result<()> {
    let cloud = FakeCloud::start(serde_json::json!({})).await?;
    cloud.state.fail_login.store(true, Ordering::Relaxed);
    let tmp = tempfile::tempdir()?;
    let config = agent_config(cloud.url(), &tmp);

    let result = agent::run_with_shutdown(
        config,
        endless_capture(),
        matching_backends(),
        CancellationToken::new(),
    )
    .await;

    match result {
        Err(e) => assert!(e.to_string().contains("authentication"), "{e}"),
        Ok(()) => anyhow::bail!("boot must fail when login is rejected"),
    }
    Ok(())
}
