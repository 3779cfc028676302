// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;
use std::time::Duration;

use clap::Parser;

use super::*;

fn parse(args: &[&str]) -> AgentConfig {
    let mut full = vec!["parikshan-edge"];
    full.extend_from_slice(args);
    AgentConfig::parse_from(full)
}

#[test]
fn defaults_match_the_deployment_contract() {
    let config = parse(&["--api-url", "https://cloud.example", "--agent-id", "a"]);
    assert_eq!(config.health_port, 8080);
    assert_eq!(config.event_batch_size, 50);
    assert_eq!(config.event_sync_interval(), Duration::from_secs(5));
    assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    assert_eq!(config.config_refresh_interval(), Duration::from_secs(300));
    assert_eq!(config.frame_skip, 5);
    assert_eq!(config.detection_interval_ms, 1000);
    assert_eq!(config.detect_workers, 10);
    assert_eq!(config.event_retention_days, 7);

    let settings = config.stream_settings();
    assert_eq!(settings.frame_skip, 5);
    assert_eq!(settings.detection_interval, Duration::from_millis(1000));
}

#[test]
fn validate_requires_credentials() {
    let config = parse(&["--agent-id", "", "--agent-secret", ""]);
    assert!(config.validate().is_err());

    let config = parse(&["--agent-id", "agent-1", "--agent-secret", ""]);
    assert!(config.validate().is_err());

    let config = parse(&["--agent-id", "agent-1", "--agent-secret", "s3cret"]);
    assert!(config.validate().is_ok());
}

#[test]
fn overlay_merges_on_top_of_flags() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        "agent:\n  id: from-file\n  secret: file-secret\napi:\n  url: https://file.example\nperformance:\n  frame_skip: 9\n  detection_interval_ms: 250"
    )?;

    let mut config = parse(&["--agent-id", "from-env"]);
    config.config_path = Some(file.path().to_path_buf());
    config.apply_overlay();

    assert_eq!(config.agent_id, "from-file");
    assert_eq!(config.agent_secret, "file-secret");
    assert_eq!(config.api_url, "https://file.example");
    assert_eq!(config.frame_skip, 9);
    assert_eq!(config.detection_interval_ms, 250);
    // Untouched sections keep their previous values.
    assert_eq!(config.detect_workers, 10);
    Ok(())
}

#[test]
fn partial_overlay_keeps_other_fields() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "performance:\n  detect_workers: 4")?;

    let mut config = parse(&["--agent-id", "agent-1", "--agent-secret", "s"]);
    config.config_path = Some(file.path().to_path_buf());
    config.apply_overlay();

    assert_eq!(config.detect_workers, 4);
    assert_eq!(config.agent_id, "agent-1");
    assert_eq!(config.frame_skip, 5);
    Ok(())
}

#[test]
fn missing_overlay_file_changes_nothing() {
    let mut config = parse(&["--agent-id", "agent-1"]);
    config.config_path = Some("/definitely/not/there.yaml".into());
    config.apply_overlay();
    assert_eq!(config.agent_id, "agent-1");
}

#[test]
fn malformed_overlay_is_ignored() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "{{ this is: [not, valid yaml")?;

    let mut config = parse(&["--agent-id", "agent-1"]);
    config.config_path = Some(file.path().to_path_buf());
    config.apply_overlay();
    assert_eq!(config.agent_id, "agent-1");
    Ok(())
}
