// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static agent configuration: environment first, optional YAML overlay.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::stream::StreamSettings;

/// Agent version reported in heartbeats and `/status`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// On-premises edge agent: ingests camera streams, runs local detection,
/// delivers events to the cloud with offline resilience.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "parikshan-edge", version, about)]
pub struct AgentConfig {
    /// Base URL of the cloud control plane.
    #[arg(long, env = "PARIKSHAN_API_URL", default_value = "https://parikshan.ai")]
    pub api_url: String,

    /// Agent identifier issued by the cloud.
    #[arg(long, env = "AGENT_ID", default_value = "")]
    pub agent_id: String,

    /// Shared secret for agent authentication.
    #[arg(long, env = "AGENT_SECRET", default_value = "")]
    pub agent_secret: String,

    /// School code binding this agent to a site.
    #[arg(long, env = "SCHOOL_CODE", default_value = "")]
    pub school_code: String,

    /// Path of the embedded queue database.
    #[arg(long, env = "QUEUE_DB_PATH", default_value = "/app/data/queue.db")]
    pub queue_db_path: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Optional YAML overlay file.
    #[arg(long, env = "CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Port for the health/metrics surface.
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Seconds between event drain cycles.
    #[arg(long, env = "EVENT_SYNC_SECS", default_value_t = 5)]
    pub event_sync_secs: u64,

    /// Events submitted per drain cycle.
    #[arg(long, env = "EVENT_BATCH_SIZE", default_value_t = 50)]
    pub event_batch_size: usize,

    /// Seconds between heartbeats.
    #[arg(long, env = "HEARTBEAT_SECS", default_value_t = 30)]
    pub heartbeat_secs: u64,

    /// Seconds between configuration refreshes.
    #[arg(long, env = "CONFIG_REFRESH_SECS", default_value_t = 300)]
    pub config_refresh_secs: u64,

    /// Only every N-th captured frame is an inference candidate.
    #[arg(long, env = "FRAME_SKIP", default_value_t = 5)]
    pub frame_skip: u64,

    /// Minimum milliseconds between inference runs per camera.
    #[arg(long, env = "DETECTION_INTERVAL_MS", default_value_t = 1000)]
    pub detection_interval_ms: u64,

    /// Inference worker parallelism bound.
    #[arg(long, env = "DETECT_WORKERS", default_value_t = 10)]
    pub detect_workers: usize,

    /// Days terminal queue records are kept before garbage collection.
    #[arg(long, env = "EVENT_RETENTION_DAYS", default_value_t = 7)]
    pub event_retention_days: u32,
}

// -- YAML overlay --------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct OverlayFile {
    #[serde(default)]
    agent: Option<OverlayAgent>,
    #[serde(default)]
    api: Option<OverlayApi>,
    #[serde(default)]
    performance: Option<OverlayPerformance>,
}

#[derive(Debug, Deserialize)]
struct OverlayAgent {
    id: Option<String>,
    secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OverlayApi {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OverlayPerformance {
    frame_skip: Option<u64>,
    detection_interval_ms: Option<u64>,
    detect_workers: Option<usize>,
}

impl AgentConfig {
    /// Merge the YAML overlay file on top of environment values. A missing
    /// or unreadable file logs a warning and changes nothing.
    pub fn apply_overlay(&mut self) {
        let Some(path) = self.config_path.clone() else {
            return;
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "could not read config file");
                return;
            }
        };
        let overlay: OverlayFile = match serde_yaml::from_str(&contents) {
            Ok(overlay) => overlay,
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "could not parse config file");
                return;
            }
        };

        if let Some(agent) = overlay.agent {
            if let Some(id) = agent.id {
                self.agent_id = id;
            }
            if let Some(secret) = agent.secret {
                self.agent_secret = secret;
            }
        }
        if let Some(api) = overlay.api {
            if let Some(url) = api.url {
                self.api_url = url;
            }
        }
        if let Some(perf) = overlay.performance {
            if let Some(frame_skip) = perf.frame_skip {
                self.frame_skip = frame_skip;
            }
            if let Some(interval) = perf.detection_interval_ms {
                self.detection_interval_ms = interval;
            }
            if let Some(workers) = perf.detect_workers {
                self.detect_workers = workers;
            }
        }
        tracing::info!(path = %path.display(), "loaded configuration overlay");
    }

    /// Validate the configuration after parsing and overlay.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_id.is_empty() {
            anyhow::bail!("AGENT_ID must be set");
        }
        if self.agent_secret.is_empty() {
            anyhow::bail!("AGENT_SECRET must be set");
        }
        Ok(())
    }

    pub fn event_sync_interval(&self) -> Duration {
        Duration::from_secs(self.event_sync_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn config_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.config_refresh_secs)
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            frame_skip: self.frame_skip,
            detection_interval: Duration::from_millis(self.detection_interval_ms),
        }
    }
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(config: &AgentConfig) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
