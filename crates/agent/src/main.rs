// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tracing::error;

use parikshan_edge::capture::UnlinkedCapture;
use parikshan_edge::config::{self, AgentConfig};
use parikshan_edge::detect::DetectorBackends;

#[tokio::main]
async fn main() {
    let mut config = AgentConfig::parse();
    config::init_tracing(&config);
    config.apply_overlay();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    // The RTSP decoder and the inference models are deployment integrations;
    // this build wires their seams with unavailable placeholders.
    let capture = Arc::new(UnlinkedCapture);
    let backends = DetectorBackends::unavailable();

    if let Err(e) = parikshan_edge::agent::run(config, capture, backends).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
