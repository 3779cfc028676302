// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Video capture seam: the RTSP decoder is an external collaborator behind a
//! narrow trait, so deployments link whatever decoder they ship with and
//! tests inject scripted sources.
//!
//! Decoded frames travel from a dedicated blocking reader into the async
//! stream task over a bounded channel of capacity one: the capture buffer
//! holds a single frame and slow consumers drop frames instead of lagging.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A single decoded video frame, BGR24 interleaved.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed BGR pixel data, `width * height * 3` bytes.
    pub data: Bytes,
}

impl Frame {
    /// Build a frame, validating the buffer length against the dimensions.
    pub fn new(width: u32, height: u32, data: Bytes) -> anyhow::Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            anyhow::bail!(
                "frame buffer is {} bytes, expected {expected} for {width}x{height} BGR24",
                data.len()
            );
        }
        Ok(Self { width, height, data })
    }
}

/// A connected video source. `read` blocks until the next frame is decoded.
pub trait FrameSource: Send {
    fn read(&mut self) -> anyhow::Result<Frame>;
}

/// Opens [`FrameSource`]s for stream URLs. Implemented by the decoder
/// integration; `open` may block while the transport negotiates.
pub trait CaptureFactory: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<Box<dyn FrameSource>>;
}

/// Placeholder factory for builds without a decoder integration linked in.
/// Every `open` fails, so stream tasks sit in their reconnect backoff.
pub struct UnlinkedCapture;

impl CaptureFactory for UnlinkedCapture {
    fn open(&self, url: &str) -> anyhow::Result<Box<dyn FrameSource>> {
        anyhow::bail!("no video decoder linked into this build (url: {url})")
    }
}

/// Spawn a blocking reader that pulls frames from `source` and forwards them
/// into the returned channel.
///
/// The channel holds one frame. When the consumer is busy the current frame
/// is dropped. The channel closes when the source returns a read error or
/// `cancel` fires; the consumer observes the close as a disconnect.
pub fn spawn_reader(
    mut source: Box<dyn FrameSource>,
    cancel: CancellationToken,
) -> mpsc::Receiver<Frame> {
    let (tx, rx) = mpsc::channel(1);
    tokio::task::spawn_blocking(move || loop {
        if cancel.is_cancelled() {
            break;
        }
        match source.read() {
            Ok(frame) => match tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Consumer still chewing on the previous frame.
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            },
            Err(e) => {
                tracing::debug!(err = %e, "capture read failed");
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
#[path = "capture_tests.rs"]
mod tests;
