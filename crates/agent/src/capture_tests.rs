// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::*;

fn frame(width: u32, height: u32, fill: u8) -> anyhow::Result<Frame> {
    Frame::new(width, height, Bytes::from(vec![fill; width as usize * height as usize * 3]))
}

struct ScriptedSource {
    frames: Vec<Frame>,
    index: usize,
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> anyhow::Result<Frame> {
        std::thread::sleep(Duration::from_millis(1));
        match self.frames.get(self.index) {
            Some(f) => {
                self.index += 1;
                Ok(f.clone())
            }
            None => anyhow::bail!("end of stream"),
        }
    }
}

struct EndlessSource;

impl FrameSource for EndlessSource {
    fn read(&mut self) -> anyhow::Result<Frame> {
        std::thread::sleep(Duration::from_millis(1));
        frame(2, 2, 0)
    }
}

#[test]
fn frame_length_is_validated() -> anyhow::Result<()> {
    assert!(frame(4, 4, 7).is_ok());
    assert!(Frame::new(4, 4, Bytes::from(vec![0u8; 10])).is_err());
    Ok(())
}

#[tokio::test]
async fn reader_delivers_frames_then_closes() -> anyhow::Result<()> {
    let source = ScriptedSource { frames: vec![frame(2, 2, 1)?, frame(2, 2, 2)?, frame(2, 2, 3)?], index: 0 };
    let mut rx = spawn_reader(Box::new(source), CancellationToken::new());

    let mut received = 0usize;
    while let Some(f) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await? {
        assert_eq!(f.width, 2);
        received += 1;
    }
    // The capacity-one buffer may drop frames, but never all of them, and
    // the channel must close once the source errors out.
    assert!(received >= 1);
    assert!(received <= 3);
    Ok(())
}

#[tokio::test]
async fn reader_stops_on_cancel() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut rx = spawn_reader(Box::new(EndlessSource), cancel.clone());

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await?;
    assert!(first.is_some());

    cancel.cancel();
    // Drain anything buffered; the channel must then close.
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await? {
            Some(_) => continue,
            None => break,
        }
    }
    Ok(())
}
