//! Synthetic video source
//!
//! Produces 8-bit luma frames at a fixed rate. Frames are dropped, not
//! queued, when the encoder falls behind.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use log::info;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::pipeline::description::ElementSpec;
use crate::pipeline::stage::{PipelineStage, StageIo, StageRole, join_worker};
use crate::pipeline::types::{MediaFrame, Timestamp};

/// Bar luma levels for the `smpte` pattern
const BARS: [u8; 8] = [235, 210, 180, 150, 120, 90, 60, 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Pseudo-random noise, different every frame
    Snow,
    /// Black and white, toggling every second
    Blink,
    /// Vertical bars, shifted by the active camera
    Smpte,
}

#[derive(Debug, Error)]
#[error("unknown pattern '{0}'")]
pub struct UnknownPattern(String);

impl FromStr for Pattern {
    type Err = UnknownPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snow" => Ok(Pattern::Snow),
            "blink" => Ok(Pattern::Blink),
            "smpte" => Ok(Pattern::Smpte),
            other => Err(UnknownPattern(other.to_string())),
        }
    }
}

impl Pattern {
    /// Render one frame
    pub fn render(&self, width: u32, height: u32, sequence: u64, camera: usize, pts: Timestamp) -> Vec<u8> {
        let len = (width * height) as usize;
        match self {
            Pattern::Snow => {
                let mut state = (sequence as u32).wrapping_mul(0x9E37_79B9) | 1;
                (0..len)
                    .map(|_| {
                        // xorshift32
                        state ^= state << 13;
                        state ^= state >> 17;
                        state ^= state << 5;
                        state as u8
                    })
                    .collect()
            }
            Pattern::Blink => {
                let level = if pts.as_duration().as_secs() % 2 == 0 { 0x00 } else { 0xFF };
                vec![level; len]
            }
            Pattern::Smpte => {
                let row: Vec<u8> = (0..width)
                    .map(|x| BARS[((x * 8 / width) as usize + camera) % BARS.len()])
                    .collect();
                row.repeat(height as usize)
            }
        }
    }
}

pub struct TestSource {
    pattern: Pattern,
    width: u32,
    height: u32,
    framerate: u32,
    /// Frames to produce before ending the stream; 0 means unlimited
    num_buffers: u64,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

impl TestSource {
    pub fn from_spec(spec: &ElementSpec) -> Result<Self> {
        spec.check_known(&["pattern", "width", "height", "framerate", "num-buffers"])?;

        let width = spec.parse_or("width", 320u32)?;
        let height = spec.parse_or("height", 240u32)?;
        let framerate = spec.parse_or("framerate", 30u32)?;
        if !(1..=4096).contains(&width) || !(1..=4096).contains(&height) {
            bail!("testsrc: {}x{} is out of range", width, height);
        }
        if !(1..=120).contains(&framerate) {
            bail!("testsrc: framerate {} is out of range", framerate);
        }

        Ok(Self {
            pattern: spec.parse_or("pattern", Pattern::Smpte)?,
            width,
            height,
            framerate,
            num_buffers: spec.parse_or("num-buffers", 0u64)?,
            cancel: None,
            worker: None,
        })
    }
}

#[async_trait]
impl PipelineStage for TestSource {
    fn name(&self) -> &str {
        "testsrc"
    }

    fn role(&self) -> StageRole {
        StageRole::Source
    }

    async fn start(&mut self, mut io: StageIo) -> Result<()> {
        let output = io
            .output
            .take()
            .ok_or_else(|| anyhow!("testsrc: no output link"))?;
        let mut camera_rx = io.active_camera.clone();
        let health = io.health.clone();
        let (pattern, width, height, num_buffers) =
            (self.pattern, self.width, self.height, self.num_buffers);
        let period = Duration::from_secs_f64(1.0 / self.framerate as f64);

        info!(
            "testsrc: {:?} {}x{} @ {} fps",
            pattern, width, height, self.framerate
        );

        self.cancel = Some(io.cancel.clone());
        self.worker = Some(io.spawn_worker("testsrc", async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let base = Instant::now();
            let mut camera = *camera_rx.borrow_and_update();
            let mut sequence = 0u64;

            loop {
                ticker.tick().await;
                if num_buffers > 0 && sequence >= num_buffers {
                    info!("testsrc: end of stream after {} frames", sequence);
                    return Ok(());
                }
                if camera_rx.has_changed().unwrap_or(false) {
                    camera = *camera_rx.borrow_and_update();
                    info!("testsrc: switched to camera slot {}", camera);
                }

                let pts = Timestamp::from_instant(Instant::now(), base);
                let data = pattern.render(width, height, sequence, camera, pts);
                let frame = MediaFrame::raw(Bytes::from(data), pts, sequence, camera, width, height);
                sequence += 1;

                match output.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => health.record_frame_drop(),
                    Err(TrySendError::Closed(_)) => return Ok(()),
                }
            }
        }));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        join_worker("testsrc", self.worker.take()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns() {
        let ts = Timestamp::from_micros(0);
        let snow_a = Pattern::Snow.render(16, 4, 0, 0, ts);
        let snow_b = Pattern::Snow.render(16, 4, 1, 0, ts);
        assert_eq!(snow_a.len(), 64);
        assert_ne!(snow_a, snow_b);

        assert!(Pattern::Blink.render(4, 4, 0, 0, ts).iter().all(|p| *p == 0));
        let one_second = Timestamp::from_micros(1_000_000);
        assert!(Pattern::Blink.render(4, 4, 0, 0, one_second).iter().all(|p| *p == 0xFF));

        let bars = Pattern::Smpte.render(8, 2, 0, 0, ts);
        assert_eq!(&bars[..8], &BARS);
        let shifted = Pattern::Smpte.render(8, 2, 0, 1, ts);
        assert_eq!(shifted[0], BARS[1]);
    }

    #[test]
    fn test_from_spec_validation() {
        let ok = ElementSpec::new("testsrc")
            .with("pattern", "snow")
            .with("width", "64")
            .with("height", "48");
        let source = TestSource::from_spec(&ok).unwrap();
        assert_eq!(source.pattern, Pattern::Snow);
        assert_eq!((source.width, source.height), (64, 48));

        let bad_pattern = ElementSpec::new("testsrc").with("pattern", "plaid");
        assert!(TestSource::from_spec(&bad_pattern).is_err());

        let bad_rate = ElementSpec::new("testsrc").with("framerate", "0");
        assert!(TestSource::from_spec(&bad_rate).is_err());

        let unknown = ElementSpec::new("testsrc").with("colour", "red");
        assert!(TestSource::from_spec(&unknown).is_err());
    }
}
