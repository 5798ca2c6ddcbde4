//! Encode stage
//!
//! Keyframes carry a brotli-compressed frame. Delta frames carry the
//! compressed XOR against the previous frame, which is mostly zeros for
//! static patterns.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use log::info;
use std::io::Write;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pipeline::description::ElementSpec;
use crate::pipeline::stage::{PipelineStage, StageIo, StageRole, join_worker};
use crate::pipeline::types::MediaFrame;

/// brotli window size (log2)
const LG_WINDOW: u32 = 22;

pub(crate) fn compress(data: &[u8], quality: u32) -> Result<Vec<u8>> {
    let mut writer = brotli::CompressorWriter::new(
        Vec::with_capacity(data.len() / 4 + 16),
        4096,
        quality,
        LG_WINDOW,
    );
    writer.write_all(data).context("brotli compression")?;
    Ok(writer.into_inner())
}

fn xor(previous: &[u8], current: &[u8]) -> Vec<u8> {
    previous
        .iter()
        .zip(current)
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Decides keyframes and keeps the reference frame
struct GopState {
    gop: u32,
    since_keyframe: u32,
    reference: Option<MediaFrame>,
}

impl GopState {
    fn new(gop: u32) -> Self {
        Self {
            gop,
            since_keyframe: 0,
            reference: None,
        }
    }

    fn needs_keyframe(&self, frame: &MediaFrame) -> bool {
        match &self.reference {
            None => true,
            Some(reference) => {
                self.since_keyframe >= self.gop
                    || reference.camera != frame.camera
                    || (reference.width, reference.height) != (frame.width, frame.height)
            }
        }
    }

    fn encode(&mut self, frame: MediaFrame, quality: u32) -> Result<MediaFrame> {
        let is_keyframe = self.needs_keyframe(&frame);
        let payload = match (&self.reference, is_keyframe) {
            (Some(reference), false) => compress(&xor(&reference.data, &frame.data), quality)?,
            _ => compress(&frame.data, quality)?,
        };

        self.since_keyframe = if is_keyframe { 1 } else { self.since_keyframe + 1 };
        let encoded = MediaFrame {
            data: Bytes::from(payload),
            is_keyframe,
            ..frame.clone()
        };
        self.reference = Some(frame);
        Ok(encoded)
    }
}

pub struct Encoder {
    gop: u32,
    quality: u32,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

impl Encoder {
    pub fn from_spec(spec: &ElementSpec) -> Result<Self> {
        spec.check_known(&["gop", "quality"])?;

        let gop = spec.parse_or("gop", 30u32)?;
        let quality = spec.parse_or("quality", 5u32)?;
        if gop == 0 {
            bail!("encoder: gop must be at least 1");
        }
        if quality > 11 {
            bail!("encoder: quality {} is out of range 0..=11", quality);
        }

        Ok(Self {
            gop,
            quality,
            cancel: None,
            worker: None,
        })
    }
}

#[async_trait]
impl PipelineStage for Encoder {
    fn name(&self) -> &str {
        "encoder"
    }

    fn role(&self) -> StageRole {
        StageRole::Filter
    }

    async fn start(&mut self, mut io: StageIo) -> Result<()> {
        let mut input = io
            .input
            .take()
            .ok_or_else(|| anyhow!("encoder: no input link"))?;
        let output = io
            .output
            .take()
            .ok_or_else(|| anyhow!("encoder: no output link"))?;
        let health = io.health.clone();
        let (gop, quality) = (self.gop, self.quality);

        self.cancel = Some(io.cancel.clone());
        self.worker = Some(io.spawn_worker("encoder", async move {
            let mut state = GopState::new(gop);
            let mut total_frames = 0u64;

            while let Some(frame) = input.recv().await {
                // compression runs on the blocking pool
                let (returned, encoded) = tokio::task::spawn_blocking(move || {
                    let encoded = state.encode(frame, quality);
                    (state, encoded)
                })
                .await
                .context("encoder: compression task")?;
                state = returned;
                let encoded = encoded?;
                health.record_frame(encoded.size(), encoded.is_keyframe);
                total_frames += 1;

                if output.send(encoded).await.is_err() {
                    break;
                }
            }

            info!("encoder: finished after {} frames", total_frames);
            Ok(())
        }));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        join_worker("encoder", self.worker.take()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Timestamp;
    use std::io::Read;

    fn decompress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        brotli::Decompressor::new(data, 4096)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn frame(sequence: u64, camera: usize, fill: u8) -> MediaFrame {
        MediaFrame::raw(
            Bytes::from(vec![fill; 64]),
            Timestamp::from_micros(sequence * 33_000),
            sequence,
            camera,
            8,
            8,
        )
    }

    #[test]
    fn test_keyframe_cadence() {
        let mut state = GopState::new(3);
        let keyframes: Vec<bool> = (0..7)
            .map(|i| state.encode(frame(i, 0, 1), 1).unwrap().is_keyframe)
            .collect();
        assert_eq!(keyframes, vec![true, false, false, true, false, false, true]);
    }

    #[test]
    fn test_camera_switch_forces_keyframe() {
        let mut state = GopState::new(30);
        assert!(state.encode(frame(0, 0, 1), 1).unwrap().is_keyframe);
        assert!(!state.encode(frame(1, 0, 1), 1).unwrap().is_keyframe);
        assert!(state.encode(frame(2, 1, 1), 1).unwrap().is_keyframe);
    }

    #[test]
    fn test_frames_decode_back() {
        let mut state = GopState::new(30);
        let key = state.encode(frame(0, 0, 0x10), 5).unwrap();
        assert_eq!(decompress(&key.data), vec![0x10; 64]);

        let delta = state.encode(frame(1, 0, 0x30), 5).unwrap();
        let restored: Vec<u8> = decompress(&delta.data)
            .iter()
            .map(|d| d ^ 0x10)
            .collect();
        assert_eq!(restored, vec![0x30; 64]);
    }

    #[test]
    fn test_from_spec_validation() {
        assert!(Encoder::from_spec(&ElementSpec::new("encoder").with("gop", "0")).is_err());
        assert!(Encoder::from_spec(&ElementSpec::new("encoder").with("quality", "12")).is_err());
        let encoder = Encoder::from_spec(&ElementSpec::new("encoder")).unwrap();
        assert_eq!((encoder.gop, encoder.quality), (30, 5));
    }
}
