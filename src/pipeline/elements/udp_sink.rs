//! Network sink
//!
//! Sends every encoded frame to the stream endpoint as one or more UDP
//! datagrams. Each datagram starts with a 16-byte big-endian header:
//!
//! ```text
//! | frame seq u32 | fragment idx u16 | fragment count u16 | pts micros u64 |
//! ```

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pipeline::description::ElementSpec;
use crate::pipeline::stage::{PipelineStage, StageIo, StageRole, join_worker};
use crate::pipeline::types::MediaFrame;

pub const HEADER_LEN: usize = 16;

/// Largest UDP payload over IPv4
const MAX_DATAGRAM: usize = 65_507;

/// Parse `udp://host:port`
pub fn parse_location(location: &str) -> Result<SocketAddr> {
    let addr = location
        .strip_prefix("udp://")
        .ok_or_else(|| anyhow!("location '{}' is not a udp:// address", location))?;
    addr.parse()
        .with_context(|| format!("location '{}' is not host:port", location))
}

/// Split a frame into datagrams of at most `mtu` bytes
pub fn packetize(frame: &MediaFrame, mtu: usize) -> Result<Vec<Bytes>> {
    let chunk = mtu - HEADER_LEN;
    let count = frame.data.len().div_ceil(chunk).max(1);
    let count = u16::try_from(count)
        .map_err(|_| anyhow!("frame of {} bytes needs too many fragments", frame.data.len()))?;

    let mut packets = Vec::with_capacity(count as usize);
    for idx in 0..count {
        let start = idx as usize * chunk;
        let end = (start + chunk).min(frame.data.len());

        let mut packet = BytesMut::with_capacity(HEADER_LEN + end - start);
        packet.put_u32(frame.sequence as u32);
        packet.put_u16(idx);
        packet.put_u16(count);
        packet.put_u64(frame.pts.micros);
        packet.extend_from_slice(&frame.data[start..end]);
        packets.push(packet.freeze());
    }
    Ok(packets)
}

pub struct UdpSink {
    target: SocketAddr,
    mtu: usize,
    socket: Option<Arc<UdpSocket>>,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

impl UdpSink {
    pub fn from_spec(spec: &ElementSpec) -> Result<Self> {
        spec.check_known(&["location", "mtu"])?;

        let target = parse_location(spec.require("location")?)?;
        let mtu = spec.parse_or("mtu", 1200usize)?;
        if mtu <= HEADER_LEN || mtu > MAX_DATAGRAM {
            bail!("udpsink: mtu {} is out of range", mtu);
        }

        Ok(Self {
            target,
            mtu,
            socket: None,
            cancel: None,
            worker: None,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl PipelineStage for UdpSink {
    fn name(&self) -> &str {
        "udpsink"
    }

    fn role(&self) -> StageRole {
        StageRole::Sink
    }

    async fn start(&mut self, mut io: StageIo) -> Result<()> {
        let mut input = io
            .input
            .take()
            .ok_or_else(|| anyhow!("udpsink: no input link"))?;

        let bind_addr = if self.target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("udpsink: bind {}", bind_addr))?;
        socket
            .connect(self.target)
            .await
            .with_context(|| format!("udpsink: connect {}", self.target))?;
        let socket = Arc::new(socket);
        info!(
            "udpsink: sending to udp://{} from {:?}",
            self.target,
            socket.local_addr().ok()
        );

        let health = io.health.clone();
        let mtu = self.mtu;
        let worker_socket = Arc::clone(&socket);
        self.socket = Some(socket);
        self.cancel = Some(io.cancel.clone());
        self.worker = Some(io.spawn_worker("udpsink", async move {
            let mut frames = 0u64;
            while let Some(frame) = input.recv().await {
                let packets = match packetize(&frame, mtu) {
                    Ok(packets) => packets,
                    Err(e) => {
                        debug!("udpsink: dropping frame {}: {:#}", frame.sequence, e);
                        health.record_frame_drop();
                        continue;
                    }
                };
                for packet in packets {
                    // nobody listening is not fatal for a broadcast-style sink
                    match worker_socket.send(&packet).await {
                        Ok(_) => health.record_packet(),
                        Err(e) => {
                            health.record_network_error();
                            debug!("udpsink: send failed: {}", e);
                        }
                    }
                }
                frames += 1;
            }
            info!("udpsink: finished after {} frames", frames);
            Ok(())
        }));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        join_worker("udpsink", self.worker.take()).await;
        if self.socket.take().is_some() {
            info!("udpsink: released socket for udp://{}", self.target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Timestamp;

    fn frame(len: usize) -> MediaFrame {
        MediaFrame::raw(
            Bytes::from(vec![7u8; len]),
            Timestamp::from_micros(42),
            9,
            0,
            1,
            1,
        )
    }

    #[test]
    fn test_packetize_splits_on_mtu() {
        let packets = packetize(&frame(250), 116).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].len(), 116);
        assert_eq!(packets[2].len(), HEADER_LEN + 50);

        let header = &packets[1][..HEADER_LEN];
        assert_eq!(&header[0..4], &9u32.to_be_bytes());
        assert_eq!(&header[4..6], &1u16.to_be_bytes());
        assert_eq!(&header[6..8], &3u16.to_be_bytes());
        assert_eq!(&header[8..16], &42u64.to_be_bytes());
    }

    #[test]
    fn test_empty_frame_still_sends_one_packet() {
        let packets = packetize(&frame(0), 1200).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), HEADER_LEN);
    }

    #[test]
    fn test_location_parsing() {
        assert_eq!(
            parse_location("udp://127.0.0.1:8554").unwrap(),
            "127.0.0.1:8554".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_location("rtsp://127.0.0.1:8554/0").is_err());
        assert!(parse_location("udp://localhost").is_err());
    }

    #[test]
    fn test_from_spec_requires_location() {
        assert!(UdpSink::from_spec(&ElementSpec::new("udpsink")).is_err());
        let spec = ElementSpec::new("udpsink")
            .with("location", "udp://127.0.0.1:9000")
            .with("mtu", "10");
        assert!(UdpSink::from_spec(&spec).is_err());
    }
}
