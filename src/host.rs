//! Host stand-in
//!
//! [`DroneHost`] plays the role of the flight computer: payloads register
//! with it, and `start_server` runs every registered stream on its own task
//! until the shared cancellation token fires.

use futures_util::future::join_all;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PayloadError, PayloadResult};
use crate::payload::Payload;
use crate::stream::StreamExit;

/// How one stream ended
#[derive(Debug)]
pub struct StreamReport {
    pub payload: String,
    pub stream: String,
    pub id: Uuid,
    pub outcome: PayloadResult<StreamExit>,
}

#[derive(Debug, Default)]
pub struct ServerReport {
    /// Stream ids reported through the liveness callback, in arrival order
    pub alive: Vec<String>,
    pub streams: Vec<StreamReport>,
}

impl ServerReport {
    pub fn failures(&self) -> impl Iterator<Item = &StreamReport> {
        self.streams.iter().filter(|s| s.outcome.is_err())
    }
}

#[derive(Default)]
pub struct DroneHost {
    payloads: Vec<Arc<Payload>>,
}

impl DroneHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_payload(&mut self, payload: Arc<Payload>) -> PayloadResult<()> {
        if self.payloads.iter().any(|p| p.name() == payload.name()) {
            return Err(PayloadError::AlreadyRegistered(payload.name().to_string()));
        }
        info!(
            "Payload '{}' v{} registered ({} stream(s))",
            payload.name(),
            payload.version(),
            payload.streams().len()
        );
        self.payloads.push(payload);
        Ok(())
    }

    pub fn payloads(&self) -> &[Arc<Payload>] {
        &self.payloads
    }

    /// Run every stream of every payload until `cancel` fires
    ///
    /// Returns after all streams have torn down. A stream that fails does
    /// not affect the others.
    pub async fn start_server(&self, cancel: CancellationToken) -> ServerReport {
        let (alive_tx, mut alive_rx) = mpsc::unbounded_channel::<String>();
        let mut handles = Vec::new();
        let mut labels = Vec::new();

        for payload in &self.payloads {
            for (index, stream) in payload.streams().iter().enumerate() {
                labels.push((payload.name().to_string(), stream.name().to_string(), stream.id()));

                let payload = Arc::clone(payload);
                let alive_tx = alive_tx.clone();
                let on_alive = move |id: String| {
                    info!("Stream {} is alive", id);
                    let _ = alive_tx.send(id);
                };
                let cancel = cancel.child_token();
                handles.push(tokio::spawn(async move {
                    payload.start_stream(index, on_alive, cancel).await
                }));
            }
        }
        drop(alive_tx);
        info!("Server started with {} stream(s)", handles.len());

        let mut report = ServerReport::default();
        for ((payload, stream, id), joined) in labels.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(outcome) => {
                    if let Err(e) = &outcome {
                        warn!("{}/{}: {}", payload, stream, e);
                    }
                    report.streams.push(StreamReport {
                        payload,
                        stream,
                        id,
                        outcome,
                    });
                }
                Err(e) => error!("{}/{}: stream task panicked: {}", payload, stream, e),
            }
        }

        while let Ok(id) = alive_rx.try_recv() {
            report.alive.push(id);
        }
        info!("Server stopped");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use crate::simple::build_payload;
    use crate::stream::EndpointConfig;
    use std::time::Duration;

    fn host() -> DroneHost {
        let mut host = DroneHost::new();
        host.register_payload(Arc::new(build_payload(&PluginConfig::default()).unwrap()))
            .unwrap();
        host
    }

    #[test]
    fn test_duplicate_payload_name() {
        let mut host = host();
        let twin = Payload::new("Simple Payload", "2.0", EndpointConfig::default());
        assert!(matches!(
            host.register_payload(Arc::new(twin)),
            Err(PayloadError::AlreadyRegistered(_))
        ));
        assert_eq!(host.payloads().len(), 1);
    }

    #[tokio::test]
    async fn test_every_stream_reports_alive() {
        let host = host();
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });
        let report = host.start_server(cancel).await;

        let mut expected: Vec<String> = host.payloads()[0]
            .streams()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        let mut alive = report.alive.clone();
        expected.sort();
        alive.sort();

        assert_eq!(alive, expected);
        assert_eq!(report.failures().count(), 0);
        assert!(
            report
                .streams
                .iter()
                .all(|s| s.outcome == Ok(StreamExit::Cancelled))
        );
    }
}
