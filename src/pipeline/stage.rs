//! Pipeline stage trait
//!
//! A stage acquires its resources in [`PipelineStage::start`], runs its work
//! on a spawned task and releases everything in [`PipelineStage::shutdown`].

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::health::PipelineHealth;
use super::types::MediaFrame;

/// Position of a stage in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    /// Produces frames, has no input
    Source,
    /// Transforms frames
    Filter,
    /// Consumes frames, has no output
    Sink,
}

/// A stage worker stopped with an error while the graph was playing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: String,
    pub reason: String,
}

/// Everything a stage needs to run, handed over in `start`
pub struct StageIo {
    pub input: Option<mpsc::Receiver<MediaFrame>>,
    pub output: Option<mpsc::Sender<MediaFrame>>,
    /// Index into the stream's camera list currently feeding the source
    pub active_camera: watch::Receiver<usize>,
    pub health: Arc<PipelineHealth>,
    /// Cancelled when the graph stops
    pub cancel: CancellationToken,
    failures: mpsc::UnboundedSender<StageFailure>,
}

impl StageIo {
    pub(crate) fn new(
        active_camera: watch::Receiver<usize>,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
        failures: mpsc::UnboundedSender<StageFailure>,
    ) -> Self {
        Self {
            input: None,
            output: None,
            active_camera,
            health,
            cancel,
            failures,
        }
    }

    /// Run `work` on its own task until it returns or the stage is cancelled
    ///
    /// An error is reported to the graph unless cancellation was already
    /// requested, in which case the error is an artefact of teardown.
    pub fn spawn_worker<F>(&self, stage: &str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let stage = stage.to_string();
        let cancel = self.cancel.clone();
        let failures = self.failures.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                result = work => result,
            };

            match result {
                Ok(()) => debug!("{}: worker finished", stage),
                Err(e) if cancel.is_cancelled() => {
                    debug!("{}: worker error during teardown: {:#}", stage, e)
                }
                Err(e) => {
                    warn!("{}: worker failed: {:#}", stage, e);
                    let _ = failures.send(StageFailure {
                        stage,
                        reason: format!("{:#}", e),
                    });
                }
            }
        })
    }
}

/// Trait for pipeline stages that process media data
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Get the name of this stage for logging
    fn name(&self) -> &str;

    fn role(&self) -> StageRole;

    /// Acquire resources and start processing
    ///
    /// Work runs through [`StageIo::spawn_worker`]. The stage must not keep
    /// `io` after returning, or the graph never sees the end of the stream.
    async fn start(&mut self, io: StageIo) -> Result<()>;

    /// Halt processing and release everything `start` acquired
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Wait for a stage worker to finish after its token was cancelled
pub async fn join_worker(stage: &str, handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            warn!("{}: worker panicked: {}", stage, e);
        }
    }
}
