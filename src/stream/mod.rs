//! Stream pipeline engine
//!
//! A [`Stream`] owns one pipeline state and at most one live graph. A run
//! goes `Building → Playing → Stopping → Stopped`, or `Building → Failed`
//! when the graph cannot be built. The liveness callback fires exactly once
//! per successful run, after the graph is playing and before the run waits
//! for cancellation.

pub mod endpoint;

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PayloadError, PayloadResult};
use crate::pipeline::{
    ElementFactory, GraphResolver, PipelineDescription, PipelineHealth, PipelineState,
    RunnableGraph,
};

pub use endpoint::{Endpoint, EndpointConfig};

/// Snapshot of a stream's identity and camera selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub id: Uuid,
    pub name: String,
    pub endpoint_index: u32,
    /// Registry camera indices, in selection order
    pub cameras: Vec<usize>,
    /// Index into `cameras`
    pub active_camera_index: usize,
}

/// Why a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    /// The cancellation token fired
    Cancelled,
    /// Every stage finished on its own
    EndOfStream,
}

pub struct Stream {
    id: Uuid,
    name: String,
    description: String,
    endpoint: Endpoint,
    cameras: Vec<usize>,
    active_camera: watch::Sender<usize>,
    state: watch::Sender<PipelineState>,
    resolver: Arc<dyn GraphResolver>,
    health: Arc<PipelineHealth>,
    /// Whether the camera may change while a graph is live
    hot_swap: bool,
}

impl Stream {
    /// Create a stream from a pipeline description whose final element is a
    /// sink; the sink's `location` is bound to `endpoint` at start.
    pub fn new(name: impl Into<String>, description: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            endpoint,
            cameras: Vec::new(),
            active_camera: watch::Sender::new(0),
            state: watch::Sender::new(PipelineState::Idle),
            resolver: Arc::new(ElementFactory::with_builtin()),
            health: Arc::new(PipelineHealth::new()),
            hot_swap: true,
        }
    }

    /// Reference a registered camera by its registry index
    pub fn with_camera(mut self, registry_index: usize) -> Self {
        self.cameras.push(registry_index);
        self
    }

    /// Reject camera changes while a graph is live
    pub fn without_hot_swap(mut self) -> Self {
        self.hot_swap = false;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn GraphResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn cameras(&self) -> &[usize] {
        &self.cameras
    }

    pub fn active_camera_index(&self) -> usize {
        *self.active_camera.borrow()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            id: self.id,
            name: self.name.clone(),
            endpoint_index: self.endpoint.index(),
            cameras: self.cameras.clone(),
            active_camera_index: self.active_camera_index(),
        }
    }

    /// Select which of the stream's cameras feeds the source
    ///
    /// While playing, the running source switches over on its next frame and
    /// the encoder restarts its group of pictures.
    pub fn set_active_camera(&self, index: usize) -> PayloadResult<()> {
        if index >= self.cameras.len() {
            return Err(PayloadError::NotFound(format!(
                "camera slot {} of stream '{}' ({} camera(s))",
                index,
                self.name,
                self.cameras.len()
            )));
        }

        // check and update under the state lock
        let mut swapped = None;
        self.state.send_if_modified(|state| {
            if self.hot_swap || !state.is_active() {
                swapped = Some((self.active_camera.send_replace(index), state.is_playing()));
            }
            false
        });
        let (previous, playing) =
            swapped.ok_or(PayloadError::UnsupportedAtRuntime("switching cameras"))?;

        if previous != index {
            info!(
                "{}: active camera {} -> {} (registry camera #{}){}",
                self.name,
                previous,
                index,
                self.cameras[index],
                if playing { ", hot-swapping" } else { "" }
            );
        }
        Ok(())
    }

    /// The description with the sink bound to this stream's endpoint
    pub fn bound_description(&self) -> PayloadResult<PipelineDescription> {
        let mut description: PipelineDescription = self.description.parse()?;
        description.sink_mut().set("location", self.endpoint.url());
        Ok(description)
    }

    fn transition(&self, target: PipelineState) {
        self.state.send_modify(|state| {
            if !state.can_transition_to(&target) {
                warn!("{}: unexpected transition {} -> {}", self.name, state, target);
            }
            debug!("{}: {} -> {}", self.name, state, target);
            *state = target;
        });
    }

    /// Atomically move to Building unless a graph is already live
    fn begin_run(&self) -> PayloadResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if state.is_active() {
                result = Err(PayloadError::AlreadyRunning(self.name.clone()));
                false
            } else {
                *state = PipelineState::Building;
                true
            }
        });
        result
    }

    async fn build(&self) -> PayloadResult<RunnableGraph> {
        let description = self.bound_description()?;
        info!("{}: building '{}'", self.name, description);
        let mut graph = self.resolver.resolve(&description)?;
        graph
            .play(self.active_camera.subscribe(), self.health.clone())
            .await?;
        Ok(graph)
    }

    /// Build the graph, report liveness, and run until `cancel` fires or the
    /// graph ends
    ///
    /// Returns once every acquired resource has been released. Fails with
    /// `AlreadyRunning` without touching the live graph if one exists.
    pub async fn start<F>(&self, on_alive: F, cancel: CancellationToken) -> PayloadResult<StreamExit>
    where
        F: FnOnce(String) + Send + 'static,
    {
        self.begin_run()?;
        let run = RunGuard::new(self);

        let mut graph = match self.build().await {
            Ok(graph) => graph,
            Err(e) => {
                error!("{}: {}", self.name, e);
                self.transition(PipelineState::Failed);
                run.disarm();
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            info!("{}: cancelled before playing", self.name);
            self.transition(PipelineState::Stopping);
            graph.stop().await;
            self.transition(PipelineState::Stopped);
            run.disarm();
            return Ok(StreamExit::Cancelled);
        }

        self.transition(PipelineState::Playing {
            started_at: Instant::now(),
        });
        info!("{}: playing on {}", self.name, self.endpoint);
        on_alive(self.id.to_string());

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Ok(StreamExit::Cancelled),
            failure = graph.wait() => match failure {
                Some(failure) => Err(PayloadError::StageFailed {
                    stage: failure.stage,
                    reason: failure.reason,
                }),
                None => Ok(StreamExit::EndOfStream),
            },
        };

        self.transition(PipelineState::Stopping);
        graph.stop().await;
        self.transition(PipelineState::Stopped);
        run.disarm();

        match &outcome {
            Ok(exit) => info!("{}: stopped ({:?}): {}", self.name, exit, self.health.summary()),
            Err(e) => error!("{}: stopped after error: {}", self.name, e),
        }
        outcome
    }

    /// Run [`Stream::start`] on its own task
    pub fn spawn<F>(
        self: &Arc<Self>,
        on_alive: F,
        cancel: CancellationToken,
    ) -> JoinHandle<PayloadResult<StreamExit>>
    where
        F: FnOnce(String) + Send + 'static,
    {
        let stream = Arc::clone(self);
        tokio::spawn(async move { stream.start(on_alive, cancel).await })
    }
}

/// Settles the state of a run whose `start` future is dropped early
///
/// The graph is declared after the guard and is dropped first, which cancels
/// its workers. The guard then leaves `Building` as `Failed` and anything
/// later as `Stopped`, so the stream can start again.
struct RunGuard<'a> {
    stream: &'a Stream,
    armed: bool,
}

impl<'a> RunGuard<'a> {
    fn new(stream: &'a Stream) -> Self {
        Self {
            stream,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let name = &self.stream.name;
        self.stream.state.send_modify(|state| {
            let target = if matches!(state, PipelineState::Building) {
                PipelineState::Failed
            } else {
                PipelineState::Stopped
            };
            warn!("{}: run abandoned, {} -> {}", name, state, target);
            *state = target;
        });
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("cameras", &self.cameras)
            .field("state", &self.state())
            .finish()
    }
}
