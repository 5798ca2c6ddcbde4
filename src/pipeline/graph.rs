//! Graph resolution and lifecycle
//!
//! A [`GraphResolver`] turns a [`PipelineDescription`] into a
//! [`RunnableGraph`]. The graph wires its stages with channels, starts them
//! in order and stops them in reverse order.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{PayloadError, PayloadResult};
use crate::pipeline::description::{ElementSpec, PipelineDescription};
use crate::pipeline::elements::{Encoder, TestSource, UdpSink};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::stage::{PipelineStage, StageFailure, StageIo, StageRole};
use crate::pipeline::types::MediaFrame;

/// Frames buffered between two stages
const LINK_CAPACITY: usize = 8;

/// Resolves descriptions into runnable graphs
pub trait GraphResolver: Send + Sync {
    fn resolve(&self, description: &PipelineDescription) -> PayloadResult<RunnableGraph>;
}

type ElementConstructor =
    Box<dyn Fn(&ElementSpec) -> anyhow::Result<Box<dyn PipelineStage>> + Send + Sync>;

/// Resolver backed by a table of named element constructors
pub struct ElementFactory {
    constructors: HashMap<String, ElementConstructor>,
}

impl ElementFactory {
    /// A factory with no elements
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A factory knowing `testsrc`, `encoder` and `udpsink`
    pub fn with_builtin() -> Self {
        let mut factory = Self::empty();
        factory.register("testsrc", |spec| {
            Ok(Box::new(TestSource::from_spec(spec)?) as Box<dyn PipelineStage>)
        });
        factory.register("encoder", |spec| {
            Ok(Box::new(Encoder::from_spec(spec)?) as Box<dyn PipelineStage>)
        });
        factory.register("udpsink", |spec| {
            Ok(Box::new(UdpSink::from_spec(spec)?) as Box<dyn PipelineStage>)
        });
        factory
    }

    pub fn register<F>(&mut self, element: &str, constructor: F)
    where
        F: Fn(&ElementSpec) -> anyhow::Result<Box<dyn PipelineStage>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(element.to_string(), Box::new(constructor));
    }
}

impl Default for ElementFactory {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl GraphResolver for ElementFactory {
    fn resolve(&self, description: &PipelineDescription) -> PayloadResult<RunnableGraph> {
        let stages = description
            .elements()
            .iter()
            .map(|spec| {
                let constructor = self.constructors.get(spec.name()).ok_or_else(|| {
                    PayloadError::PipelineBuildError(format!("no such element '{}'", spec.name()))
                })?;
                constructor(spec)
                    .map_err(|e| PayloadError::PipelineBuildError(format!("{:#}", e)))
            })
            .collect::<PayloadResult<Vec<_>>>()?;

        RunnableGraph::new(stages)
    }
}

/// An ordered chain of stages: one source, any number of filters, one sink
pub struct RunnableGraph {
    stages: Vec<Box<dyn PipelineStage>>,
    /// Number of stages whose `start` succeeded, in order
    started: usize,
    cancel: CancellationToken,
    failures: Option<mpsc::UnboundedReceiver<StageFailure>>,
}

impl RunnableGraph {
    pub fn new(stages: Vec<Box<dyn PipelineStage>>) -> PayloadResult<Self> {
        let last = stages.len().checked_sub(1).ok_or_else(|| {
            PayloadError::PipelineBuildError("graph has no stages".to_string())
        })?;

        for (i, stage) in stages.iter().enumerate() {
            let expected = match i {
                0 => StageRole::Source,
                i if i == last => StageRole::Sink,
                _ => StageRole::Filter,
            };
            if stage.role() != expected {
                return Err(PayloadError::PipelineBuildError(format!(
                    "'{}' is a {:?} but position {} needs a {:?}",
                    stage.name(),
                    stage.role(),
                    i,
                    expected
                )));
            }
        }

        Ok(Self {
            stages,
            started: 0,
            cancel: CancellationToken::new(),
            failures: None,
        })
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Start every stage, source first
    ///
    /// If a stage fails to start, the stages already running are stopped in
    /// reverse order before the error is returned.
    pub async fn play(
        &mut self,
        active_camera: watch::Receiver<usize>,
        health: Arc<PipelineHealth>,
    ) -> PayloadResult<()> {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        self.failures = Some(failures_rx);

        let mut upstream: Option<mpsc::Receiver<MediaFrame>> = None;
        let count = self.stages.len();

        for i in 0..count {
            let mut io = StageIo::new(
                active_camera.clone(),
                health.clone(),
                self.cancel.child_token(),
                failures_tx.clone(),
            );
            io.input = upstream.take();
            if i + 1 < count {
                let (tx, rx) = mpsc::channel(LINK_CAPACITY);
                io.output = Some(tx);
                upstream = Some(rx);
            }

            let stage = &mut self.stages[i];
            let name = stage.name().to_string();
            if let Err(e) = stage.start(io).await {
                warn!("{}: failed to start: {:#}", name, e);
                self.stop().await;
                return Err(PayloadError::ResourceAcquisitionFailure {
                    stage: name,
                    reason: format!("{:#}", e),
                });
            }
            debug!("{}: started", name);
            self.started = i + 1;
        }

        Ok(())
    }

    /// Wait until a stage fails (`Some`) or every worker has finished (`None`)
    pub async fn wait(&mut self) -> Option<StageFailure> {
        match self.failures.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Halt all workers and shut down started stages in reverse order
    ///
    /// Never fails: shutdown errors are logged and the remaining stages are
    /// still released.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        for stage in self.stages[..self.started].iter_mut().rev() {
            match stage.shutdown().await {
                Ok(()) => debug!("{}: released", stage.name()),
                Err(e) => warn!("{}: shutdown failed: {:#}", stage.name(), e),
            }
        }

        if self.started > 0 {
            info!("Graph stopped ({} stage(s) released)", self.started);
        }
        self.started = 0;
        self.failures = None;
    }
}

impl Drop for RunnableGraph {
    fn drop(&mut self) {
        // workers of a graph dropped without `stop` still exit
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        role: StageRole,
        fail_start: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PipelineStage for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn role(&self) -> StageRole {
            self.role
        }

        async fn start(&mut self, io: StageIo) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("device busy");
            }
            self.log.lock().unwrap().push(format!("start {}", self.name));
            io.spawn_worker(self.name, std::future::pending());
            Ok(())
        }

        async fn shutdown(&mut self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        role: StageRole,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Box<dyn PipelineStage> {
        Box::new(Recorder {
            name,
            role,
            fail_start: false,
            log: log.clone(),
        })
    }

    #[test]
    fn test_roles_are_validated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(RunnableGraph::new(Vec::new()).is_err());
        assert!(
            RunnableGraph::new(vec![
                recorder("sink", StageRole::Sink, &log),
                recorder("src", StageRole::Source, &log),
            ])
            .is_err()
        );
        assert!(
            RunnableGraph::new(vec![
                recorder("src", StageRole::Source, &log),
                recorder("mid", StageRole::Filter, &log),
                recorder("sink", StageRole::Sink, &log),
            ])
            .is_ok()
        );
    }

    #[test]
    fn test_unknown_element() {
        let factory = ElementFactory::with_builtin();
        let desc: PipelineDescription = "testsrc ! ffmpegenc ! udpsink".parse().unwrap();
        assert!(matches!(
            factory.resolve(&desc),
            Err(PayloadError::PipelineBuildError(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_runs_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = RunnableGraph::new(vec![
            recorder("src", StageRole::Source, &log),
            recorder("mid", StageRole::Filter, &log),
            recorder("sink", StageRole::Sink, &log),
        ])
        .unwrap();

        let (_tx, rx) = watch::channel(0usize);
        graph.play(rx, Arc::new(PipelineHealth::new())).await.unwrap();
        graph.stop().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "start src",
                "start mid",
                "start sink",
                "stop sink",
                "stop mid",
                "stop src"
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_graph_cancels_workers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = RunnableGraph::new(vec![
            recorder("src", StageRole::Source, &log),
            recorder("sink", StageRole::Sink, &log),
        ])
        .unwrap();

        let (_tx, rx) = watch::channel(0usize);
        graph.play(rx, Arc::new(PipelineHealth::new())).await.unwrap();
        let cancel = graph.cancel.clone();
        assert!(!cancel.is_cancelled());

        drop(graph);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_start_releases_started_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = RunnableGraph::new(vec![
            recorder("src", StageRole::Source, &log),
            recorder("mid", StageRole::Filter, &log),
            Box::new(Recorder {
                name: "sink",
                role: StageRole::Sink,
                fail_start: true,
                log: log.clone(),
            }) as Box<dyn PipelineStage>,
        ])
        .unwrap();

        let (_tx, rx) = watch::channel(0usize);
        let err = graph
            .play(rx, Arc::new(PipelineHealth::new()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PayloadError::ResourceAcquisitionFailure { ref stage, .. } if stage == "sink"
        ));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start src", "start mid", "stop mid", "stop src"]
        );
    }
}
