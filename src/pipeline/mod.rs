//! Pipeline abstraction layer
//!
//! This module turns a declarative description into a running media graph:
//! - Description: the `element key=value ! ...` chain a stream is declared with
//! - Resolution: `GraphResolver` builds stages from a description
//! - Lifecycle: `RunnableGraph` starts stages in order and stops them in reverse
//! - Health: counters shared by every stage of one stream
//!
//! # Architecture
//!
//! - Each stage runs its work on its own tokio task
//! - Stages communicate via bounded channels; sources drop frames when full
//! - A stage failing at runtime is reported to the owning stream, which then
//!   tears the whole graph down

pub mod description;
pub mod elements;
pub mod graph;
pub mod health;
pub mod stage;
pub mod state;
pub mod types;

pub use description::{ElementSpec, PipelineDescription};
pub use graph::{ElementFactory, GraphResolver, RunnableGraph};
pub use health::{HealthSummary, PipelineHealth};
pub use stage::{PipelineStage, StageFailure, StageIo, StageRole};
pub use state::PipelineState;
pub use types::{MediaFrame, Timestamp};
