//! Simple payload
//!
//! A payload plugin for a drone host: capability-checked device wrappers, a
//! per-class device registry and synthetic video streams driven by a small
//! pipeline engine.

pub mod config;
pub mod error;
pub mod host;
pub mod payload;
pub mod pipeline;
pub mod simple;
pub mod stream;

pub use error::{PayloadError, PayloadResult};
pub use host::{DroneHost, ServerReport, StreamReport};
pub use payload::{DeviceClass, Payload};
pub use stream::{Endpoint, EndpointConfig, Stream, StreamDescriptor, StreamExit};
