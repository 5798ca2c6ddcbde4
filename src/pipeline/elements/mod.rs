//! Built-in pipeline elements
//!
//! ```text
//! testsrc → encoder → udpsink → Network
//! ```

pub mod encoder;
pub mod test_source;
pub mod udp_sink;

pub use encoder::Encoder;
pub use test_source::{Pattern, TestSource};
pub use udp_sink::UdpSink;
