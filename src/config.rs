use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::elements::Pattern;
use crate::stream::EndpointConfig;

/// One synthetic video stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    pub endpoint_index: u32,
    pub pattern: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub gop: u32,
    /// Registry camera indices the stream can switch between
    pub cameras: Vec<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            name: "Simple Stream".to_string(),
            endpoint_index: 0,
            pattern: "snow".to_string(),
            width: 320,
            height: 240,
            framerate: 30,
            gop: 30,
            cameras: vec![0, 1],
        }
    }
}

impl StreamConfig {
    /// Pipeline description for this stream; the sink location is bound at start
    pub fn description(&self) -> String {
        format!(
            "testsrc pattern={} width={} height={} framerate={} ! encoder gop={} ! udpsink",
            self.pattern, self.width, self.height, self.framerate, self.gop
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub payload_name: String,
    pub endpoint: EndpointConfig,
    pub log_file: Option<PathBuf>,
    pub streams: Vec<StreamConfig>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            payload_name: "Simple Payload".to_string(),
            endpoint: EndpointConfig::default(),
            log_file: None,
            streams: vec![
                StreamConfig {
                    name: "Simple Stream (snow)".to_string(),
                    ..StreamConfig::default()
                },
                StreamConfig {
                    name: "Simple Stream (blink)".to_string(),
                    endpoint_index: 1,
                    pattern: "blink".to_string(),
                    ..StreamConfig::default()
                },
            ],
        }
    }
}

impl PluginConfig {
    /// Read a JSON configuration; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: PluginConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.payload_name.trim().is_empty() {
            bail!("payload_name must not be empty");
        }

        let mut endpoints = HashSet::new();
        for stream in &self.streams {
            if !endpoints.insert(stream.endpoint_index) {
                bail!(
                    "stream '{}' reuses endpoint index {}",
                    stream.name,
                    stream.endpoint_index
                );
            }
            stream
                .pattern
                .parse::<Pattern>()
                .with_context(|| format!("stream '{}'", stream.name))?;
        }
        Ok(())
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_example_payload() {
        let config = PluginConfig::default();
        assert_eq!(config.payload_name, "Simple Payload");
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.streams[0].pattern, "snow");
        assert_eq!(config.streams[1].pattern, "blink");
        assert_eq!(config.streams[1].endpoint_index, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: PluginConfig = serde_json::from_str(
            r#"{ "payload_name": "Bench", "endpoint": { "base_port": 9000 }, "streams": [ { "pattern": "smpte" } ] }"#,
        )
        .unwrap();

        assert_eq!(config.payload_name, "Bench");
        assert_eq!(config.endpoint.base_port, 9000);
        assert_eq!(config.endpoint.host, EndpointConfig::default().host);
        assert_eq!(config.streams[0].cameras, vec![0, 1]);
        assert_eq!(
            config.streams[0].description(),
            "testsrc pattern=smpte width=320 height=240 framerate=30 ! encoder gop=30 ! udpsink"
        );
    }

    #[test]
    fn test_validation() {
        let mut config = PluginConfig::default();
        config.streams[1].endpoint_index = 0;
        assert!(config.validate().is_err());

        let mut config = PluginConfig::default();
        config.streams[0].pattern = "plaid".to_string();
        assert!(config.validate().is_err());
    }
}
