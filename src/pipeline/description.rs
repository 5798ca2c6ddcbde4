//! Declarative pipeline descriptions
//!
//! A description is a chain of elements separated by `!`, each element a
//! name followed by `key=value` properties:
//!
//! ```text
//! testsrc pattern=snow ! encoder gop=30 ! udpsink location=udp://127.0.0.1:8554
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};

use crate::error::PayloadError;

/// One element of a description with its properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSpec {
    name: String,
    properties: BTreeMap<String, String>,
}

impl ElementSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Parse a property, falling back to `default` when absent
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("{}: invalid value '{}' for '{}'", self.name, raw, key)),
            None => Ok(default),
        }
    }

    /// Get a property that has no sensible default
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| anyhow!("{}: missing required property '{}'", self.name, key))
    }

    /// Fail on properties outside `known`
    pub fn check_known(&self, known: &[&str]) -> Result<()> {
        if let Some(unknown) = self.properties.keys().find(|k| !known.contains(&k.as_str())) {
            bail!("{}: unknown property '{}'", self.name, unknown);
        }
        Ok(())
    }
}

impl fmt::Display for ElementSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.properties {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Parsed chain of elements, source first and sink last
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    elements: Vec<ElementSpec>,
}

impl PipelineDescription {
    pub fn new(elements: Vec<ElementSpec>) -> Result<Self, PayloadError> {
        if elements.is_empty() {
            return Err(PayloadError::PipelineBuildError(
                "empty pipeline description".to_string(),
            ));
        }
        Ok(Self { elements })
    }

    pub fn elements(&self) -> &[ElementSpec] {
        &self.elements
    }

    /// The final element, which the engine binds to the stream endpoint
    pub fn sink_mut(&mut self) -> &mut ElementSpec {
        let last = self.elements.len() - 1;
        &mut self.elements[last]
    }

    pub fn sink(&self) -> &ElementSpec {
        &self.elements[self.elements.len() - 1]
    }
}

fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_element(segment: &str) -> Result<ElementSpec> {
    let mut tokens = segment.split_whitespace();
    let name = tokens.next().ok_or_else(|| anyhow!("empty element"))?;
    if !is_valid_identifier(name) {
        bail!("invalid element name '{}'", name);
    }

    let mut element = ElementSpec::new(name);
    for token in tokens {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| anyhow!("{}: expected key=value, got '{}'", name, token))?;
        if !is_valid_identifier(key) {
            bail!("{}: invalid property name '{}'", name, key);
        }
        if value.is_empty() {
            bail!("{}: property '{}' has no value", name, key);
        }
        if element.get(key).is_some() {
            bail!("{}: property '{}' given twice", name, key);
        }
        element.set(key, value);
    }
    Ok(element)
}

impl FromStr for PipelineDescription {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let elements = s
            .split('!')
            .map(parse_element)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| PayloadError::PipelineBuildError(format!("{:#}", e)))?;
        Self::new(elements)
    }
}

impl fmt::Display for PipelineDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, " ! ")?;
            }
            write!(f, "{}", element)?;
        }
        Ok(())
    }
}
