//! Endpoint addressing
//!
//! Every stream sends to its own endpoint, derived from the payload's base
//! address by offsetting the port with the stream's endpoint index.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{PayloadError, PayloadResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: IpAddr,
    /// Port of endpoint index 0
    pub base_port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 8554,
        }
    }
}

impl EndpointConfig {
    /// Derive the endpoint for `index`
    pub fn resolve(&self, index: u32) -> PayloadResult<Endpoint> {
        let port = u16::try_from(index)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset))
            .ok_or_else(|| {
                PayloadError::InvalidArgument(format!(
                    "endpoint index {} overflows the port range from base port {}",
                    index, self.base_port
                ))
            })?;

        Ok(Endpoint {
            index,
            addr: SocketAddr::new(self.host, port),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    index: u32,
    addr: SocketAddr,
}

impl Endpoint {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sink location for this endpoint
    pub fn url(&self) -> String {
        format!("udp://{}", self.addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.url(), self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_indices_resolve_to_distinct_endpoints() {
        let config = EndpointConfig::default();
        let a = config.resolve(0).unwrap();
        let b = config.resolve(1).unwrap();

        assert_ne!(a.addr(), b.addr());
        assert_eq!(a.url(), "udp://127.0.0.1:8554");
        assert_eq!(b.url(), "udp://127.0.0.1:8555");
        assert_eq!(config.resolve(1).unwrap(), b);
    }

    #[test]
    fn test_port_overflow() {
        let config = EndpointConfig {
            base_port: 65_535,
            ..EndpointConfig::default()
        };
        assert!(config.resolve(0).is_ok());
        assert!(matches!(
            config.resolve(1),
            Err(PayloadError::InvalidArgument(_))
        ));
        assert!(EndpointConfig::default().resolve(u32::MAX).is_err());
    }
}
