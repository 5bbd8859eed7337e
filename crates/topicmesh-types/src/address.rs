//! Network endpoint addresses.
//!
//! An [`Address`] is always representable as `host:port` and parses back to the
//! same pair. Parsing splits on the last colon, so bare IPv6 literals such as
//! `::1:8080` round-trip as well.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing an address string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// No `:` separator between host and port.
    #[error("Missing port in address: {0}")]
    MissingPort(String),
    /// The host part is empty.
    #[error("Missing host in address: {0}")]
    MissingHost(String),
    /// The port is not a number in `0..=65535`.
    #[error("Invalid port in address {address}: {port}")]
    InvalidPort { address: String, port: String },
}

/// A reachable network endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port. `0` asks the OS for an ephemeral port at bind time.
    pub port: u16,
}

impl Address {
    /// Create an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Same host, different port. Used to report the concrete port after binding.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host.clone(),
            port,
        }
    }

    /// Whether the OS should pick the port.
    pub fn is_ephemeral(&self) -> bool {
        self.port == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(AddressError::MissingHost(s.to_string()));
        }
        let port = port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
            address: s.to_string(),
            port: port.to_string(),
        })?;
        Ok(Self::new(host, port))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse_roundtrip() {
        let cases = [
            Address::new("localhost", 11511),
            Address::new("127.0.0.1", 0),
            Address::new("example.org", 65535),
            Address::new("::1", 8080),
        ];
        for addr in cases {
            let parsed: Address = addr.to_string().parse().unwrap();
            assert_eq!(parsed, addr);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "localhost".parse::<Address>(),
            Err(AddressError::MissingPort("localhost".to_string()))
        );
        assert_eq!(
            ":9000".parse::<Address>(),
            Err(AddressError::MissingHost(":9000".to_string()))
        );
        assert!(matches!(
            "localhost:http".parse::<Address>(),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(
            "localhost:70000".parse::<Address>(),
            Err(AddressError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let addr = Address::new("localhost", 4242);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"localhost:4242\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<Address>("\"nope\"").is_err());
    }

    #[test]
    fn test_from_socket_addr() {
        let sock: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(Address::from(sock), Address::new("127.0.0.1", 9000));
    }

    #[test]
    fn test_with_port() {
        let addr = Address::new("localhost", 0);
        assert!(addr.is_ephemeral());
        let bound = addr.with_port(5555);
        assert_eq!(bound.to_string(), "localhost:5555");
        assert!(!bound.is_ephemeral());
    }
}
