//! Bind configuration for the status server

use crate::error::{Result, ServerError};
use std::net::SocketAddr;

/// Default port of the operator status server
pub const DEFAULT_STATUS_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port to bind to; 0 picks an ephemeral port
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse the socket address to bind
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, self.port)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", DEFAULT_STATUS_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_parses() {
        let config = ServerConfig::new("127.0.0.1", 9000);
        assert_eq!(config.addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_hostname_is_rejected() {
        let config = ServerConfig::new("localhost", 9000);
        assert!(matches!(config.addr(), Err(ServerError::InvalidAddress(_))));
    }
}
