use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::rustls;

use crate::error::Error;

/// Which scheme to reach the endpoint over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plaintext TCP.
    Http,
    /// TLS.
    Https,
}

/// Configuration for a connection pool.
#[derive(Clone)]
pub struct PoolConfig {
    /// Endpoint host name.
    pub host: String,
    /// Endpoint port.
    pub port: u16,
    /// Scheme to connect over.
    pub scheme: Scheme,
    /// Number of worker connections in the pool.
    pub pool_size: usize,
    /// Fixed delay before retrying a failed connect attempt.
    pub reconnect_backoff: Duration,
    /// Connect timeout in milliseconds. 0 means no timeout.
    pub connect_timeout_ms: u64,
    /// Pre-built rustls ClientConfig for `https` endpoints. When unset, a
    /// default config backed by the webpki root store is used.
    pub tls_client: Option<Arc<rustls::ClientConfig>>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8181,
            scheme: Scheme::Http,
            pool_size: 4,
            reconnect_backoff: Duration::from_secs(1),
            connect_timeout_ms: 0,
            tls_client: None,
        }
    }
}

impl PoolConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be > 0".into()));
        }
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        let config = PoolConfig {
            pool_size: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_host_is_rejected() {
        let config = PoolConfig {
            host: String::new(),
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
