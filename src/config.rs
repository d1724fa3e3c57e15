//! Server and connection configuration.
//!
//! Configuration is plain data with defaults for every field, so a JSON file
//! only needs the values that differ:
//!
//! ```
//! use chunkwire::config::ServerConfig;
//!
//! let config = ServerConfig::from_json_str(r#"{ "dispatcher_concurrency": 8 }"#).unwrap();
//! assert_eq!(config.dispatcher_concurrency, 8);
//! assert_eq!(config.read_failure_limit, 3);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChunkwireError, Result};

/// Default server name, used in log fields.
pub const DEFAULT_NAME: &str = "chunkwire";

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:27010";

/// Default size of each half of a connection's read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// Default number of consecutive read failures tolerated.
pub const DEFAULT_READ_FAILURE_LIMIT: u32 = 3;

/// Default initial capacity of a group's membership map.
pub const DEFAULT_CONNECTIONS_POOL_INIT_SIZE: usize = 64;

/// Default dispatcher concurrency ceiling.
pub const DEFAULT_DISPATCHER_CONCURRENCY: usize = 3;

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name used in log output.
    pub name: String,
    /// Address the demo server binds to.
    pub listen_addr: String,
    /// Size of each half of the double read buffer.
    pub read_buffer_size: usize,
    /// Consecutive read failures before a read loop gives up.
    pub read_failure_limit: u32,
    /// Initial capacity of each group's membership map.
    pub connections_pool_init_size: usize,
    /// Maximum simultaneous handler invocations.
    pub dispatcher_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_failure_limit: DEFAULT_READ_FAILURE_LIMIT,
            connections_pool_init_size: DEFAULT_CONNECTIONS_POOL_INIT_SIZE,
            dispatcher_concurrency: DEFAULT_DISPATCHER_CONCURRENCY,
        }
    }
}

impl ServerConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values that would make the server unusable.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(ChunkwireError::Config(
                "read_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.read_failure_limit == 0 {
            return Err(ChunkwireError::Config(
                "read_failure_limit must be greater than zero".to_string(),
            ));
        }
        if self.dispatcher_concurrency == 0 {
            return Err(ChunkwireError::Config(
                "dispatcher_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the server name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set the read buffer half size.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the read failure threshold.
    pub fn with_read_failure_limit(mut self, limit: u32) -> Self {
        self.read_failure_limit = limit;
        self
    }

    /// Set the dispatcher concurrency ceiling.
    pub fn with_dispatcher_concurrency(mut self, limit: usize) -> Self {
        self.dispatcher_concurrency = limit;
        self
    }

    /// Per-connection settings.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            read_buffer_size: self.read_buffer_size,
            read_failure_limit: self.read_failure_limit,
        }
    }
}

/// Settings for a single connection's read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Size of each half of the double read buffer.
    pub read_buffer_size: usize,
    /// Consecutive read failures before the loop gives up.
    pub read_failure_limit: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_failure_limit: DEFAULT_READ_FAILURE_LIMIT,
        }
    }
}
