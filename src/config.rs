//! Connector configuration
//!
//! Options can be set through the typed [`ConfigBuilder`] or by name with
//! [`Config::set_property`], using the connector property names
//! (`processorCache`, `maxThreads`, `maxKeepAliveRequests`,
//! `connectionTimeout`, `keepAliveTimeout`, `maxHttpHeaderSize`,
//! `outputBufferSize`, `maxSwallowSize`, `asyncTimeout`).

use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Connector configuration (shared read-only once the server starts)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of idle processors kept for reuse (default: 200)
    pub processor_cache: usize,

    /// Number of worker threads (default: 200)
    pub max_threads: usize,

    /// Requests served per connection, `None` for unlimited (default: 100)
    pub max_keep_alive_requests: Option<u32>,

    /// Read/write timeout while an exchange is in progress (default: 20s)
    pub connection_timeout: Duration,

    /// Idle timeout between requests on a kept-alive connection, `None` to
    /// follow `connection_timeout` (default: `None`)
    pub keep_alive_timeout: Option<Duration>,

    /// Limit for the request head and the serialized response head
    /// (default: 8192)
    pub max_http_header_size: usize,

    /// Response output buffer capacity (default: 8192)
    pub output_buffer_size: usize,

    /// Unread request body bytes discarded to keep a connection alive,
    /// `None` for unlimited (default: 2 MiB)
    pub max_swallow_size: Option<u64>,

    /// Default async completion timeout (default: 30s)
    pub async_timeout: Duration,
}

impl Config {
    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Effective idle timeout between requests
    pub fn keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout.unwrap_or(self.connection_timeout)
    }

    /// Set an option by its connector property name
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        };

        let mut next = self.clone();

        match name {
            "processorCache" => {
                next.processor_cache = value.trim().parse().map_err(|_| invalid())?;
            }
            "maxThreads" => {
                next.max_threads = value.trim().parse().map_err(|_| invalid())?;
            }
            "maxKeepAliveRequests" => {
                let n: i64 = value.trim().parse().map_err(|_| invalid())?;
                next.max_keep_alive_requests = match n {
                    -1 => None,
                    1..=0xffff_ffff => Some(n as u32),
                    _ => return Err(invalid()),
                };
            }
            "connectionTimeout" => {
                next.connection_timeout = parse_millis(value).ok_or_else(invalid)?;
            }
            "keepAliveTimeout" => {
                next.keep_alive_timeout = Some(parse_millis(value).ok_or_else(invalid)?);
            }
            "maxHttpHeaderSize" => {
                next.max_http_header_size = value.trim().parse().map_err(|_| invalid())?;
            }
            "outputBufferSize" => {
                next.output_buffer_size = value.trim().parse().map_err(|_| invalid())?;
            }
            "maxSwallowSize" => {
                let n: i64 = value.trim().parse().map_err(|_| invalid())?;
                next.max_swallow_size = match n {
                    n if n < 0 => None,
                    n => Some(n as u64),
                };
            }
            "asyncTimeout" => {
                next.async_timeout = parse_millis(value).ok_or_else(invalid)?;
            }
            _ => return Err(ConfigError::UnknownProperty(name.to_string())),
        }

        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Check option ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads < 1 {
            return Err(ConfigError::Invalid("maxThreads must be at least 1".into()));
        }
        if self.max_keep_alive_requests == Some(0) {
            return Err(ConfigError::Invalid(
                "maxKeepAliveRequests must be at least 1 or -1".into(),
            ));
        }
        // room for a status line and a handful of headers
        if self.max_http_header_size < 256 {
            return Err(ConfigError::Invalid(
                "maxHttpHeaderSize must be at least 256".into(),
            ));
        }
        if self.output_buffer_size == 0 {
            return Err(ConfigError::Invalid("outputBufferSize must not be 0".into()));
        }
        if self.connection_timeout.is_zero() || self.keep_alive_timeout().is_zero() {
            return Err(ConfigError::Invalid("timeouts must not be 0".into()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            processor_cache: 200,
            max_threads: 200,
            max_keep_alive_requests: Some(100),
            connection_timeout: Duration::from_millis(20_000),
            keep_alive_timeout: None,
            max_http_header_size: 8192,
            output_buffer_size: 8192,
            max_swallow_size: Some(2 * 1024 * 1024),
            async_timeout: Duration::from_millis(30_000),
        }
    }
}

fn parse_millis(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_millis)
}

/// Builder for [`Config`]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder holding the default configuration
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Set the processor pool size
    pub fn processor_cache(mut self, size: usize) -> Self {
        self.config.processor_cache = size;
        self
    }

    /// Set the worker thread count
    pub fn max_threads(mut self, threads: usize) -> Self {
        self.config.max_threads = threads;
        self
    }

    /// Set the per-connection request cap (`None` for unlimited)
    pub fn max_keep_alive_requests(mut self, max: Option<u32>) -> Self {
        self.config.max_keep_alive_requests = max;
        self
    }

    /// Set the connection timeout
    ///
    /// Also applies to the keep-alive timeout unless that is set explicitly.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the keep-alive idle timeout
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.config.keep_alive_timeout = Some(timeout);
        self
    }

    /// Set the header size limit
    pub fn max_http_header_size(mut self, size: usize) -> Self {
        self.config.max_http_header_size = size;
        self
    }

    /// Set the response output buffer size
    pub fn output_buffer_size(mut self, size: usize) -> Self {
        self.config.output_buffer_size = size;
        self
    }

    /// Set the request body swallow budget (`None` for unlimited)
    pub fn max_swallow_size(mut self, size: Option<u64>) -> Self {
        self.config.max_swallow_size = size;
        self
    }

    /// Set the default async timeout
    pub fn async_timeout(mut self, timeout: Duration) -> Self {
        self.config.async_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
