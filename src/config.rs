//! Collector configuration
//!
//! Environment variables:
//! - COLLECTOR_UDP_PORT_RANGE: Inclusive UDP port range, "start-end" or a single port (default: 9001-9004)
//! - COLLECTOR_QUEUE_CAPACITY: Packets buffered per port before a reset (default: 10000)
//! - COLLECTOR_BUFFER_SIZE: Receive buffer size in bytes (default: 1048576)
//! - COLLECTOR_STALE_AFTER_SECS: Age after which a trace is checked against worker status (default: 10)
//! - COLLECTOR_STATUS_INTERVAL_SECS: Worker status polling interval (default: 10)
//! - COLLECTOR_STATUS_URL: FPM status page (default: http://127.0.0.1/status?full&json)
//! - COLLECTOR_STATUS_TIMEOUT_SECS: Timeout of one status request (default: 3)
//! - COLLECTOR_HTTP_ADDR: Debug HTTP server bind address (default: 0.0.0.0:8080)
//! - COLLECTOR_VERBOSITY: 0-3, raises the default log level (default: 0)
//! - COLLECTOR_APP_NAME / COLLECTOR_ENV: Labels reported by the debug and metrics endpoints
//! - COLLECTOR_NODE: Node label of exported metrics (default: short form of HOSTNAME)

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub udp_port_start: u16,
    pub udp_port_end: u16,
    pub queue_capacity: usize,
    pub buffer_size: usize,
    pub stale_after: Duration,
    pub status_interval: Duration,
    pub status_url: String,
    pub status_timeout: Duration,
    pub http_addr: String,
    pub verbosity: u8,
    pub app_name: String,
    pub env: String,
    pub node: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            udp_port_start: 9001,
            udp_port_end: 9004,
            queue_capacity: 10_000,
            buffer_size: 1024 * 1024, // 1MB
            stale_after: Duration::from_secs(10),
            status_interval: Duration::from_secs(10),
            status_url: "http://127.0.0.1/status?full&json".to_string(),
            status_timeout: Duration::from_secs(3),
            http_addr: "0.0.0.0:8080".to_string(),
            verbosity: 0,
            app_name: "trace-collector".to_string(),
            env: "dev".to_string(),
            node: "localhost".to_string(),
        }
    }
}

impl CollectorConfig {
    /// Build the configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let (udp_port_start, udp_port_end) = match lookup("COLLECTOR_UDP_PORT_RANGE") {
            Some(range) => parse_port_range(&range)?,
            None => (defaults.udp_port_start, defaults.udp_port_end),
        };

        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse_var::<u64>(&lookup, key)?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };

        let config = Self {
            udp_port_start,
            udp_port_end,
            queue_capacity: parse_var(&lookup, "COLLECTOR_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
            buffer_size: parse_var(&lookup, "COLLECTOR_BUFFER_SIZE")?
                .unwrap_or(defaults.buffer_size),
            stale_after: secs("COLLECTOR_STALE_AFTER_SECS", defaults.stale_after)?,
            status_interval: secs("COLLECTOR_STATUS_INTERVAL_SECS", defaults.status_interval)?,
            status_url: lookup("COLLECTOR_STATUS_URL").unwrap_or(defaults.status_url),
            status_timeout: secs("COLLECTOR_STATUS_TIMEOUT_SECS", defaults.status_timeout)?,
            http_addr: lookup("COLLECTOR_HTTP_ADDR").unwrap_or(defaults.http_addr),
            verbosity: parse_var(&lookup, "COLLECTOR_VERBOSITY")?.unwrap_or(defaults.verbosity),
            app_name: lookup("COLLECTOR_APP_NAME").unwrap_or(defaults.app_name),
            env: lookup("COLLECTOR_ENV").unwrap_or(defaults.env),
            node: lookup("COLLECTOR_NODE")
                .or_else(|| lookup("HOSTNAME").map(|host| short_hostname(&host)))
                .unwrap_or(defaults.node),
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.udp_port_start > self.udp_port_end {
            return Err(ConfigError::InvalidPortRange(format!(
                "{}-{}",
                self.udp_port_start, self.udp_port_end
            )));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "COLLECTOR_BUFFER_SIZE",
                value: "0".to_string(),
            });
        }
        if self.status_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "COLLECTOR_STATUS_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Ports to listen on, in queue order
    pub fn udp_ports(&self) -> impl Iterator<Item = u16> {
        self.udp_port_start..=self.udp_port_end
    }

    pub fn udp_port_count(&self) -> usize {
        usize::from(self.udp_port_end.saturating_sub(self.udp_port_start)) + 1
    }

    /// Default tracing filter for the configured verbosity
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "trace_collector=info,tower_http=info",
            1 => "trace_collector=debug,tower_http=info",
            _ => "trace_collector=trace,tower_http=debug",
        }
    }
}

/// Parse "9001-9004" or "9001"
pub fn parse_port_range(range: &str) -> Result<(u16, u16), ConfigError> {
    let invalid = || ConfigError::InvalidPortRange(range.to_string());

    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (start.trim(), end.trim()),
        None => (range.trim(), range.trim()),
    };
    let start: u16 = start.parse().map_err(|_| invalid())?;
    let end: u16 = end.parse().map_err(|_| invalid())?;

    if start > end {
        return Err(invalid());
    }
    Ok((start, end))
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}

/// "web-1.dc.example.com" -> "web-1"
fn short_hostname(host: &str) -> String {
    host.split('.').next().unwrap_or(host).to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid UDP port range: {0}")]
    InvalidPortRange(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
