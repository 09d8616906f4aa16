//! Client configuration
//!
//! Configuration is read from a JSON object. `server_uri`, `endpoint_name`,
//! `lifetime_seconds` (or `lifetime`) and `binding_mode` are required; the
//! remaining keys have defaults. Unrecognized keys are ignored.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default CoAP port when the server URI carries none
pub const DEFAULT_COAP_PORT: u16 = 5683;

/// Device identity reported through the Device object
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model_number: String,
    pub serial_number: String,
    pub firmware_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: "lwm2m-client".to_string(),
            model_number: "rs-lwm2m".to_string(),
            serial_number: "001".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Configuration consumed at startup
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// `coap://host[:port]` of the LwM2M server
    pub server_uri: String,
    /// Stable client identifier
    pub endpoint_name: String,
    /// Registration lifetime
    #[serde(alias = "lifetime")]
    pub lifetime_seconds: u32,
    /// Transport binding (`U`, `UQ`, ...)
    pub binding_mode: String,

    /// Local UDP port, 0 picks an ephemeral port
    #[serde(default, alias = "coap_port")]
    pub local_port: u16,
    /// Initial retransmission timeout
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Initial retransmission timeout in seconds; overrides `ack_timeout_ms`
    #[serde(default, rename = "ack_timeout")]
    pub ack_timeout_secs: Option<f64>,
    /// Retransmissions before an exchange times out
    #[serde(default = "default_max_retransmit")]
    pub max_retransmit: u8,
    /// Registration attempts before startup fails
    #[serde(default = "default_registration_attempts")]
    pub registration_attempts: u32,
    /// Delay before the first registration retry, doubled on each retry
    #[serde(default = "default_registration_retry_ms")]
    pub registration_retry_ms: u64,
    /// Time allowed for deregistration at shutdown
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_short_server_id")]
    pub short_server_id: u16,
    #[serde(default)]
    pub device: DeviceInfo,
}

fn default_ack_timeout_ms() -> u64 {
    2000
}

fn default_max_retransmit() -> u8 {
    4
}

fn default_registration_attempts() -> u32 {
    5
}

fn default_registration_retry_ms() -> u64 {
    5000
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_short_server_id() -> u16 {
    1
}

impl ClientConfig {
    /// Configuration with defaults for everything but server and endpoint
    pub fn for_server(server_uri: &str, endpoint_name: &str) -> Self {
        Self {
            server_uri: server_uri.to_string(),
            endpoint_name: endpoint_name.to_string(),
            lifetime_seconds: 86_400,
            binding_mode: "U".to_string(),
            local_port: 0,
            ack_timeout_ms: default_ack_timeout_ms(),
            ack_timeout_secs: None,
            max_retransmit: default_max_retransmit(),
            registration_attempts: default_registration_attempts(),
            registration_retry_ms: default_registration_retry_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            short_server_id: default_short_server_id(),
            device: DeviceInfo::default(),
        }
    }

    /// Load and validate configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check recognized values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_host_port()?;
        if self.endpoint_name.trim().is_empty() {
            return Err(invalid("endpoint_name", "must not be empty"));
        }
        if self.lifetime_seconds == 0 {
            return Err(invalid("lifetime_seconds", "must be positive"));
        }
        if self.binding_mode.is_empty()
            || !self.binding_mode.chars().all(|c| "UQSTN".contains(c))
        {
            return Err(invalid(
                "binding_mode",
                format!("unknown binding `{}`", self.binding_mode),
            ));
        }
        if self.ack_timeout_ms == 0 {
            return Err(invalid("ack_timeout_ms", "must be positive"));
        }
        if let Some(secs) = self.ack_timeout_secs {
            if secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                return Err(invalid("ack_timeout", "must be a positive number of seconds"));
            }
        }
        if self.registration_attempts == 0 {
            return Err(invalid("registration_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Host and port of the server URI
    pub fn server_host_port(&self) -> Result<(String, u16), ConfigError> {
        let rest = if let Some(rest) = self.server_uri.strip_prefix("coap://") {
            rest
        } else if self.server_uri.starts_with("coaps://") {
            return Err(invalid(
                "server_uri",
                "coaps:// needs a secure datagram transport",
            ));
        } else {
            return Err(invalid("server_uri", "expected a coap:// URI"));
        };

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(invalid("server_uri", "missing host"));
        }

        // Bracketed IPv6 literal
        if let Some(stripped) = authority.strip_prefix('[') {
            let (host, tail) = stripped
                .split_once(']')
                .ok_or_else(|| invalid("server_uri", "unterminated IPv6 literal"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None => DEFAULT_COAP_PORT,
            };
            return Ok((host.to_string(), port));
        }

        match authority.rsplit_once(':') {
            Some((host, port)) => Ok((host.to_string(), parse_port(port)?)),
            None => Ok((authority.to_string(), DEFAULT_COAP_PORT)),
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| Duration::from_millis(self.ack_timeout_ms))
    }

    pub fn registration_retry(&self) -> Duration {
        Duration::from_millis(self.registration_retry_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    port.parse()
        .map_err(|_| invalid("server_uri", format!("bad port `{}`", port)))
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        reason: reason.into(),
    }
}
