//! Relay Hub configuration.
//!
//! Configuration is loaded from environment variables. Every setting has a
//! default, so an empty environment yields a working local relay.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default WebSocket listener port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default health/metrics endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default per-session outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default capacity of the hub intake channel.
pub const DEFAULT_HUB_MAILBOX_CAPACITY: usize = 1024;

/// Default maximum inbound frame size in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "relay";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable fmt output.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue(format!(
                "RELAY_LOG_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Relay Hub configuration.
#[derive(Clone)]
pub struct Config {
    /// WebSocket listener bind address.
    pub bind_address: String,

    /// Health and `/metrics` bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Capacity of each session's outbound queue.
    pub outbound_capacity: usize,

    /// Capacity of the hub intake channel.
    pub hub_mailbox_capacity: usize,

    /// Inbound frames above this size are rejected.
    pub max_frame_bytes: usize,

    /// Optional greeting sent to every new client after its welcome.
    pub client_greeting: Option<String>,

    /// Whether the master receives join/leave notices.
    pub presence_notices: bool,

    /// Unique identifier for this relay instance.
    pub instance_id: String,

    pub log_format: LogFormat,
}

/// Debug output shows only whether a greeting is set.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("hub_mailbox_capacity", &self.hub_mailbox_capacity)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field(
                "client_greeting",
                &self.client_greeting.as_ref().map(|_| "[SET]"),
            )
            .field("presence_notices", &self.presence_notices)
            .field("instance_id", &self.instance_id)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        // PORT is what most hosting platforms inject
        let bind_address = match vars.get("RELAY_BIND_ADDRESS") {
            Some(addr) => addr.clone(),
            None => {
                let port = parse_or(vars, "PORT", DEFAULT_PORT)?;
                format!("0.0.0.0:{port}")
            }
        };

        let health_bind_address = vars
            .get("RELAY_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let outbound_capacity =
            parse_capacity(vars, "RELAY_OUTBOUND_CAPACITY", DEFAULT_OUTBOUND_CAPACITY)?;
        let hub_mailbox_capacity = parse_capacity(
            vars,
            "RELAY_HUB_MAILBOX_CAPACITY",
            DEFAULT_HUB_MAILBOX_CAPACITY,
        )?;
        let max_frame_bytes =
            parse_capacity(vars, "RELAY_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?;

        let client_greeting = vars
            .get("RELAY_CLIENT_GREETING")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let presence_notices = match vars.get("RELAY_PRESENCE_NOTICES") {
            Some(value) => parse_bool("RELAY_PRESENCE_NOTICES", value)?,
            None => false,
        };

        let log_format = match vars.get("RELAY_LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::default(),
        };

        let instance_id = vars.get("RELAY_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = vars
                .get("HOSTNAME")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            outbound_capacity,
            hub_mailbox_capacity,
            max_frame_bytes,
            client_greeting,
            presence_notices,
            instance_id,
            log_format,
        })
    }
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key} is not a valid number: '{value}'"))),
        None => Ok(default),
    }
}

fn parse_capacity(
    vars: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let value = parse_or(vars, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be greater than 0")));
    }
    Ok(value)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!(
            "{key} must be a boolean, got '{value}'"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.outbound_capacity, DEFAULT_OUTBOUND_CAPACITY);
        assert_eq!(config.hub_mailbox_capacity, DEFAULT_HUB_MAILBOX_CAPACITY);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(config.client_greeting, None);
        assert!(!config.presence_notices);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.instance_id.starts_with("relay-unknown-"));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let config = Config::from_vars(&vars(&[
            ("RELAY_BIND_ADDRESS", "127.0.0.1:9000"),
            ("RELAY_HEALTH_BIND_ADDRESS", "127.0.0.1:9001"),
            ("RELAY_OUTBOUND_CAPACITY", "32"),
            ("RELAY_HUB_MAILBOX_CAPACITY", "64"),
            ("RELAY_MAX_FRAME_BYTES", "4096"),
            ("RELAY_CLIENT_GREETING", "  Welcome! How can we help?  "),
            ("RELAY_PRESENCE_NOTICES", "true"),
            ("RELAY_INSTANCE_ID", "relay-custom-001"),
            ("RELAY_LOG_FORMAT", "JSON"),
        ]))
        .expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.health_bind_address, "127.0.0.1:9001");
        assert_eq!(config.outbound_capacity, 32);
        assert_eq!(config.hub_mailbox_capacity, 64);
        assert_eq!(config.max_frame_bytes, 4096);
        assert_eq!(
            config.client_greeting.as_deref(),
            Some("Welcome! How can we help?")
        );
        assert!(config.presence_notices);
        assert_eq!(config.instance_id, "relay-custom-001");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_port_fallback() {
        let config = Config::from_vars(&vars(&[("PORT", "3000")])).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");

        // Explicit bind address wins over PORT
        let config = Config::from_vars(&vars(&[
            ("PORT", "3000"),
            ("RELAY_BIND_ADDRESS", "127.0.0.1:4000"),
        ]))
        .unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:4000");
    }

    #[test]
    fn test_instance_id_uses_hostname() {
        let config = Config::from_vars(&vars(&[("HOSTNAME", "pod-7")])).unwrap();
        assert!(config.instance_id.starts_with("relay-pod-7-"));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let result = Config::from_vars(&vars(&[("RELAY_OUTBOUND_CAPACITY", "lots")]));
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("RELAY_OUTBOUND_CAPACITY"))
        );

        let result = Config::from_vars(&vars(&[("PORT", "70000")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        for key in [
            "RELAY_OUTBOUND_CAPACITY",
            "RELAY_HUB_MAILBOX_CAPACITY",
            "RELAY_MAX_FRAME_BYTES",
        ] {
            let result = Config::from_vars(&vars(&[(key, "0")]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(ref msg)) if msg.contains(key)),
                "{key}=0 should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_bool_and_log_format_rejected() {
        assert!(Config::from_vars(&vars(&[("RELAY_PRESENCE_NOTICES", "maybe")])).is_err());
        assert!(Config::from_vars(&vars(&[("RELAY_LOG_FORMAT", "xml")])).is_err());
    }

    #[test]
    fn test_blank_greeting_is_unset() {
        let config = Config::from_vars(&vars(&[("RELAY_CLIENT_GREETING", "   ")])).unwrap();
        assert_eq!(config.client_greeting, None);
    }

    #[test]
    fn test_debug_hides_greeting_text() {
        let config = Config::from_vars(&vars(&[("RELAY_CLIENT_GREETING", "secret handshake")]))
            .unwrap();
        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[SET]"));
        assert!(!debug_output.contains("secret handshake"));
    }
}
