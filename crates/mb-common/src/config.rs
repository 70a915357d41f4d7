//! Configuration structures for the Modbus stack.
//!
//! TOML deserialization with sensible defaults, mirroring the layout a
//! deployment would actually hand to `mb-daemon`: one top-level
//! [`StackConfig`] nesting a transport section, optional client/server
//! sections, and the ring-store persistence section.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Transport selection and parameters.
    pub transport: TransportConfig,

    /// Client-engine configuration, present when running in client role.
    pub client: Option<ClientConfig>,

    /// Server-engine configuration, present when running in server role.
    pub server: Option<ServerConfig>,

    /// Ring-store persistence configuration.
    pub persist: PersistConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            client: None,
            server: None,
            persist: PersistConfig::default(),
        }
    }
}

/// Which transport to construct, and its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport kind.
    pub kind: TransportKind,

    /// TCP/UDP (MBAP) parameters, used when `kind` is `Tcp`.
    pub tcp: Option<TcpConfig>,

    /// Serial (RTU) parameters, used when `kind` is `Rtu`.
    pub rtu: Option<RtuConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Tcp,
            tcp: Some(TcpConfig::default()),
            rtu: None,
        }
    }
}

/// Supported transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Modbus TCP/MBAP over a stream or datagram socket.
    #[default]
    Tcp,
    /// Modbus RTU over a serial line.
    Rtu,
}

/// TCP/MBAP transport parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Address to connect to (client role) or bind (server role), `host:port`.
    pub address: String,

    /// Whether to frame traffic as UDP datagrams instead of a TCP stream.
    pub datagram: bool,

    /// Time allowed to establish the connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:502"),
            datagram: false,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Serial/RTU transport parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub device: String,

    /// Line speed in bits per second.
    pub baud_rate: u32,

    /// Data bits per character (typically 8).
    pub data_bits: u8,

    /// Stop bits (1 or 2).
    pub stop_bits: u8,

    /// Parity: "none", "even", or "odd".
    pub parity: String,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            device: String::from("/dev/ttyUSB0"),
            baud_rate: 19200,
            data_bits: 8,
            stop_bits: 1,
            parity: String::from("even"),
        }
    }
}

/// Client-engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Unit identifier (RTU slave address / MBAP unit ID) of the remote device.
    pub unit_id: u8,

    /// Time to wait for a response before retrying or giving up.
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,

    /// Number of retries after the first attempt (0 disables retries).
    pub retries: u8,

    /// Delay before each retry.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// How long to flush stale bytes off the transport before a retry,
    /// or before the first try following a prior failed call. Zero
    /// disables the flush.
    #[serde(with = "humantime_serde")]
    pub flush_period: Duration,

    /// Longest single blocking read the engine issues while waiting
    /// for a response; bounds how promptly it notices a deadline has
    /// passed.
    #[serde(with = "humantime_serde")]
    pub nominal_spin_period: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            unit_id: 1,
            response_timeout: Duration::from_millis(500),
            retries: 2,
            retry_delay: Duration::from_millis(50),
            flush_period: Duration::from_millis(50),
            nominal_spin_period: Duration::from_millis(20),
        }
    }
}

/// Server-engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unit identifier this server answers for.
    pub unit_id: u8,

    /// Additional unit identifiers to accept, beyond `unit_id` (RTU multidrop).
    pub accept_unit_ids: Vec<u8>,

    /// Time an accepted connection may sit idle before it is dropped.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Longest a partially-received request may sit in the assembly
    /// buffer before it is discarded and the connection returns to idle.
    #[serde(with = "humantime_serde")]
    pub request_assembly_timeout: Duration,

    /// Reply even to requests whose address does not match `unit_id`
    /// or `accept_unit_ids`, instead of silently ignoring them.
    pub respond_to_all: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            unit_id: 1,
            accept_unit_ids: Vec::new(),
            idle_timeout: Duration::from_secs(60),
            request_assembly_timeout: Duration::from_secs(1),
            respond_to_all: false,
        }
    }
}

/// Ring-store persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Directory holding the ring's numbered files.
    pub directory: PathBuf,

    /// Number of files in the ring.
    pub file_count: usize,

    /// Create `directory` if it does not already exist.
    pub auto_create_path: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./state"),
            file_count: 4,
            auto_create_path: true,
        }
    }
}

impl StackConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using the humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_tcp_client() {
        let config = StackConfig::default();
        assert_eq!(config.transport.kind, TransportKind::Tcp);
        assert!(config.client.is_none());
        assert_eq!(config.persist.file_count, 4);
    }

    #[test]
    fn parse_rtu_server_toml() {
        let toml = r#"
            [transport]
            kind = "rtu"

            [transport.rtu]
            device = "/dev/ttyS0"
            baud_rate = 9600

            [server]
            unit_id = 17
            accept_unit_ids = [18, 19]
        "#;

        let config = StackConfig::from_toml(toml).unwrap();
        assert_eq!(config.transport.kind, TransportKind::Rtu);
        assert_eq!(config.transport.rtu.as_ref().unwrap().device, "/dev/ttyS0");
        assert_eq!(config.transport.rtu.as_ref().unwrap().baud_rate, 9600);
        assert_eq!(config.server.as_ref().unwrap().unit_id, 17);
        assert_eq!(config.server.as_ref().unwrap().accept_unit_ids, vec![18, 19]);
    }

    #[test]
    fn roundtrip_toml() {
        let mut config = StackConfig::default();
        config.client = Some(ClientConfig::default());
        let toml = config.to_toml().unwrap();
        let parsed = StackConfig::from_toml(&toml).unwrap();
        assert_eq!(
            config.client.unwrap().response_timeout,
            parsed.client.unwrap().response_timeout
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = StackConfig::from_file(std::path::Path::new("/nonexistent/config.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
