//! Server configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};

use upsnap_core::{DEFAULT_TCP_PORTS, ProbeKind, Subnet};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Status poller settings.
    pub poller: PollerConfig,
    /// Network scan settings.
    pub scan: ScanConfig,
    /// Remote shutdown settings.
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is a valid socket address
    /// - Storage path is not empty
    /// - Timeouts and concurrency limits are non-zero and bounded
    /// - The default scan range, if set, is a CIDR range of at least /16
    ///
    /// # Example
    ///
    /// ```
    /// use upsnap_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.poller.validate());
        errors.extend(self.scan.validate());
        errors.extend(self.shutdown.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8090").
    pub bind: String,
    /// Origins allowed to call the API from a browser. Empty means
    /// same-origin only.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8090".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
        } else {
            match self.bind.parse::<SocketAddr>() {
                Ok(addr) if addr.port() == 0 => {
                    errors.push(ValidationError::new("server.bind", "port cannot be 0"));
                }
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!(
                        "invalid bind address '{}': expected format 'ip:port'",
                        self.bind
                    ),
                )),
            }
        }

        for origin in &self.cors_origins {
            let scheme_ok = origin.starts_with("http://") || origin.starts_with("https://");
            if origin == "*" || !scheme_ok || HeaderValue::from_str(origin).is_err() {
                errors.push(ValidationError::new(
                    "server.cors_origins",
                    format!("invalid origin '{origin}': expected e.g. 'https://upsnap.lan'"),
                ));
            }
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: upsnap_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Maximum number of probes in flight, for both the poller and scans.
pub const MAX_CONCURRENCY: usize = 1024;

/// Maximum probe timeout in milliseconds.
pub const MAX_PROBE_TIMEOUT_MS: u64 = 60_000;

/// Status poller configuration.
///
/// The poll interval itself is part of the settings record, not this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Reachability probe used for devices.
    pub probe: ProbeKind,
    /// Per-device probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Ports tried by the TCP probe.
    pub tcp_ports: Vec<u16>,
    /// Devices probed at once.
    pub concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            probe: ProbeKind::Icmp,
            probe_timeout_ms: 1000,
            tcp_ports: DEFAULT_TCP_PORTS.to_vec(),
            concurrency: 32,
        }
    }
}

impl PollerConfig {
    /// Probe timeout as a duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validate poller configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        validate_probe_timeout("poller.probe_timeout_ms", self.probe_timeout_ms, &mut errors);
        validate_concurrency("poller.concurrency", self.concurrency, &mut errors);
        if self.tcp_ports.contains(&0) {
            errors.push(ValidationError::new(
                "poller.tcp_ports",
                "port 0 is not a valid probe target",
            ));
        }
        errors
    }
}

/// Network scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Range scanned when a request names none. Derived from the default
    /// network interface when unset.
    pub default_range: Option<String>,
    /// Total time allowed for one scan in seconds.
    pub timeout_secs: u64,
    /// Per-host probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Hosts probed at once.
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_range: None,
            timeout_secs: 30,
            probe_timeout_ms: 500,
            concurrency: 64,
        }
    }
}

/// Maximum scan duration in seconds.
pub const MAX_SCAN_TIMEOUT_SECS: u64 = 600;

impl ScanConfig {
    /// Scan deadline as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Probe timeout as a duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validate scan configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(range) = &self.default_range {
            match range.parse::<Subnet>() {
                Ok(subnet) if subnet.prefix() < upsnap_core::MIN_SCAN_PREFIX => {
                    errors.push(ValidationError::new(
                        "scan.default_range",
                        format!(
                            "range '{}' is too large (minimum prefix /{})",
                            range,
                            upsnap_core::MIN_SCAN_PREFIX
                        ),
                    ));
                }
                Ok(_) => {}
                Err(e) => errors.push(ValidationError::new("scan.default_range", e.to_string())),
            }
        }

        if self.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "scan.timeout_secs",
                "scan timeout cannot be 0",
            ));
        } else if self.timeout_secs > MAX_SCAN_TIMEOUT_SECS {
            errors.push(ValidationError::new(
                "scan.timeout_secs",
                format!(
                    "scan timeout {} is too long (maximum {} seconds)",
                    self.timeout_secs, MAX_SCAN_TIMEOUT_SECS
                ),
            ));
        }
        validate_probe_timeout("scan.probe_timeout_ms", self.probe_timeout_ms, &mut errors);
        validate_concurrency("scan.concurrency", self.concurrency, &mut errors);

        errors
    }
}

/// Remote shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time allowed for one shutdown session in seconds.
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 15 }
    }
}

impl ShutdownConfig {
    /// Session timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate shutdown configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            errors.push(ValidationError::new(
                "shutdown.timeout_secs",
                format!(
                    "shutdown timeout {} must be between 1 and 300 seconds",
                    self.timeout_secs
                ),
            ));
        }
        errors
    }
}

fn validate_probe_timeout(field: &str, value: u64, errors: &mut Vec<ValidationError>) {
    if value == 0 || value > MAX_PROBE_TIMEOUT_MS {
        errors.push(ValidationError::new(
            field,
            format!("probe timeout {value}ms must be between 1 and {MAX_PROBE_TIMEOUT_MS} ms"),
        ));
    }
}

fn validate_concurrency(field: &str, value: usize, errors: &mut Vec<ValidationError>) {
    if value == 0 || value > MAX_CONCURRENCY {
        errors.push(ValidationError::new(
            field,
            format!("concurrency {value} must be between 1 and {MAX_CONCURRENCY}"),
        ));
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `scan.timeout_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("upsnap")
        .join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_errors(config: &Config) -> Vec<String> {
        match config.validate() {
            Ok(()) => Vec::new(),
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8090");
        assert_eq!(config.storage.path, upsnap_store::default_db_path());
        assert_eq!(config.poller.probe, ProbeKind::Icmp);
        assert_eq!(config.poller.probe_timeout(), Duration::from_secs(1));
        assert_eq!(config.scan.timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown.timeout(), Duration::from_secs(15));
        assert!(config.scan.default_range.is_none());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [server]
            bind = "0.0.0.0:8090"

            [storage]
            path = "/var/lib/upsnap/data.db"

            [poller]
            probe = "tcp"
            probe_timeout_ms = 750
            tcp_ports = [22, 3389]
            concurrency = 8

            [scan]
            default_range = "192.168.1.0/24"
            timeout_secs = 20
            probe_timeout_ms = 300
            concurrency = 128

            [shutdown]
            timeout_secs = 10
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8090");
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/upsnap/data.db"));
        assert_eq!(config.poller.probe, ProbeKind::Tcp);
        assert_eq!(config.poller.tcp_ports, vec![22, 3389]);
        assert_eq!(config.poller.concurrency, 8);
        assert_eq!(config.scan.default_range.as_deref(), Some("192.168.1.0/24"));
        assert_eq!(config.scan.probe_timeout(), Duration::from_millis(300));
        assert_eq!(config.shutdown.timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[scan]\ntimeout_secs = 5\n").unwrap();
        assert_eq!(config.scan.timeout_secs, 5);
        assert_eq!(config.scan.concurrency, 64);
        assert_eq!(config.server.bind, "127.0.0.1:8090");
    }

    #[test]
    fn test_config_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("server.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.storage.path = PathBuf::from("/tmp/upsnap.db");
        config.scan.default_range = Some("10.0.0.0/24".to_string());
        std::fs::write(&config_path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load(&config_path).unwrap();
        assert!(loaded.validate().is_ok());
        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.storage.path, PathBuf::from("/tmp/upsnap.db"));
        assert_eq!(loaded.scan.default_range.as_deref(), Some("10.0.0.0/24"));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/upsnap/server.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nbind = ").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_server_bind_validation() {
        for bind in ["", "localhost", "127.0.0.1", "127.0.0.1:0", "127.0.0.1:99999"] {
            let mut config = Config::default();
            config.server.bind = bind.to_string();
            assert_eq!(field_errors(&config), vec!["server.bind"], "{bind:?}");
        }

        let mut config = Config::default();
        config.server.bind = "[::1]:8090".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cors_origins_validation() {
        let mut config = Config::default();
        assert!(config.server.cors_origins.is_empty());

        config.server.cors_origins = vec!["https://upsnap.lan".to_string()];
        assert!(config.validate().is_ok());

        for origin in ["*", "upsnap.lan", "https://bad\norigin"] {
            config.server.cors_origins = vec![origin.to_string()];
            assert_eq!(field_errors(&config), vec!["server.cors_origins"], "{origin:?}");
        }
    }

    #[test]
    fn test_scan_range_validation() {
        let mut config = Config::default();
        config.scan.default_range = Some("10.0.0.0/8".to_string());
        assert_eq!(field_errors(&config), vec!["scan.default_range"]);

        config.scan.default_range = Some("not-a-range".to_string());
        assert_eq!(field_errors(&config), vec!["scan.default_range"]);
    }

    #[test]
    fn test_limits_validation() {
        let mut config = Config::default();
        config.poller.concurrency = 0;
        config.poller.probe_timeout_ms = 0;
        config.scan.timeout_secs = 0;
        config.shutdown.timeout_secs = 0;

        let fields = field_errors(&config);
        assert!(fields.contains(&"poller.concurrency".to_string()));
        assert!(fields.contains(&"poller.probe_timeout_ms".to_string()));
        assert!(fields.contains(&"scan.timeout_secs".to_string()));
        assert!(fields.contains(&"shutdown.timeout_secs".to_string()));
    }

    #[test]
    fn test_config_validation_error_display() {
        let mut config = Config::default();
        config.storage.path = PathBuf::new();
        let err = config.validate().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Configuration validation failed"));
        assert!(text.contains("storage.path: database path cannot be empty"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("upsnap/server.toml"));
    }
}
