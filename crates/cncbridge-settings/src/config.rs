//! Bridge configuration
//!
//! Configuration is organized into sections:
//! - Server settings (listen address, WebSocket path, session limits)
//! - Motion and drive link settings (port, baud rate, settle time)
//! - Polling intervals
//! - Reconnect backoff
//!
//! Files may be TOML or JSON; the extension decides. Every field has a
//! default, so a partial file is fine.

use crate::error::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// WebSocket listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind
    pub bind: String,
    /// TCP port (0 picks a free port)
    pub port: u16,
    /// Path the WebSocket upgrade must target
    pub ws_path: String,
    /// Maximum concurrent sessions
    pub max_clients: usize,
    /// Outbound messages buffered per session before it is evicted
    pub session_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            max_clients: 10,
            session_queue: 256,
        }
    }
}

impl ServerSettings {
    /// `bind:port` for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Device address; discovered when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Wait after opening before draining, in milliseconds; role default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_ms: Option<u64>,
    /// Wait between the handshake and the second drain, in milliseconds; role default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_delay_ms: Option<u64>,
    /// Serial read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// How long one outbound frame may take to drain, in milliseconds
    pub write_timeout_ms: u64,
    /// Bound on unterminated inbound bytes
    pub read_buffer_limit: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115200,
            settle_ms: None,
            drain_delay_ms: None,
            read_timeout_ms: 50,
            write_timeout_ms: 5000,
            read_buffer_limit: 4096,
        }
    }
}

impl LinkSettings {
    /// Settle delay, falling back to `default`
    pub fn settle_or(&self, default: Duration) -> Duration {
        self.settle_ms.map(Duration::from_millis).unwrap_or(default)
    }

    fn validate(&self, section: &str) -> SettingsResult<()> {
        if self.baud_rate == 0 {
            return Err(SettingsError::invalid(
                &format!("{}.baud_rate", section),
                "must be > 0",
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                &format!("{}.read_timeout_ms", section),
                "must be > 0",
            ));
        }
        if self.write_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                &format!("{}.write_timeout_ms", section),
                "must be > 0",
            ));
        }
        if self.read_buffer_limit == 0 {
            return Err(SettingsError::invalid(
                &format!("{}.read_buffer_limit", section),
                "must be > 0",
            ));
        }
        if self.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(SettingsError::invalid(
                &format!("{}.port", section),
                "must not be empty",
            ));
        }
        Ok(())
    }
}

/// Status polling intervals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Motion status query interval in milliseconds
    pub motion_interval_ms: u64,
    /// Drive status request interval in milliseconds
    pub drive_interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            motion_interval_ms: 250,
            drive_interval_ms: 500,
        }
    }
}

impl PollingSettings {
    /// Motion poll period
    pub fn motion_interval(&self) -> Duration {
        Duration::from_millis(self.motion_interval_ms)
    }

    /// Drive poll period
    pub fn drive_interval(&self) -> Duration {
        Duration::from_millis(self.drive_interval_ms)
    }
}

/// Reconnect backoff settings
///
/// Attempt `n` waits `min(2^n, cap_units)` units; after `max_attempts`
/// the wait is `slow_retry_units`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Length of one time unit in milliseconds
    pub unit_ms: u64,
    /// Longest escalating delay, in units
    pub cap_units: u32,
    /// Escalating attempts before the slow retry
    pub max_attempts: u32,
    /// Slow retry delay, in units
    pub slow_retry_units: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            unit_ms: 1000,
            cap_units: 30,
            max_attempts: 10,
            slow_retry_units: 10,
        }
    }
}

impl ReconnectSettings {
    /// Length of one time unit
    pub fn unit(&self) -> Duration {
        Duration::from_millis(self.unit_ms)
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket listener
    pub server: ServerSettings,
    /// Motion controller link
    pub motion: LinkSettings,
    /// Drive controller link
    pub drive: LinkSettings,
    /// Status polling
    pub polling: PollingSettings,
    /// Reconnect backoff
    pub reconnect: ReconnectSettings,
}

impl BridgeConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = match Format::of(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content).map_err(|e| SettingsError::SaveError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.server.bind.trim().is_empty() {
            return Err(SettingsError::invalid("server.bind", "must not be empty"));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(SettingsError::invalid(
                "server.ws_path",
                "must start with '/'",
            ));
        }
        if self.server.max_clients == 0 {
            return Err(SettingsError::invalid("server.max_clients", "must be > 0"));
        }
        if self.server.session_queue == 0 {
            return Err(SettingsError::invalid(
                "server.session_queue",
                "must be > 0",
            ));
        }

        self.motion.validate("motion")?;
        self.drive.validate("drive")?;

        if let (Some(motion), Some(drive)) = (&self.motion.port, &self.drive.port) {
            if motion == drive {
                return Err(SettingsError::invalid(
                    "drive.port",
                    "must differ from motion.port",
                ));
            }
        }

        if self.polling.motion_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "polling.motion_interval_ms",
                "must be > 0",
            ));
        }
        if self.polling.drive_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "polling.drive_interval_ms",
                "must be > 0",
            ));
        }

        if self.reconnect.unit_ms == 0 {
            return Err(SettingsError::invalid("reconnect.unit_ms", "must be > 0"));
        }
        if self.reconnect.cap_units == 0 {
            return Err(SettingsError::invalid("reconnect.cap_units", "must be > 0"));
        }
        if self.reconnect.slow_retry_units == 0 {
            return Err(SettingsError::invalid(
                "reconnect.slow_retry_units",
                "must be > 0",
            ));
        }

        Ok(())
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(SettingsError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Default configuration file location
///
/// `<config dir>/cncbridge/config.toml`, e.g. `~/.config/cncbridge/config.toml`
/// on Linux.
pub fn default_config_path() -> SettingsResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("cncbridge").join("config.toml"))
        .ok_or_else(|| {
            SettingsError::ConfigDirectory("no configuration directory on this platform".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.ws_path, "/ws");
        assert_eq!(config.server.max_clients, 10);
        assert_eq!(config.motion.baud_rate, 115200);
        assert_eq!(config.polling.motion_interval(), Duration::from_millis(250));
        assert_eq!(config.polling.drive_interval(), Duration::from_millis(500));
        assert_eq!(config.reconnect.unit(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [motion]
            port = "/dev/ttyACM0"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_clients, 10);
        assert_eq!(config.motion.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.drive.port, None);
        assert_eq!(config.polling, PollingSettings::default());
    }

    #[test]
    fn test_settle_falls_back_to_role_default() {
        let mut settings = LinkSettings::default();
        assert_eq!(
            settings.settle_or(Duration::from_millis(500)),
            Duration::from_millis(500)
        );
        settings.settle_ms = Some(0);
        assert_eq!(settings.settle_or(Duration::from_millis(500)), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = BridgeConfig::default();
        config.server.max_clients = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.server.ws_path = "ws".to_string();
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.motion.port = Some("COM3".to_string());
        config.drive.port = Some("COM3".to_string());
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.reconnect.unit_ms = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.reconnect.slow_retry_units = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect.slow_retry_units"));

        let mut config = BridgeConfig::default();
        config.drive.write_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("drive.write_timeout_ms"));
    }

    #[test]
    fn test_format_from_extension() {
        assert!(matches!(Format::of(Path::new("a.toml")), Ok(Format::Toml)));
        assert!(matches!(Format::of(Path::new("a.json")), Ok(Format::Json)));
        assert!(matches!(
            Format::of(Path::new("a.yaml")),
            Err(SettingsError::UnsupportedFormat(_))
        ));
    }
}
