//! # Experiment Client Configuration
//!
//! Endpoint, credential and control-loop constants for the Peltier controller.
//! Every field has a default matching the local simulation server, so an empty
//! file (or no file at all) yields a usable configuration.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [server]
//! uri = "http://5.35.70.189:8999/RPC2"
//! token = "put_your_token_here"
//! timeout_secs = 10
//!
//! [control]
//! reference_signal_mv = 0.798
//! current_limit = 6.4
//! initial_current = 1.0
//! poll_interval_ms = 1000
//! ```
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use peltier_control::config::Config;
//! let config: Config = toml::from_str("[control]\npoll_interval_ms = 250").unwrap();
//! assert_eq!(config.control.poll_interval_ms, 250);
//! assert_eq!(config.server.token, "local_server_token");
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration: where the experiment lives and how to drive it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

/// Remote experiment endpoint and the identity presented to it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    /// Session credential, sent as the first argument of every call.
    #[serde(default = "default_token")]
    pub token: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// Per-request timeout. `None` leaves the HTTP client's default in place.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            token: default_token(),
            client_name: default_client_name(),
            client_version: default_client_version(),
            timeout_secs: None,
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Value sent as the HTTP `User-Agent`.
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.client_name, self.client_version)
    }
}

/// Proportional control loop constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Expected thermocouple signal at the calibration temperature (mV).
    #[serde(default = "default_reference_signal_mv")]
    pub reference_signal_mv: f64,
    /// Symmetric actuator bound (A); the commanded current never leaves [-limit, limit].
    #[serde(default = "default_current_limit")]
    pub current_limit: f64,
    #[serde(default = "default_initial_current")]
    pub initial_current: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Stop the loop after this many ticks. Unbounded when absent.
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            reference_signal_mv: default_reference_signal_mv(),
            current_limit: default_current_limit(),
            initial_current: default_initial_current(),
            poll_interval_ms: default_poll_interval_ms(),
            max_ticks: None,
        }
    }
}

impl ControlConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Reject values the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if !server.uri.starts_with("http://") {
            return Err(ConfigError::Invalid(format!(
                "server uri '{}' must start with http://",
                server.uri
            )));
        }
        if server.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("server timeout_secs must be > 0".to_string()));
        }

        let control = &self.control;
        if !control.reference_signal_mv.is_finite() || control.reference_signal_mv == 0.0 {
            return Err(ConfigError::Invalid(
                "control reference_signal_mv must be finite and non-zero".to_string(),
            ));
        }
        if !control.current_limit.is_finite() || control.current_limit <= 0.0 {
            return Err(ConfigError::Invalid("control current_limit must be > 0".to_string()));
        }
        if !control.initial_current.is_finite() || control.initial_current.abs() > control.current_limit {
            return Err(ConfigError::Invalid(format!(
                "control initial_current {} is outside [-{limit}, {limit}]",
                control.initial_current,
                limit = control.current_limit
            )));
        }
        if control.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("control poll_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_uri() -> String { "http://127.0.0.1:8999/RPC2".to_string() }
fn default_token() -> String { "local_server_token".to_string() }
fn default_client_name() -> String { "Xmlrpc-c Test Client".to_string() }
fn default_client_version() -> String { "1.0".to_string() }
fn default_reference_signal_mv() -> f64 { 0.798 }
fn default_current_limit() -> f64 { 6.4 }
fn default_initial_current() -> f64 { 1.0 }
fn default_poll_interval_ms() -> u64 { 1000 }

/// Load configuration from a TOML file at the given path and validate it.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.server.uri, "http://127.0.0.1:8999/RPC2");
        assert_eq!(config.server.token, "local_server_token");
        assert_eq!(config.server.user_agent(), "Xmlrpc-c Test Client/1.0");
        assert_eq!(config.control.reference_signal_mv, 0.798);
        assert_eq!(config.control.current_limit, 6.4);
        assert_eq!(config.control.initial_current, 1.0);
        assert_eq!(config.control.poll_interval(), Duration::from_secs(1));
        assert!(config.control.max_ticks.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("experiment.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[server]\nuri = 'http://10.0.0.2:8999/RPC2'\ntoken = 'abc'\ntimeout_secs = 5\n\n[control]\nmax_ticks = 10"
        )
        .unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.uri, "http://10.0.0.2:8999/RPC2");
        assert_eq!(config.server.token, "abc");
        assert_eq!(config.server.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.control.max_ticks, Some(10));
        // Defaults for missing fields
        assert_eq!(config.server.client_version, "1.0");
        assert_eq!(config.control.current_limit, 6.4);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_experiment.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("zero_ref.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[control]\nreference_signal_mv = 0.0").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.server.uri = "ftp://example.org".to_string();
        assert!(config.validate().is_err());
        config.server.uri = "https://example.org/RPC2".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.control.current_limit = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.control.initial_current = 7.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.control.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.control.reference_signal_mv = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }
}
