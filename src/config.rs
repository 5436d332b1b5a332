//! # Engine Configuration
//!
//! Server-wide and logging settings:
//! concurrency limits, backpressure policy, socket tuning, timeouts and frame limits.
//! Per-module options are derived from [`ServerConfig`] and may be refined per module
//! with [`ModuleOptions`](crate::transport::ModuleOptions).
//!
//! ## Sources
//! - TOML (`from_file`, `from_toml`); absent keys keep their defaults
//! - Environment (`from_env`, variables prefixed `POLYRPC_`)
//! - Code (`Default`, `default_with_overrides`)
//!
//! Listening ports are not configured here; they come from the service's INI file
//! (see [`bootstrap`](crate::service::bootstrap)) or from explicit module construction.
//!
//! ## Conventions
//! - Durations are serialized as milliseconds. A zero read/write timeout disables it.
//! - A zero socket buffer size keeps the operating system default.

use crate::error::{RpcError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed frame size on streams (16 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// What to do with a request when the in-flight limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Stop reading until a slot frees up.
    #[default]
    Block,
    /// Answer immediately with an overload error.
    Reject,
}

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    /// Server-wide defaults for every module
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Read and parse a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RpcError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse TOML text. Missing tables and keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| RpcError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `POLYRPC_*` environment variables.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = env_parse::<usize>("POLYRPC_MAX_IN_FLIGHT") {
            config.server.max_in_flight = val;
        }

        if let Some(val) = env_parse::<usize>("POLYRPC_QUEUE_CAPACITY") {
            config.server.queue_capacity = val;
        }

        if let Ok(policy) = std::env::var("POLYRPC_BACKPRESSURE") {
            match policy.to_ascii_lowercase().as_str() {
                "block" => config.server.backpressure = Backpressure::Block,
                "reject" => config.server.backpressure = Backpressure::Reject,
                _ => {}
            }
        }

        if let Some(val) = env_parse::<u64>("POLYRPC_SHUTDOWN_TIMEOUT_MS") {
            config.server.shutdown_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<u64>("POLYRPC_READ_TIMEOUT_MS") {
            config.server.read_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<u64>("POLYRPC_WRITE_TIMEOUT_MS") {
            config.server.write_timeout = Duration::from_millis(val);
        }

        if let Ok(level) = std::env::var("POLYRPC_LOG_LEVEL") {
            if let Ok(level) = level.parse::<Level>() {
                config.logging.log_level = level;
            }
        }

        Ok(config)
    }

    /// Defaults with `mutator` applied, mostly for tests.
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Default configuration rendered as TOML, for use as a template.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Write this configuration as TOML.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RpcError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| RpcError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Every problem found, one message each. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// [`validate`](Self::validate) folded into a single `ConfigError`.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RpcError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Server-wide settings applied to every module
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long stop waits for in-flight requests and pending writes
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum requests being handled concurrently per module
    pub max_in_flight: usize,

    /// Policy once `max_in_flight` is reached
    pub backpressure: Backpressure,

    /// Bounded response queue length per connection (TCP) or socket (UDP)
    pub queue_capacity: usize,

    /// Idle read timeout per TCP connection (0 = none)
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,

    /// Timeout for a single reply write (0 = none)
    #[serde(with = "duration_serde")]
    pub write_timeout: Duration,

    /// TCP accept backlog
    pub listen_backlog: u32,

    /// SO_RCVBUF (0 = OS default)
    pub recv_buffer_size: usize,

    /// SO_SNDBUF (0 = OS default)
    pub send_buffer_size: usize,

    /// Largest accepted stream frame
    pub max_frame_size: usize,

    /// Stop the server on Ctrl-C
    pub handle_signals: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_in_flight: 1024,
            backpressure: Backpressure::Block,
            queue_capacity: 128,
            read_timeout: Duration::ZERO,
            write_timeout: timeout::DEFAULT_TIMEOUT,
            listen_backlog: 1024,
            recv_buffer_size: 0,
            send_buffer_size: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handle_signals: false,
        }
    }
}

impl ServerConfig {
    /// Problems with these settings, one message each.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_in_flight == 0 {
            errors.push("max_in_flight must be greater than 0".to_string());
        } else if self.max_in_flight > 1_000_000 {
            errors.push(format!(
                "max_in_flight too large: {} (max recommended: 1,000,000)",
                self.max_in_flight
            ));
        }

        if self.queue_capacity == 0 {
            errors.push("queue_capacity must be greater than 0".to_string());
        }

        if self.shutdown_timeout.as_millis() < 10 {
            errors.push("Shutdown timeout too short (minimum: 10ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 300 {
            errors.push("Shutdown timeout too long (maximum: 300s)".to_string());
        }

        if !self.read_timeout.is_zero() && self.read_timeout.as_millis() < 10 {
            errors.push("Read timeout too short (minimum: 10ms, or 0 to disable)".to_string());
        }

        if !self.write_timeout.is_zero() && self.write_timeout.as_millis() < 10 {
            errors.push("Write timeout too short (minimum: 10ms, or 0 to disable)".to_string());
        }

        if self.listen_backlog == 0 {
            errors.push("listen_backlog must be greater than 0".to_string());
        }

        if self.max_frame_size < 64 {
            errors.push("max_frame_size too small (minimum: 64 bytes)".to_string());
        } else if self.max_frame_size > 256 * 1024 * 1024 {
            errors.push(format!(
                "max_frame_size too large: {} bytes (maximum: 256 MB)",
                self.max_frame_size
            ));
        }

        errors
    }
}

/// Where and how the engine logs. Consumed by
/// [`init_logging`](crate::utils::logging::init_logging).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Name attached to every log line
    pub app_name: String,

    /// Most verbose level emitted unless `RUST_LOG` says otherwise
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,

    /// Takes precedence over the console when both are enabled
    pub log_to_file: bool,

    /// Required when `log_to_file` is set
    pub log_file_path: Option<String>,

    /// Emit one JSON object per event
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("polyrpc"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    const MAX_APP_NAME: usize = 64;

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.app_name.len() {
            0 => errors.push("app_name must not be empty".to_string()),
            n if n > Self::MAX_APP_NAME => errors.push(format!(
                "app_name is {n} characters long (maximum: {})",
                Self::MAX_APP_NAME
            )),
            _ => {}
        }

        match (self.log_to_file, self.log_file_path.as_deref()) {
            (true, None) => {
                errors.push("log_file_path must be specified when log_to_file is true".to_string())
            }
            (true, Some(path)) => {
                let dir = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty());
                if let Some(dir) = dir.filter(|d| !d.exists()) {
                    errors.push(format!("Log directory {} does not exist", dir.display()));
                }
            }
            (false, _) => {}
        }

        if !(self.log_to_console || self.log_to_file) {
            errors.push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Durations as integer milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_millis)
    }
}

/// Levels as lowercase names (`"info"`, `"debug"`, ...).
mod log_level_serde {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Level, D::Error> {
        let raw = String::deserialize(de)?;
        raw.parse::<Level>()
            .map_err(|_| de::Error::custom(format!("unknown log level '{raw}'")))
    }
}
