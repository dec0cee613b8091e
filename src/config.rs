//! Runtime and HTTP configuration.
//!
//! Both configuration structs deserialize with per-field defaults, so a
//! partial TOML document only overrides what it names. Loading from TOML
//! requires the `config-file` feature.
//!
//! ```ignore
//! use vatflow::config::HttpConfig;
//!
//! let config = HttpConfig::from_toml_str("buffer_size = 8192\n")?;
//! assert_eq!(config.buffer_size, 8192);
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The TOML document is malformed.
    #[cfg(feature = "config-file")]
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is outside its valid range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Settings for vats and the selector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tasks run per batch before the loop re-checks its stop flag.
    pub batch_size: usize,
    /// Upper bound of one blocking selector wait, in milliseconds.
    pub selector_idle_wait_ms: u64,
    /// Consecutive spurious readiness reports tolerated before the selector is rebuilt.
    pub spurious_wakeup_threshold: u32,
    /// Size of the selector vat scratch buffer, in bytes.
    pub scratch_buffer_size: usize,
    /// How long an idle daemon vat keeps its thread, in milliseconds.
    pub daemon_idle_expiry_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            selector_idle_wait_ms: 1_000,
            spurious_wakeup_threshold: 8,
            scratch_buffer_size: 16 * 1024,
            daemon_idle_expiry_ms: 5_000,
        }
    }
}

impl RuntimeConfig {
    /// Selector wait bound as a [`Duration`].
    #[must_use]
    pub const fn selector_idle_wait(&self) -> Duration {
        Duration::from_millis(self.selector_idle_wait_ms)
    }

    /// Daemon idle expiry as a [`Duration`].
    #[must_use]
    pub const fn daemon_idle_expiry(&self) -> Duration {
        Duration::from_millis(self.daemon_idle_expiry_ms)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be positive"));
        }
        if self.spurious_wakeup_threshold == 0 {
            return Err(invalid("spurious_wakeup_threshold", "must be positive"));
        }
        if self.scratch_buffer_size == 0 {
            return Err(invalid("scratch_buffer_size", "must be positive"));
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

/// Settings for the HTTP client and server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Buffer size of the connection parser and generator.
    pub buffer_size: usize,
    /// Idle time after which a pooled client connection is closed, in
    /// milliseconds. Client sockets also fail a read or write that waits
    /// longer than this. Zero disables both.
    pub idle_timeout_ms: u64,
    /// Value of the `User-Agent` header sent by the client.
    pub user_agent: String,
    /// Value of the `Server` header sent by the server.
    pub server_description: String,
    /// Maximum length of a request or status line.
    pub max_start_line: usize,
    /// Maximum total size of a header or trailer block.
    pub max_headers_size: usize,
    /// Maximum length of a chunk size line.
    pub max_chunk_line: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            idle_timeout_ms: 60_000,
            user_agent: concat!("vatflow/", env!("CARGO_PKG_VERSION")).to_owned(),
            server_description: concat!("vatflow/", env!("CARGO_PKG_VERSION")).to_owned(),
            max_start_line: 10 * 1024,
            max_headers_size: 100 * 1024,
            max_chunk_line: 4096,
        }
    }
}

impl HttpConfig {
    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(invalid("buffer_size", "must be positive"));
        }
        if self.max_start_line < 16 {
            return Err(invalid("max_start_line", "must be at least 16"));
        }
        if self.max_headers_size == 0 || self.max_chunk_line == 0 {
            return Err(invalid("max_headers_size", "limits must be positive"));
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("defaults_are_valid");
        let runtime = RuntimeConfig::default();
        assert!(runtime.validate().is_ok());
        assert_eq!(runtime.batch_size, 256);
        assert_eq!(runtime.selector_idle_wait(), Duration::from_secs(1));
        let http = HttpConfig::default();
        assert!(http.validate().is_ok());
        assert_eq!(http.idle_timeout(), Duration::from_secs(60));
        crate::test_complete!("defaults_are_valid");
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let config = RuntimeConfig {
            spurious_wakeup_threshold: 0,
            ..RuntimeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("spurious_wakeup_threshold"));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn partial_toml_keeps_defaults() {
        let config = HttpConfig::from_toml_str("buffer_size = 8192\nuser_agent = \"vatflow-test\"\n")
            .expect("valid toml");
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.user_agent, "vatflow-test");
        assert_eq!(config.max_chunk_line, 4096);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn config_file_round_trip() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "batch_size = 32\nselector_idle_wait_ms = 50").expect("write");
        let config = RuntimeConfig::from_toml_file(file.path()).expect("load");
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.selector_idle_wait(), Duration::from_millis(50));
        assert_eq!(config.spurious_wakeup_threshold, 8);
    }
}
