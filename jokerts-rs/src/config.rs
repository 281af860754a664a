//! Engine and file configuration.
//!
//! Configuration can come from a TOML file with `[engine]` and `[logging]`
//! sections; every field is optional and falls back to the defaults below.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use jokerts_psi::TS_PACKET_SIZE;

/// Number of transfer buffers kept in flight.
pub const DEFAULT_NUM_BUFFERS: usize = 64;
/// USB frames per transfer buffer.
pub const DEFAULT_FRAMES_PER_BUFFER: usize = 32;
/// Bytes per USB frame.
pub const DEFAULT_FRAME_SIZE: usize = 1024;
/// Ceiling for queued TS bytes (2 MiB).
pub const DEFAULT_TS_LIST_SIZE_MAX: usize = 2 * 1024 * 1024;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "jokerts.toml";

/// Settings for one capture session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling for the bytes held by the packet queue.
    pub ts_list_size_max: usize,
    /// Transfer buffers in the pool.
    pub num_buffers: usize,
    /// Frames per transfer buffer.
    pub frames_per_buffer: usize,
    /// Bytes per frame.
    pub frame_size: usize,
    /// Register the PAT/PMT/SDT/VCT hooks at init.
    pub discover_programs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ts_list_size_max: DEFAULT_TS_LIST_SIZE_MAX,
            num_buffers: DEFAULT_NUM_BUFFERS,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            frame_size: DEFAULT_FRAME_SIZE,
            discover_programs: false,
        }
    }
}

impl EngineConfig {
    /// Bytes in one transfer buffer.
    pub fn buffer_size(&self) -> usize {
        self.frames_per_buffer.saturating_mul(self.frame_size)
    }

    /// Packets the queue can hold before evicting.
    pub fn queue_capacity(&self) -> usize {
        self.ts_list_size_max / TS_PACKET_SIZE
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_buffers == 0 {
            return Err(ConfigError::Invalid("num_buffers must be at least 1".into()));
        }
        if self.buffer_size() == 0 {
            return Err(ConfigError::Invalid(
                "frames_per_buffer and frame_size must be non-zero".into(),
            ));
        }
        if self.ts_list_size_max < TS_PACKET_SIZE {
            return Err(ConfigError::Invalid(format!(
                "ts_list_size_max must hold at least one {}-byte packet (got {})",
                TS_PACKET_SIZE, self.ts_list_size_max
            )));
        }
        Ok(())
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Filter directive used when `RUST_LOG` is unset (e.g. "info").
    pub level: Option<String>,
    /// Directory for daily-rotated log files; console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Days of rotated log files to keep.
    pub retention_days: Option<u64>,
}

/// Configuration file format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub logging: LoggingSection,
    /// File the configuration was read from; `None` for built-in defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl ConfigFile {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ConfigFile = toml::from_str(contents)?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&contents)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load an explicit path, else `jokerts.toml` if present, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }
}
