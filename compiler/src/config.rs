// config.rs — Harness configuration
//
// A JSON file with the framebuffer size, thread count, frame budget and
// log level of a headless harness run. Missing keys take their defaults;
// unknown keys are an error. CLI flags override file values, and the
// `PBIND_DEBUG` environment variable supplies the log level when neither
// sets one.
//
// Failure modes: unreadable file, malformed JSON, out-of-range values.
// Side effects: reads the file and the environment.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::harness::{MAX_THREADS, MIN_THREADS};

pub const DEBUG_ENV: &str = "PBIND_DEBUG";
pub const MAX_DEBUG_LEVEL: u8 = 3;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            ConfigError::Parse { path, source } => {
                write!(f, "{}:{}: {}", path.display(), source.line(), source)
            }
            ConfigError::Invalid { field, message } => write!(f, "invalid {field}: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub width: i32,
    pub height: i32,
    pub threads: usize,
    /// Frames per demo in a headless run.
    pub frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_level: Option<u8>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            width: 1024,
            height: 1024,
            threads: 8,
            frames: 100,
            debug_level: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_json(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: HarnessConfig =
            serde_json::from_str(text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(ConfigError::Invalid {
                field: "size",
                message: format!("{}x{} must be positive", self.width, self.height),
            });
        }
        if !(MIN_THREADS..=MAX_THREADS).contains(&self.threads) {
            return Err(ConfigError::Invalid {
                field: "threads",
                message: format!(
                    "{} is outside [{}, {}]",
                    self.threads, MIN_THREADS, MAX_THREADS
                ),
            });
        }
        if let Some(level) = self.debug_level {
            if level > MAX_DEBUG_LEVEL {
                return Err(ConfigError::Invalid {
                    field: "debug_level",
                    message: format!("{level} is above {MAX_DEBUG_LEVEL}"),
                });
            }
        }
        Ok(())
    }

    /// The configured level, else `PBIND_DEBUG`, else 0.
    pub fn effective_debug_level(&self) -> u8 {
        self.debug_level
            .or_else(|| debug_level_from(std::env::var(DEBUG_ENV).ok().as_deref()))
            .unwrap_or(0)
    }
}

/// Parse a `PBIND_DEBUG` value; garbage is ignored, large values saturate.
pub fn debug_level_from(value: Option<&str>) -> Option<u8> {
    let n: i64 = value?.trim().parse().ok()?;
    Some(n.clamp(0, i64::from(MAX_DEBUG_LEVEL)) as u8)
}
