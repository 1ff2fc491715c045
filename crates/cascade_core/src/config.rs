//! Batch configuration model and loader.
//!
//! # Responsibility
//! - Describe runner, notifier, storage, mail and logging settings.
//! - Layer an optional TOML file with `CASCADE__` environment overrides.
//!
//! # Invariants
//! - Every field has a default, so an empty source yields a runnable config.
//! - `validate` is the single gate for value ranges; the runner trusts it.

use config::{Config, Environment, File};
use log::info;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Platform-typical chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 200;
/// Upper bound for one chunk.
pub const MAX_CHUNK_SIZE: usize = 2000;
/// Addresses starting with this prefix belong to automation accounts.
pub const DEFAULT_EXCLUSION_PREFIX: &str = "autoproc";
pub const DEFAULT_SUBJECT: &str = "Marker cascade batch completed";

const ENV_PREFIX: &str = "CASCADE";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug)]
pub enum ConfigError {
    Load(config::ConfigError),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load(err) => write!(f, "failed to load config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Load(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(value: config::ConfigError) -> Self {
        Self::Load(value)
    }
}

/// Top-level batch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Roots per chunk.
    #[serde(alias = "chunkSize", alias = "chunksize")]
    pub chunk_size: usize,
    /// Attempts per chunk; `1` disables retries.
    #[serde(alias = "maxChunkAttempts", alias = "maxchunkattempts")]
    pub max_chunk_attempts: u32,
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub logging: LoggingConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_attempts: 1,
            notifier: NotifierConfig::default(),
            storage: StorageConfig::default(),
            mail: MailConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    /// - `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be within 1..={MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.max_chunk_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_chunk_attempts must be at least 1".to_string(),
            ));
        }
        if self.notifier.subject.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "notifier.subject cannot be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Recipient resolution and message settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Literal, case-sensitive address prefix to suppress. Empty disables it.
    pub exclusion_prefix: String,
    pub subject: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            exclusion_prefix: DEFAULT_EXCLUSION_PREFIX.to_string(),
            subject: DEFAULT_SUBJECT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("cascade.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// JSONL outbox file; `None` selects the log-only transport.
    pub outbox_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute log directory; `None` leaves file logging off.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: None,
        }
    }
}

/// Loads and validates the batch configuration.
///
/// Sources, later ones winning:
/// 1. Built-in defaults.
/// 2. The TOML file at `path`, when given (must exist).
/// 3. `CASCADE__`-prefixed environment variables, `__` separating nested keys
///    (e.g. `CASCADE__NOTIFIER__EXCLUSION_PREFIX`).
///
/// # Errors
/// - `ConfigError::Load` when the file is missing or malformed.
/// - `ConfigError::Invalid` when a value is out of range.
pub fn load_config(path: Option<&Path>) -> Result<BatchConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        info!(
            "event=config_load module=config status=start source={}",
            path.display()
        );
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?.try_deserialize::<BatchConfig>()?;
    config.validate()?;

    info!(
        "event=config_load module=config status=ok chunk_size={} max_chunk_attempts={}",
        config.chunk_size, config.max_chunk_attempts
    );
    Ok(config)
}
