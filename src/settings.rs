//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables prefixed
//! with `FEDLEARN_`, using `__` to separate sections from keys.

use std::{fmt, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationErrors};

/// Default ceiling for a single message: large enough for the full parameter payload of
/// common models.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub client: ClientSettings,
    #[serde(default)]
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: PathBuf) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(config::File::from(path))?;
        settings.validate()?;
        Ok(settings)
    }

    fn load<S>(source: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(source)
            .add_source(
                Environment::with_prefix("fedlearn")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// Connection settings.
pub struct ClientSettings {
    /// The address of the server, as `host:port`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [client]
    /// address = "127.0.0.1:8080"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLEARN_CLIENT__ADDRESS=127.0.0.1:8080
    /// ```
    pub address: String,

    #[validate(range(min = 1024))]
    #[serde(default = "default_max_message_size")]
    /// The maximum size of a single message in bytes, in both directions. It must hold the
    /// full set of model parameters. Defaults to 100 MiB.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [client]
    /// max_message_size = 104857600
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLEARN_CLIENT__MAX_MESSAGE_SIZE=104857600
    /// ```
    pub max_message_size: usize,
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging
    /// directives can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLEARN_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(default = "default_env_filter")]
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_env_filter(),
        }
    }
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::new("info")
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value).map_err(E::custom)
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
