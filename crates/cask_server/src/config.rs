//! Settings for cask, defined in the settings.toml file.

use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub log_level: String,

    /// HTTP port the server listens on.
    pub api_port: u16,
    /// Root directory of the object store.
    pub data_dir: String,
    /// Storage backend, `dedup` or `plain`. Must stay fixed for the
    /// lifetime of a data directory.
    pub backend: String,
}

impl Settings {
    /// Load settings and create a new `Settings` instance. An explicitly
    /// named settings file must exist; the default `settings.toml` may be
    /// absent, in which case the defaults carry.
    pub(crate) fn new(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let file: &str = match config_file {
            Some(name) => name,
            None => "settings.toml",
        };

        let s = Config::builder()
            .set_default("log_level", "INFO")?
            .set_default("api_port", 8080)?
            .set_default("data_dir", "data")?
            .set_default("backend", "dedup")?
            .add_source(File::with_name(file).required(config_file.is_some()))
            .build()?;

        s.try_deserialize()
    }
}

/// Macro to get a value from CLI args if present, otherwise use the
/// settings value.
///
/// # Example
///
/// ```rust
/// get_config_value!(args, "arg_name", String, settings.arg_name);
/// ```
#[macro_export]
macro_rules! get_config_value {
    ($args:expr, $arg_name:expr, $arg_type:ty, $settings:expr) => {
        match $args.try_get_one::<$arg_type>($arg_name) {
            Ok(Some(value)) => value,
            Ok(None) => &$settings,
            Err(err) => {
                tracing::warn!("Failed to load CLI config, loading default settings. Error: {err}");
                &$settings
            }
        }
    };
}
