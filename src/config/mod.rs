//! Configuration loading.
//!
//! Sources, later ones winning:
//! - `config/default.{toml,yaml,json,...}` in the working directory, if present
//! - environment variables prefixed `RELAY_`, nested with `__`
//!   (`RELAY_SERVER__PORT=9000`, `RELAY_RECONNECT__ENABLED=true`)
//!
//! Anything left unspecified falls back to `Settings::default()`.

mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;
use settings::PartialSettings;

pub use settings::{
    LoggingSettings, ReconnectSettings, RelaySettings, ServerSettings, Settings, TopicSettings,
    UpstreamSettings,
};

pub fn load_config() -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge_with_defaults())
}
