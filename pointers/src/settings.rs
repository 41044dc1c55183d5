use crate::logger::{self, Level};
use crate::{info, warn};
use config::{Config, ConfigError, Environment, File};
use dotenv::dotenv;
use serde::Deserialize;
use std::sync::Once;
use std::time::Duration;

pub const ENV_PREFIX: &str = "POINTERS";

static DOTENV_ONCE: Once = Once::new();

fn ensure_dotenv_loaded() {
    DOTENV_ONCE.call_once(|| {
        match dotenv() {
            Ok(_) => info!("Settings loaded including .env file."),
            Err(_) => info!("Settings loaded without .env file."),
        }
    });
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub registry: RegistrySettings,
    pub preload: PreloadSettings,
    pub store: StoreSettings,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
    /// Lifetime of positive lookups (types, columns, pointer rows).
    #[serde(deserialize_with = "duration_from_secs")]
    pub ttl_s: Duration,
    /// Lifetime of not-found lookups, short so freshly inserted rows become visible quickly.
    #[serde(deserialize_with = "duration_from_secs")]
    pub negative_ttl_s: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { capacity: 10_000, ttl_s: Duration::from_secs(300), negative_ttl_s: Duration::from_secs(5) }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegistrySettings {
    /// How long a registry snapshot is trusted before the live type rows are re-read.
    #[serde(deserialize_with = "duration_from_secs")]
    pub ttl_s: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self { ttl_s: Duration::from_secs(300) }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PreloadSettings {
    pub strict: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreSettings {
    pub db_path: String,
    pub cache_size_mb: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { db_path: "pointers.redb".to_string(), cache_size_mb: 64 }
    }
}

impl Settings {
    /// Reads `path` (any format the config crate detects from the extension) and overlays
    /// `POINTERS_*` environment variables, using `__` between nested keys.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path), ENV_PREFIX)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None, ENV_PREFIX)
    }

    pub fn load(path: Option<&str>, prefix: &str) -> Result<Self, ConfigError> {
        ensure_dotenv_loaded();

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .try_parsing(true)
                .separator("__"),
        );

        let settings = builder.build()?.try_deserialize::<Settings>()?;
        settings.apply_log_level();
        Ok(settings)
    }

    pub fn apply_log_level(&self) {
        if let Some(raw) = &self.log_level {
            match Level::parse(raw) {
                Some(level) => logger::set_level(level),
                None => warn!("Ignoring unknown log level {:?}", raw),
            }
        }
    }
}
