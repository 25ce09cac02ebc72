//! Configuration management for the prefetch pipelines
//!
//! One [`PipelineConfig`] per artifact type. Values come from the
//! environment (`PREFETCH_AUDIO_*`, `PREFETCH_TRANSLATION_*`) with
//! per-pipeline defaults for anything unset, or from a JSON file named by
//! `PREFETCH_CONFIG`.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable naming a JSON config file
pub const CONFIG_FILE_VAR: &str = "PREFETCH_CONFIG";

/// A pipeline omitted from a config file keeps its defaults
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "PipelineConfig::audio")]
    pub audio: PipelineConfig,
    #[serde(default = "PipelineConfig::translation")]
    pub translation: PipelineConfig,
}

/// Cache plus scheduler settings for one artifact type
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
}

/// Page cache limits (the adjacency tier is always three pages)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries in the recent queue
    pub max_recent_pages: usize,
    /// Memory budget in bytes across both tiers
    pub max_total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Extra forward pages to prefetch beyond the adjacency window
    pub lookahead_pages: usize,
    /// Maximum generations the scheduler keeps in flight
    pub max_concurrent_requests: usize,
    /// Queue drain interval in milliseconds
    pub tick_interval_ms: u64,
    /// Generator timeout in seconds (0 = no timeout)
    pub generation_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        (self.generation_timeout_secs > 0).then(|| Duration::from_secs(self.generation_timeout_secs))
    }
}

impl PipelineConfig {
    /// Defaults for synthesized page audio
    pub fn audio() -> Self {
        Self {
            cache: CacheConfig {
                max_recent_pages: 10,
                max_total_size: 50 * 1024 * 1024,
            },
            scheduler: SchedulerConfig {
                lookahead_pages: 0,
                max_concurrent_requests: 2,
                tick_interval_ms: 3000,
                generation_timeout_secs: 60,
            },
        }
    }

    /// Defaults for translated page text
    ///
    /// Translation is batched across several pages, so it looks further ahead.
    pub fn translation() -> Self {
        Self {
            cache: CacheConfig {
                max_recent_pages: 20,
                max_total_size: 5 * 1024 * 1024,
            },
            scheduler: SchedulerConfig {
                lookahead_pages: 3,
                max_concurrent_requests: 1,
                tick_interval_ms: 5000,
                generation_timeout_secs: 120,
            },
        }
    }

    fn from_env_with_prefix(prefix: &str, defaults: Self) -> Result<Self, ConfigError> {
        Ok(Self {
            cache: CacheConfig {
                max_recent_pages: env_or(
                    &format!("{}_MAX_RECENT_PAGES", prefix),
                    defaults.cache.max_recent_pages,
                )?,
                max_total_size: env_or(
                    &format!("{}_MAX_TOTAL_SIZE", prefix),
                    defaults.cache.max_total_size,
                )?,
            },
            scheduler: SchedulerConfig {
                lookahead_pages: env_or(
                    &format!("{}_LOOKAHEAD_PAGES", prefix),
                    defaults.scheduler.lookahead_pages,
                )?,
                max_concurrent_requests: env_or(
                    &format!("{}_MAX_CONCURRENT_REQUESTS", prefix),
                    defaults.scheduler.max_concurrent_requests,
                )?,
                tick_interval_ms: env_or(
                    &format!("{}_TICK_INTERVAL_MS", prefix),
                    defaults.scheduler.tick_interval_ms,
                )?,
                generation_timeout_secs: env_or(
                    &format!("{}_GENERATION_TIMEOUT_SECS", prefix),
                    defaults.scheduler.generation_timeout_secs,
                )?,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            audio: PipelineConfig::audio(),
            translation: PipelineConfig::translation(),
        }
    }
}

impl Config {
    /// Load from the file named by `PREFETCH_CONFIG` if set, else from the environment
    pub fn load() -> Result<Self, ConfigError> {
        match env::var(CONFIG_FILE_VAR) {
            Ok(path) => Self::from_file(path),
            Err(_) => Self::from_env(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            audio: PipelineConfig::from_env_with_prefix("PREFETCH_AUDIO", PipelineConfig::audio())?,
            translation: PipelineConfig::from_env_with_prefix(
                "PREFETCH_TRANSLATION",
                PipelineConfig::translation(),
            )?,
        })
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}
