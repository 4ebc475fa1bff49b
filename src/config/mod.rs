//! Configuration module for the ISQ scraper.
//!
//! Values come from an optional TOML file merged with `ISQ_`-prefixed
//! environment variables; nested keys use a double underscore
//! (`ISQ_RATE_LIMITING__CYCLE_TIME=750ms`).

use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

use crate::http::{HttpConfig, RateLimitingConfig};
use crate::scraper::PortalConfig;

/// Environment variable naming the TOML config file.
pub const CONFIG_FILE_ENV: &str = "ISQ_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "isq.toml";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log level for the `isq` target; `RUST_LOG` overrides it entirely.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Snapshot file used by the JSON store.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
}

/// Crawl-level tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeConfig {
    /// Units of work (department x term, professor) in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Extra attempts after a transient fetch failure.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Delay before retry `n` is `n * retry_backoff`.
    #[serde(default = "default_retry_backoff", with = "duration_serde")]
    pub retry_backoff: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retries: default_retries(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("isq-data.json")
}

fn default_concurrency() -> usize {
    8
}

fn default_retries() -> u32 {
    2
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(2)
}

impl Config {
    /// Figment with every provider the application reads from.
    pub fn figment() -> Figment {
        let file = std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed("ISQ_").split("__"))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment().extract().map_err(Box::new)
    }
}

/// Serde adapter for human-readable durations (`"500ms"`, `"30s"`, `"2m"`).
///
/// Bare numbers are read as seconds.
pub mod duration_serde {
    use std::time::Duration;

    use fundu::DurationParser;
    use fundu::TimeUnit::{Hour, MilliSecond, Minute, Second};
    use serde::de::{self, Deserializer, Visitor};

    /// Parse a duration string the way configuration values are read.
    pub fn parse(value: &str) -> Result<Duration, String> {
        let parsed = DurationParser::with_time_units(&[MilliSecond, Second, Minute, Hour])
            .parse(value.trim())
            .map_err(|e| format!("invalid duration '{value}': {e}"))?;
        Duration::try_from(parsed).map_err(|e| format!("invalid duration '{value}': {e}"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a duration such as \"500ms\" or a number of seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                parse(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
                Duration::try_from_secs_f64(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
