//! Export and fetch settings
//!
//! Defaults are tuned to stay polite towards the listing sites: one detail
//! request at a time, a short delay between requests and a longer pause
//! every `batch_size` records.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ENV_PREFIX: &str = "UNIT_PRICE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// User agent sent with detail-page requests
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Delay between two consecutive detail requests
    pub request_delay_ms: u64,
    /// Number of records after which the longer pause applies
    pub batch_size: usize,
    pub batch_pause_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; unit-price/0.1)".to_string(),
            request_timeout_secs: 15,
            request_delay_ms: 500,
            batch_size: 10,
            batch_pause_ms: 3000,
        }
    }
}

impl Settings {
    /// Defaults overridden by `UNIT_PRICE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse settings from a JSON object, missing keys take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(ua) = var("USER_AGENT") {
            settings.user_agent = ua;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            settings.request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("REQUEST_DELAY_MS") {
            settings.request_delay_ms = parse_var("REQUEST_DELAY_MS", &v)?;
        }
        if let Some(v) = var("BATCH_SIZE") {
            settings.batch_size = parse_var("BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("BATCH_PAUSE_MS") {
            settings.batch_pause_ms = parse_var("BATCH_PAUSE_MS", &v)?;
        }

        if settings.batch_size == 0 {
            return Err(Error::Config {
                key: format!("{ENV_PREFIX}BATCH_SIZE"),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| Error::Config {
        key: format!("{ENV_PREFIX}{name}"),
        message: e.to_string(),
    })
}
