//! `config.json` loading. Every section is optional and falls back to its
//! defaults; a file that exists but does not parse or validate is fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use ydna_directory::{
    DirectoryError, GeniSettings, RateLimiter, RetryPolicy, StoredToken, DEFAULT_BASE_URL,
};
use ydna_propagator::{PropagationConfig, DEFAULT_MAX_GENERATIONS, DEFAULT_TESTED_SOURCES};

pub const ACCESS_TOKEN_ENV: &str = "YDNA_ACCESS_TOKEN";
pub const DATABASE_ENV: &str = "YDNA_DATABASE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub geni: GeniConfig,
    pub database: DatabaseConfig,
    pub propagation: PropagationSection,
    pub rate_limit: RateLimitConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeniConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub token_file: PathBuf,
}

impl Default for GeniConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            token_file: PathBuf::from("geni_token.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ydna_propagator.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PropagationSection {
    pub max_generations_up: u32,
    pub max_generations_down: u32,
    pub tested_sources: Vec<String>,
}

impl Default for PropagationSection {
    fn default() -> Self {
        Self {
            max_generations_up: DEFAULT_MAX_GENERATIONS,
            max_generations_down: DEFAULT_MAX_GENERATIONS,
            tested_sources: DEFAULT_TESTED_SOURCES
                .iter()
                .map(|source| source.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum seconds between two directory requests.
    pub delay_secs: f64,
    pub max_retries: u32,
    /// Throttled attempt `n` waits `(n + 1) * retry_step_secs`.
    pub retry_step_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            delay_secs: 2.0,
            max_retries: 3,
            retry_step_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl AppConfig {
    /// Reads `path`, applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ACCESS_TOKEN_ENV).filter(|value| !value.trim().is_empty()) {
            self.geni.access_token = Some(token);
        }
        if let Some(path) = lookup(DATABASE_ENV).filter(|value| !value.trim().is_empty()) {
            self.database.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.geni.base_url.trim().is_empty() {
            return Err(invalid("geni.base_url", "must not be empty"));
        }
        if self.propagation.max_generations_up == 0 {
            return Err(invalid("propagation.max_generations_up", "must be at least 1"));
        }
        if self.propagation.max_generations_down == 0 {
            return Err(invalid("propagation.max_generations_down", "must be at least 1"));
        }
        if !self.rate_limit.delay_secs.is_finite() || self.rate_limit.delay_secs < 0.0 {
            return Err(invalid("rate_limit.delay_secs", "must be a non-negative number"));
        }
        if !self.rate_limit.retry_step_secs.is_finite() || self.rate_limit.retry_step_secs < 0.0 {
            return Err(invalid("rate_limit.retry_step_secs", "must be a non-negative number"));
        }
        if self.rate_limit.max_retries == 0 {
            return Err(invalid("rate_limit.max_retries", "must be at least 1"));
        }
        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    pub fn propagation_config(&self) -> PropagationConfig {
        PropagationConfig {
            max_generations_up: self.propagation.max_generations_up,
            max_generations_down: self.propagation.max_generations_down,
            tested_sources: self.propagation.tested_sources.clone(),
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(Duration::from_secs_f64(self.rate_limit.delay_secs))
    }

    /// Client settings. The token comes from the config (or its environment
    /// override) first, then from an unexpired token file.
    pub fn geni_settings(&self, now: DateTime<Utc>) -> Result<GeniSettings, DirectoryError> {
        let access_token = match &self.geni.access_token {
            Some(token) => Some(token.clone()),
            None => StoredToken::load(&self.geni.token_file)?
                .and_then(|stored| stored.usable_access_token(now).map(str::to_string)),
        };
        Ok(GeniSettings {
            base_url: self.geni.base_url.clone(),
            access_token,
            timeout: Duration::from_secs(self.http.timeout_secs),
            retry: RetryPolicy {
                max_retries: self.rate_limit.max_retries,
                step: Duration::from_secs_f64(self.rate_limit.retry_step_secs),
            },
        })
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
