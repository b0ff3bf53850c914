//! Import configuration
//!
//! Everything is read from `IMPORT_*` environment variables and validated
//! before the orchestrator is built.

use mpsync_common::{MpsyncError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Page size used by the pager
pub const DEFAULT_BATCH_SIZE: u64 = 50;

/// Pause before every item of a page except the first
pub const DEFAULT_PER_ITEM_DELAY: Duration = Duration::from_secs(5);

/// Pause between two pages
pub const DEFAULT_PER_BATCH_DELAY: Duration = Duration::from_secs(10);

/// Upper bound for one page request
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for one detail request
pub const DEFAULT_DETAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest import a caller may request
pub const DEFAULT_MAX_TARGET: u64 = 10_000;

/// How often the reaper sweeps finished jobs
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(300);

pub const DEFAULT_API_BASE_URL: &str = "https://api.mercadolibre.com";

/// Fixed pacing between requests to the marketplace
///
/// The marketplace enforces a hard rate limit, so the worker sleeps a fixed
/// amount instead of backing off adaptively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub per_item_delay: Duration,
    pub per_batch_delay: Duration,
}

impl Pacing {
    /// No pauses at all
    pub fn none() -> Self {
        Self {
            per_item_delay: Duration::ZERO,
            per_batch_delay: Duration::ZERO,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            per_item_delay: DEFAULT_PER_ITEM_DELAY,
            per_batch_delay: DEFAULT_PER_BATCH_DELAY,
        }
    }
}

/// What to do when an import starts for an account that already has one running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Start another job alongside the running one
    #[default]
    Allow,
    /// Refuse the new job
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = MpsyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(DuplicatePolicy::Allow),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(MpsyncError::InvalidEnv {
                key: "IMPORT_DUPLICATE_POLICY".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Marketplace API endpoint settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceApiConfig {
    pub base_url: String,
    pub page_timeout: Duration,
    pub detail_timeout: Duration,
}

impl Default for SourceApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            detail_timeout: DEFAULT_DETAIL_TIMEOUT,
        }
    }
}

/// Background import configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub batch_size: u64,
    pub pacing: Pacing,
    pub max_target: u64,
    pub duplicate_policy: DuplicatePolicy,
    /// Finished jobs older than this are dropped; `None` keeps them forever
    pub job_retention: Option<Duration>,
    pub reap_interval: Duration,
    pub source: SourceApiConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pacing: Pacing::default(),
            max_target: DEFAULT_MAX_TARGET,
            duplicate_policy: DuplicatePolicy::default(),
            job_retention: None,
            reap_interval: DEFAULT_REAP_INTERVAL,
            source: SourceApiConfig::default(),
        }
    }
}

impl ImportConfig {
    /// Load from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            batch_size: env_parse("IMPORT_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            pacing: Pacing {
                per_item_delay: env_millis("IMPORT_PER_ITEM_DELAY_MS")?
                    .unwrap_or(defaults.pacing.per_item_delay),
                per_batch_delay: env_millis("IMPORT_PER_BATCH_DELAY_MS")?
                    .unwrap_or(defaults.pacing.per_batch_delay),
            },
            max_target: env_parse("IMPORT_MAX_TARGET")?.unwrap_or(defaults.max_target),
            duplicate_policy: env_parse("IMPORT_DUPLICATE_POLICY")?
                .unwrap_or(defaults.duplicate_policy),
            job_retention: env_parse::<u64>("IMPORT_JOB_RETENTION_SECS")?
                .map(Duration::from_secs),
            reap_interval: env_parse::<u64>("IMPORT_REAP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_interval),
            source: SourceApiConfig {
                base_url: std::env::var("IMPORT_API_BASE_URL")
                    .unwrap_or(defaults.source.base_url),
                page_timeout: env_parse::<u64>("IMPORT_PAGE_TIMEOUT_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.source.page_timeout),
                detail_timeout: env_parse::<u64>("IMPORT_DETAIL_TIMEOUT_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.source.detail_timeout),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MpsyncError::config("IMPORT_BATCH_SIZE must be greater than 0"));
        }
        if self.max_target == 0 {
            return Err(MpsyncError::config("IMPORT_MAX_TARGET must be greater than 0"));
        }
        if self.source.base_url.trim().is_empty() {
            return Err(MpsyncError::config("IMPORT_API_BASE_URL cannot be empty"));
        }
        if self.source.page_timeout.is_zero() || self.source.detail_timeout.is_zero() {
            return Err(MpsyncError::config("Request timeouts must be greater than 0"));
        }
        if self.reap_interval.is_zero() {
            return Err(MpsyncError::config("IMPORT_REAP_INTERVAL_SECS must be greater than 0"));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| MpsyncError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}
