//! # Handler Configuration
//!
//! Runtime settings for [`TransformationHandler`]. Defaults come from
//! [`crate::constants`]; deployments override them through `EXIFGATE_*`
//! environment variables. Every value is checked against the hard bounds in
//! [`HandlerConfig::validate`] so a bad deployment fails at startup instead of
//! on the first request.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `EXIFGATE_BUDGET_MS` | `budget` | 60 000 |
//! | `EXIFGATE_SAFETY_MARGIN_MS` | `safety_margin` | 2 000 |
//! | `EXIFGATE_MAX_OBJECT_SIZE` | `max_object_size` | 512 MiB |
//! | `EXIFGATE_MAX_METADATA_BYTES` | `max_metadata_bytes` | 16 MiB |
//! | `EXIFGATE_READ_CHUNK_SIZE` | `read_chunk_size` | 64 KiB |
//! | `EXIFGATE_SHOW_METADATA_PARAM` | `show_metadata_param` | `showExif` |
//!
//! [`TransformationHandler`]: crate::handler::TransformationHandler

use crate::constants::{
    DEADLINE_SAFETY_MARGIN, DEFAULT_INVOCATION_BUDGET, DEFAULT_MAX_OBJECT_SIZE, ENV_BUDGET_MS,
    ENV_MAX_METADATA_BYTES, ENV_MAX_OBJECT_SIZE, ENV_READ_CHUNK_SIZE, ENV_SAFETY_MARGIN_MS,
    ENV_SHOW_METADATA_PARAM, MAX_INVOCATION_BUDGET, MAX_METADATA_BYTES, MAX_OBJECT_SIZE_CEILING,
    MAX_READ_CHUNK_SIZE, MIN_READ_CHUNK_SIZE, READ_CHUNK_SIZE, SHOW_METADATA_PARAM,
};
use crate::error::{Error, Result};
use std::time::Duration;

/// Settings for one handler instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Wall-clock budget for one invocation.
    pub budget: Duration,
    /// Portion of the budget kept back for error delivery.
    pub safety_margin: Duration,
    /// Objects larger than this are refused.
    pub max_object_size: u64,
    /// Cap on metadata bytes read in metadata mode.
    pub max_metadata_bytes: u64,
    /// Scan buffer and encode chunk size.
    pub read_chunk_size: usize,
    /// Query parameter that selects metadata mode.
    pub show_metadata_param: String,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_INVOCATION_BUDGET,
            safety_margin: DEADLINE_SAFETY_MARGIN,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            max_metadata_bytes: MAX_METADATA_BYTES,
            read_chunk_size: READ_CHUNK_SIZE,
            show_metadata_param: SHOW_METADATA_PARAM.to_string(),
        }
    }
}

impl HandlerConfig {
    /// Builds a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Missing keys keep their defaults. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_u64(&lookup, ENV_BUDGET_MS)? {
            config.budget = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_SAFETY_MARGIN_MS)? {
            config.safety_margin = Duration::from_millis(ms);
        }
        if let Some(size) = parse_u64(&lookup, ENV_MAX_OBJECT_SIZE)? {
            config.max_object_size = size;
        }
        if let Some(size) = parse_u64(&lookup, ENV_MAX_METADATA_BYTES)? {
            config.max_metadata_bytes = size;
        }
        if let Some(size) = parse_u64(&lookup, ENV_READ_CHUNK_SIZE)? {
            config.read_chunk_size = usize::try_from(size).map_err(|_| Error::InvalidConfig {
                key: ENV_READ_CHUNK_SIZE.to_string(),
                reason: format!("{} does not fit in usize", size),
            })?;
        }
        if let Some(param) = lookup(ENV_SHOW_METADATA_PARAM) {
            config.show_metadata_param = param.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its hard bound.
    pub fn validate(&self) -> Result<()> {
        if self.budget.is_zero() || self.budget > MAX_INVOCATION_BUDGET {
            return Err(Error::InvalidConfig {
                key: ENV_BUDGET_MS.to_string(),
                reason: format!(
                    "budget {:?} must be within (0, {:?}]",
                    self.budget, MAX_INVOCATION_BUDGET
                ),
            });
        }
        if self.safety_margin >= self.budget {
            return Err(Error::InvalidConfig {
                key: ENV_SAFETY_MARGIN_MS.to_string(),
                reason: format!(
                    "safety margin {:?} must be below budget {:?}",
                    self.safety_margin, self.budget
                ),
            });
        }
        if self.max_object_size == 0 || self.max_object_size > MAX_OBJECT_SIZE_CEILING {
            return Err(Error::InvalidConfig {
                key: ENV_MAX_OBJECT_SIZE.to_string(),
                reason: format!(
                    "{} must be within (0, {}]",
                    self.max_object_size, MAX_OBJECT_SIZE_CEILING
                ),
            });
        }
        if self.max_metadata_bytes == 0 || self.max_metadata_bytes > self.max_object_size {
            return Err(Error::InvalidConfig {
                key: ENV_MAX_METADATA_BYTES.to_string(),
                reason: format!(
                    "{} must be within (0, max_object_size]",
                    self.max_metadata_bytes
                ),
            });
        }
        if !(MIN_READ_CHUNK_SIZE..=MAX_READ_CHUNK_SIZE).contains(&self.read_chunk_size) {
            return Err(Error::InvalidConfig {
                key: ENV_READ_CHUNK_SIZE.to_string(),
                reason: format!(
                    "{} must be within [{}, {}]",
                    self.read_chunk_size, MIN_READ_CHUNK_SIZE, MAX_READ_CHUNK_SIZE
                ),
            });
        }
        if self.show_metadata_param.is_empty()
            || !self
                .show_metadata_param
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidConfig {
                key: ENV_SHOW_METADATA_PARAM.to_string(),
                reason: format!("invalid parameter name '{}'", self.show_metadata_param),
            });
        }
        Ok(())
    }

    /// Budget usable for processing once the safety margin is removed.
    pub fn effective_budget(&self) -> Duration {
        self.budget.saturating_sub(self.safety_margin)
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidConfig {
                key: key.to_string(),
                reason: format!("'{}': {}", raw, e),
            }),
    }
}
