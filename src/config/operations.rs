//! Config loading and validation.

use super::model::Config;
use crate::error::{Result, SpecrunError};
use std::path::Path;

impl Config {
    /// Load config from `path`; a missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            SpecrunError::ConfigError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate config YAML. Unknown fields are ignored.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes as null; treat it as all defaults.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| SpecrunError::ConfigError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            SpecrunError::ConfigError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validation rules:
    /// - `retry.max_attempts` and `lock_stale_minutes` must be positive
    /// - `retry.factor` must be at least 1.0
    /// - `retry.base_delay_ms` must not exceed `retry.max_delay_ms`
    /// - `scheduler.max_concurrency` and `selection.max_candidates`, when set, must be positive
    /// - path settings must be non-empty
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| {
            Err(SpecrunError::ConfigError(format!(
                "config validation failed: {}",
                msg
            )))
        };

        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be greater than 0");
        }
        if !self.retry.factor.is_finite() || self.retry.factor < 1.0 {
            return fail("retry.factor must be a number >= 1.0");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return fail("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if self.scheduler.max_concurrency == Some(0) {
            return fail("scheduler.max_concurrency must be greater than 0 (omit it for unbounded)");
        }
        if self.selection.max_candidates == Some(0) {
            return fail("selection.max_candidates must be greater than 0");
        }
        if self.lock_stale_minutes == 0 {
            return fail("lock_stale_minutes must be greater than 0");
        }
        for (name, value) in [
            ("specs_dir", &self.specs_dir),
            ("agents_file", &self.agents_file),
            ("agents_dir", &self.agents_dir),
        ] {
            if value.trim().is_empty() {
                return fail(&format!("{} must not be empty", name));
            }
        }

        Ok(())
    }
}
