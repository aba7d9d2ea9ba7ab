//! Engine configuration
//!
//! All knobs have defaults so a partial JSON document is a valid config.

use crate::error::{EqError, Result};
use crate::types::{CoachingStyle, PrivacyLevel};
use crate::value::RevenueSplit;
use serde::{Deserialize, Serialize};

/// Default PBKDF2 iteration count
pub const DEFAULT_KDF_ITERATIONS: u32 = 210_000;

/// Lowest PBKDF2 iteration count accepted
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Default number of metric snapshots kept for pattern detection
pub const DEFAULT_HISTORY_WINDOW: usize = 30;

/// Default k-anonymity floor for aggregation
pub const DEFAULT_MINIMUM_PARTICIPANTS: usize = 10;

/// Default share of participants a commitment must exceed to be reported
pub const DEFAULT_PREVALENCE_THRESHOLD: f64 = 0.10;

/// Default number of transport attempts per sync task
pub const DEFAULT_MAX_SYNC_ATTEMPTS: u32 = 3;

/// Default delay between transport attempts
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Configuration for an EQ Vault engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kdf_iterations: u32,
    pub history_window: usize,
    pub minimum_participants: usize,
    pub prevalence_threshold: f64,
    pub max_sync_attempts: u32,
    pub retry_backoff_ms: u64,
    pub coaching_style: CoachingStyle,
    /// Privacy level assigned to newly detected patterns
    pub default_privacy_level: PrivacyLevel,
    pub revenue_split: RevenueSplit,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            history_window: DEFAULT_HISTORY_WINDOW,
            minimum_participants: DEFAULT_MINIMUM_PARTICIPANTS,
            prevalence_threshold: DEFAULT_PREVALENCE_THRESHOLD,
            max_sync_attempts: DEFAULT_MAX_SYNC_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            coaching_style: CoachingStyle::default(),
            default_privacy_level: PrivacyLevel::default(),
            revenue_split: RevenueSplit::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a config from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize config to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(EqError::Config(format!(
                "kdf_iterations must be at least {MIN_KDF_ITERATIONS}, got {}",
                self.kdf_iterations
            )));
        }
        if self.history_window == 0 {
            return Err(EqError::Config("history_window must be positive".into()));
        }
        if self.minimum_participants == 0 {
            return Err(EqError::Config(
                "minimum_participants must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.prevalence_threshold) {
            return Err(EqError::Config(format!(
                "prevalence_threshold must be in [0, 1), got {}",
                self.prevalence_threshold
            )));
        }
        if self.max_sync_attempts == 0 {
            return Err(EqError::Config("max_sync_attempts must be positive".into()));
        }
        self.revenue_split
            .validate()
            .map_err(|e| EqError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_sync_attempts, 3);
        assert_eq!(config.minimum_participants, 10);
        assert_eq!(config.default_privacy_level, PrivacyLevel::DeviceOnly);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = EngineConfig::from_json(
            r#"{"history_window": 12, "coaching_style": "direct-mentor"}"#,
        )
        .unwrap();
        assert_eq!(config.history_window, 12);
        assert_eq!(config.coaching_style, CoachingStyle::DirectMentor);
        assert_eq!(config.kdf_iterations, DEFAULT_KDF_ITERATIONS);
    }

    #[test]
    fn test_weak_kdf_rejected() {
        let result = EngineConfig::from_json(r#"{"kdf_iterations": 1000}"#);
        assert!(matches!(result, Err(EqError::Config(_))));
    }

    #[test]
    fn test_overcommitted_split_rejected() {
        let result = EngineConfig::from_json(
            r#"{"revenue_split": {"user_pct": 80.0, "platform_pct": 30.0}}"#,
        );
        assert!(matches!(result, Err(EqError::Config(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }
}
