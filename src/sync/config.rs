//! Selective sync configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{EqError, Result};
use crate::sync::anonymize::MAX_ANONYMIZATION_LEVEL;
use crate::types::EqPatternType;

/// Default cap on sync runs per day
pub const DEFAULT_MAX_SYNCS_PER_DAY: u32 = 4;

/// Per-pattern-type sync toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSyncRule {
    pub enabled: bool,
    /// 0 (exact) to 10 (maximally coarse)
    pub anonymization_level: u8,
}

/// Which patterns may sync, how hard they are anonymized, and under what conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectiveSyncConfig {
    #[serde(default)]
    pub patterns: BTreeMap<EqPatternType, PatternSyncRule>,
    pub device_key_fingerprint: String,
    /// Must be explicitly true for any sync to happen
    #[serde(default)]
    pub require_explicit_consent: bool,
    #[serde(default = "default_max_syncs")]
    pub max_syncs_per_day: u32,
    #[serde(default)]
    pub wifi_only: bool,
}

fn default_max_syncs() -> u32 {
    DEFAULT_MAX_SYNCS_PER_DAY
}

impl SelectiveSyncConfig {
    /// Config with no pattern types enabled and consent not yet given
    pub fn new(device_key_fingerprint: impl Into<String>) -> Self {
        Self {
            patterns: BTreeMap::new(),
            device_key_fingerprint: device_key_fingerprint.into(),
            require_explicit_consent: false,
            max_syncs_per_day: DEFAULT_MAX_SYNCS_PER_DAY,
            wifi_only: false,
        }
    }

    pub fn with_consent(mut self, consent: bool) -> Self {
        self.require_explicit_consent = consent;
        self
    }

    pub fn with_wifi_only(mut self, wifi_only: bool) -> Self {
        self.wifi_only = wifi_only;
        self
    }

    pub fn with_max_syncs_per_day(mut self, max: u32) -> Self {
        self.max_syncs_per_day = max;
        self
    }

    /// Enable a pattern type at the given anonymization level
    pub fn enable(mut self, pattern_type: EqPatternType, anonymization_level: u8) -> Self {
        self.patterns.insert(
            pattern_type,
            PatternSyncRule {
                enabled: true,
                anonymization_level,
            },
        );
        self
    }

    /// Rule for a pattern type, if it is enabled
    pub fn rule_for(&self, pattern_type: EqPatternType) -> Option<PatternSyncRule> {
        self.patterns
            .get(&pattern_type)
            .copied()
            .filter(|rule| rule.enabled)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_key_fingerprint.is_empty() {
            return Err(EqError::InvalidInput(
                "device key fingerprint must not be empty".into(),
            ));
        }
        if self.max_syncs_per_day == 0 {
            return Err(EqError::InvalidInput(
                "max_syncs_per_day must be positive".into(),
            ));
        }
        for (pattern_type, rule) in &self.patterns {
            if rule.anonymization_level > MAX_ANONYMIZATION_LEVEL {
                return Err(EqError::InvalidInput(format!(
                    "anonymization level for {pattern_type} must be 0-{MAX_ANONYMIZATION_LEVEL}, got {}",
                    rule.anonymization_level
                )));
            }
        }
        Ok(())
    }
}

/// Device state at the moment a sync is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncConditions {
    pub on_wifi: bool,
    pub syncs_today: u32,
}

impl SyncConditions {
    /// Defer (not fail) when the network or frequency conditions are unmet
    pub fn check(&self, config: &SelectiveSyncConfig) -> Result<()> {
        if config.wifi_only && !self.on_wifi {
            return Err(EqError::SyncDeferred("waiting for Wi-Fi".into()));
        }
        if self.syncs_today >= config.max_syncs_per_day {
            return Err(EqError::SyncDeferred(format!(
                "daily sync cap of {} reached",
                config.max_syncs_per_day
            )));
        }
        Ok(())
    }
}
