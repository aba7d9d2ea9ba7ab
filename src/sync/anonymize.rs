//! Pattern anonymization
//!
//! | Level | Timestamp        | Insight | Growth suggestion | Confidence jitter |
//! |-------|------------------|---------|-------------------|-------------------|
//! | 0-2   | exact (RFC 3339) | kept    | kept              | no                |
//! | 3-5   | date             | kept    | kept              | no                |
//! | 6-7   | month            | kept    | dropped           | no                |
//! | 8     | month            | dropped | dropped           | no                |
//! | 9-10  | year             | dropped | dropped           | yes               |

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::noise::{jitter_unit, CONFIDENCE_JITTER_SCALE};
use crate::types::{EqPattern, EqPatternType, PrivacyLevel};

pub const MAX_ANONYMIZATION_LEVEL: u8 = 10;

/// A pattern stripped for transport. Pattern ids are never included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizedPattern {
    #[serde(rename = "type")]
    pub pattern_type: EqPatternType,
    pub confidence: f64,
    pub detected_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymized_insight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth_suggestion: Option<String>,
    pub privacy_level: PrivacyLevel,
}

/// Reduce timestamp precision according to the anonymization level
pub fn coarsen_timestamp(timestamp: DateTime<Utc>, level: u8) -> String {
    match level {
        0..=2 => timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        3..=5 => timestamp.format("%Y-%m-%d").to_string(),
        6..=8 => timestamp.format("%Y-%m").to_string(),
        _ => timestamp.format("%Y").to_string(),
    }
}

/// Anonymize one pattern at `level` (values above 10 are treated as 10)
pub fn anonymize<R: Rng + ?Sized>(pattern: &EqPattern, level: u8, rng: &mut R) -> AnonymizedPattern {
    let level = level.min(MAX_ANONYMIZATION_LEVEL);

    let confidence = if level > 8 {
        jitter_unit(rng, pattern.confidence, CONFIDENCE_JITTER_SCALE)
    } else {
        pattern.confidence
    };

    AnonymizedPattern {
        pattern_type: pattern.pattern_type,
        confidence,
        detected_at: coarsen_timestamp(pattern.detected_at, level),
        anonymized_insight: (level < 8).then(|| pattern.anonymized_insight.clone()),
        growth_suggestion: (level < 6).then(|| pattern.growth_suggestion.clone()),
        privacy_level: pattern.privacy_level,
    }
}
