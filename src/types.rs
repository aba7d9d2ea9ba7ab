//! Core types for the EQ Vault pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! local pipeline: emotional signals, EQ metrics, detected patterns, and the
//! analysis returned to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Outcome reported by the capture layer for a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalOutcome {
    Positive,
    Negative,
    Neutral,
}

/// A single emotional observation event.
///
/// Signals are ephemeral inputs: they are reduced to [`EqMetrics`] and never
/// persisted or shared in raw form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalSignal {
    /// Event type (e.g. "self_reflection", "stress_trigger", "recovery")
    #[serde(rename = "type")]
    pub signal_type: String,
    /// Optional grouping (e.g. "challenge", "social", "empathy")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Emotional intensity (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
    /// When the event was observed
    pub timestamp: DateTime<Utc>,
    /// Whether the expressed emotion matched the felt emotion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SignalOutcome>,
    /// Capture quality (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    /// How smoothly the transition or regulation happened (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothness: Option<f64>,
}

impl EmotionalSignal {
    /// Create a signal with only a type and timestamp
    pub fn new(signal_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            signal_type: signal_type.into(),
            category: None,
            intensity: None,
            timestamp,
            authentic: None,
            outcome: None,
            quality: None,
            smoothness: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = Some(intensity);
        self
    }

    pub fn with_outcome(mut self, outcome: SignalOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_authentic(mut self, authentic: bool) -> Self {
        self.authentic = Some(authentic);
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_smoothness(mut self, smoothness: f64) -> Self {
        self.smoothness = Some(smoothness);
        self
    }

    /// Check the signal's category, case-insensitively
    pub fn in_category(&self, category: &str) -> bool {
        self.category
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(category))
    }

    /// Check the signal's type against a set of types
    pub fn is_one_of(&self, types: &[&str]) -> bool {
        types
            .iter()
            .any(|t| self.signal_type.eq_ignore_ascii_case(t))
    }
}

/// The nine EQ subscales, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqMetric {
    SelfAwareness,
    SelfRegulation,
    Motivation,
    Empathy,
    SocialSkills,
    EmotionalResilience,
    EmotionalFlexibility,
    EmotionalDepth,
    EmotionalAuthenticity,
}

impl EqMetric {
    pub const ALL: [EqMetric; 9] = [
        EqMetric::SelfAwareness,
        EqMetric::SelfRegulation,
        EqMetric::Motivation,
        EqMetric::Empathy,
        EqMetric::SocialSkills,
        EqMetric::EmotionalResilience,
        EqMetric::EmotionalFlexibility,
        EqMetric::EmotionalDepth,
        EqMetric::EmotionalAuthenticity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EqMetric::SelfAwareness => "self_awareness",
            EqMetric::SelfRegulation => "self_regulation",
            EqMetric::Motivation => "motivation",
            EqMetric::Empathy => "empathy",
            EqMetric::SocialSkills => "social_skills",
            EqMetric::EmotionalResilience => "emotional_resilience",
            EqMetric::EmotionalFlexibility => "emotional_flexibility",
            EqMetric::EmotionalDepth => "emotional_depth",
            EqMetric::EmotionalAuthenticity => "emotional_authenticity",
        }
    }

    /// Human-readable label used in coaching text
    pub fn label(&self) -> &'static str {
        match self {
            EqMetric::SelfAwareness => "self-awareness",
            EqMetric::SelfRegulation => "self-regulation",
            EqMetric::Motivation => "motivation",
            EqMetric::Empathy => "empathy",
            EqMetric::SocialSkills => "social skills",
            EqMetric::EmotionalResilience => "emotional resilience",
            EqMetric::EmotionalFlexibility => "emotional flexibility",
            EqMetric::EmotionalDepth => "emotional depth",
            EqMetric::EmotionalAuthenticity => "emotional authenticity",
        }
    }
}

impl FromStr for EqMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EqMetric::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown metric: {s}"))
    }
}

/// EQ metrics for one processing batch. Every subscale is in [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqMetrics {
    pub self_awareness: f64,
    pub self_regulation: f64,
    pub motivation: f64,
    pub empathy: f64,
    pub social_skills: f64,
    pub emotional_resilience: f64,
    pub emotional_flexibility: f64,
    pub emotional_depth: f64,
    pub emotional_authenticity: f64,
    /// Timestamp of the newest signal in the batch
    pub last_updated: DateTime<Utc>,
    /// Confidence in the batch (0-100)
    pub confidence_score: f64,
    /// Number of signals reduced into this snapshot
    pub data_points: usize,
}

impl EqMetrics {
    /// Value of a single subscale
    pub fn value(&self, metric: EqMetric) -> f64 {
        match metric {
            EqMetric::SelfAwareness => self.self_awareness,
            EqMetric::SelfRegulation => self.self_regulation,
            EqMetric::Motivation => self.motivation,
            EqMetric::Empathy => self.empathy,
            EqMetric::SocialSkills => self.social_skills,
            EqMetric::EmotionalResilience => self.emotional_resilience,
            EqMetric::EmotionalFlexibility => self.emotional_flexibility,
            EqMetric::EmotionalDepth => self.emotional_depth,
            EqMetric::EmotionalAuthenticity => self.emotional_authenticity,
        }
    }

    /// Mean of the nine subscales
    pub fn overall(&self) -> f64 {
        EqMetric::ALL.iter().map(|m| self.value(*m)).sum::<f64>() / EqMetric::ALL.len() as f64
    }
}

/// Closed set of detectable pattern types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EqPatternType {
    StressResilience,
    EmpathySpike,
    SocialHarmony,
    EmotionalBreakthrough,
    RegulationSuccess,
    AwarenessExpansion,
}

impl EqPatternType {
    pub const ALL: [EqPatternType; 6] = [
        EqPatternType::StressResilience,
        EqPatternType::EmpathySpike,
        EqPatternType::SocialHarmony,
        EqPatternType::EmotionalBreakthrough,
        EqPatternType::RegulationSuccess,
        EqPatternType::AwarenessExpansion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EqPatternType::StressResilience => "stress-resilience",
            EqPatternType::EmpathySpike => "empathy-spike",
            EqPatternType::SocialHarmony => "social-harmony",
            EqPatternType::EmotionalBreakthrough => "emotional-breakthrough",
            EqPatternType::RegulationSuccess => "regulation-success",
            EqPatternType::AwarenessExpansion => "awareness-expansion",
        }
    }
}

impl fmt::Display for EqPatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a pattern may travel beyond the device.
///
/// `DeviceOnly` is a hard gate: such patterns never appear in sync,
/// aggregation or monetization output under any configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivacyLevel {
    #[default]
    DeviceOnly,
    AnonymousAggregate,
    SelectiveShare,
    ResearchContribution,
}

impl PrivacyLevel {
    /// Whether data at this level may ever leave local processing
    pub fn may_leave_device(&self) -> bool {
        !matches!(self, PrivacyLevel::DeviceOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyLevel::DeviceOnly => "device-only",
            PrivacyLevel::AnonymousAggregate => "anonymous-aggregate",
            PrivacyLevel::SelectiveShare => "selective-share",
            PrivacyLevel::ResearchContribution => "research-contribution",
        }
    }
}

impl FromStr for PrivacyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device-only" => Ok(PrivacyLevel::DeviceOnly),
            "anonymous-aggregate" => Ok(PrivacyLevel::AnonymousAggregate),
            "selective-share" => Ok(PrivacyLevel::SelectiveShare),
            "research-contribution" => Ok(PrivacyLevel::ResearchContribution),
            other => Err(format!("unknown privacy level: {other}")),
        }
    }
}

/// A detected behavioral pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqPattern {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub pattern_type: EqPatternType,
    /// Detection confidence (0-1)
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
    pub anonymized_insight: String,
    pub growth_suggestion: String,
    pub privacy_level: PrivacyLevel,
}

/// Coaching voice used when rendering insights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoachingStyle {
    #[default]
    GentleGuide,
    DirectMentor,
    SocraticQuestioner,
    SupportiveCompanion,
}

impl FromStr for CoachingStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gentle-guide" => Ok(CoachingStyle::GentleGuide),
            "direct-mentor" => Ok(CoachingStyle::DirectMentor),
            "socratic-questioner" => Ok(CoachingStyle::SocraticQuestioner),
            "supportive-companion" => Ok(CoachingStyle::SupportiveCompanion),
            other => Err(format!("unknown coaching style: {other}")),
        }
    }
}

/// Result of one pass through the local pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EqAnalysis {
    pub metrics: EqMetrics,
    pub patterns: Vec<EqPattern>,
    pub insights: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_json_uses_type_key() {
        let json = r#"{"type": "self_reflection", "timestamp": "2024-01-15T10:00:00Z", "intensity": 0.7}"#;
        let signal: EmotionalSignal = serde_json::from_str(json).unwrap();
        assert_eq!(signal.signal_type, "self_reflection");
        assert_eq!(signal.intensity, Some(0.7));
        assert!(signal.category.is_none());

        let back = serde_json::to_value(&signal).unwrap();
        assert_eq!(back["type"], "self_reflection");
        assert!(back.get("category").is_none());
    }

    #[test]
    fn test_pattern_type_serialization() {
        let json = serde_json::to_string(&EqPatternType::EmotionalBreakthrough).unwrap();
        assert_eq!(json, "\"emotional-breakthrough\"");
        let level: PrivacyLevel = serde_json::from_str("\"research-contribution\"").unwrap();
        assert_eq!(level, PrivacyLevel::ResearchContribution);
    }

    #[test]
    fn test_device_only_never_leaves() {
        assert!(!PrivacyLevel::DeviceOnly.may_leave_device());
        assert!(PrivacyLevel::AnonymousAggregate.may_leave_device());
        assert_eq!(PrivacyLevel::default(), PrivacyLevel::DeviceOnly);
    }

    #[test]
    fn test_metric_round_trips_through_str() {
        for metric in EqMetric::ALL {
            assert_eq!(metric.as_str().parse::<EqMetric>().unwrap(), metric);
        }
        assert!("charisma".parse::<EqMetric>().is_err());
    }

    #[test]
    fn test_category_match_is_case_insensitive() {
        let signal = EmotionalSignal::new("conflict", Utc::now()).with_category("Challenge");
        assert!(signal.in_category("challenge"));
        assert!(!signal.in_category("social"));
    }
}
