//! Pattern detection
//!
//! Compares the current metrics snapshot with a short trailing window of
//! history and flags named behavioral patterns. Detection is stateless per
//! call; [`MetricsHistory`] keeps the rolling window between calls.

use crate::types::{EqMetric, EqMetrics, EqPattern, EqPatternType, PrivacyLevel};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

use crate::config::DEFAULT_HISTORY_WINDOW;
use crate::error::{EqError, Result};

const RESILIENCE_WINDOW: usize = 3;
const RESILIENCE_GAIN: f64 = 0.20;

const EMPATHY_WINDOW: usize = 2;
const EMPATHY_GAIN: f64 = 0.30;
const EMPATHY_FLOOR: f64 = 75.0;

const HARMONY_WINDOW: usize = 3;
const HARMONY_CURRENT_FLOOR: f64 = 80.0;
const HARMONY_TRAILING_FLOOR: f64 = 70.0;

const BREAKTHROUGH_WINDOW: usize = 5;
const BREAKTHROUGH_GAIN: f64 = 0.15;

const REGULATION_WINDOW: usize = 3;
const REGULATION_GAIN: f64 = 0.15;
const REGULATION_FLOOR: f64 = 60.0;

const AWARENESS_WINDOW: usize = 3;
const AWARENESS_GAIN: f64 = 0.25;

/// Detector for behavioral patterns
#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    privacy_level: PrivacyLevel,
}

impl PatternDetector {
    /// Create a detector that tags patterns with the given privacy level
    pub fn new(privacy_level: PrivacyLevel) -> Self {
        Self { privacy_level }
    }

    /// Detect patterns in `current` against `history` (oldest first).
    ///
    /// Rules fire independently; output follows rule declaration order.
    /// Too little history for a rule means that rule stays silent.
    pub fn detect(&self, current: &EqMetrics, history: &[EqMetrics]) -> Vec<EqPattern> {
        let rules: [(EqPatternType, Option<f64>); 6] = [
            (
                EqPatternType::StressResilience,
                ratio_rule(current, history, EqMetric::EmotionalResilience, RESILIENCE_WINDOW, RESILIENCE_GAIN, 0.0),
            ),
            (
                EqPatternType::EmpathySpike,
                ratio_rule(current, history, EqMetric::Empathy, EMPATHY_WINDOW, EMPATHY_GAIN, 0.0)
                    .filter(|_| current.empathy > EMPATHY_FLOOR),
            ),
            (EqPatternType::SocialHarmony, social_harmony(current, history)),
            (EqPatternType::EmotionalBreakthrough, breakthrough(current, history)),
            (
                EqPatternType::RegulationSuccess,
                ratio_rule(current, history, EqMetric::SelfRegulation, REGULATION_WINDOW, REGULATION_GAIN, REGULATION_FLOOR),
            ),
            (
                EqPatternType::AwarenessExpansion,
                ratio_rule(current, history, EqMetric::SelfAwareness, AWARENESS_WINDOW, AWARENESS_GAIN, 0.0),
            ),
        ];

        let patterns: Vec<EqPattern> = rules
            .into_iter()
            .filter_map(|(pattern_type, confidence)| {
                confidence.map(|c| self.build_pattern(pattern_type, c, current))
            })
            .collect();

        debug!(
            history_len = history.len(),
            detected = patterns.len(),
            "Pattern detection complete"
        );

        patterns
    }

    fn build_pattern(
        &self,
        pattern_type: EqPatternType,
        confidence: f64,
        current: &EqMetrics,
    ) -> EqPattern {
        let (insight, suggestion) = pattern_text(pattern_type);
        EqPattern {
            id: Uuid::new_v4(),
            pattern_type,
            confidence: confidence.clamp(0.0, 1.0),
            detected_at: current.last_updated,
            anonymized_insight: insight.to_string(),
            growth_suggestion: suggestion.to_string(),
            privacy_level: self.privacy_level,
        }
    }
}

/// Mean of `metric` over the last `window` snapshots, if enough history exists
fn trailing_average(history: &[EqMetrics], metric: EqMetric, window: usize) -> Option<f64> {
    if history.len() < window || window == 0 {
        return None;
    }
    let tail = &history[history.len() - window..];
    Some(tail.iter().map(|m| m.value(metric)).sum::<f64>() / window as f64)
}

/// Confidence grows with how far the observed gain overshoots the required gain
fn gain_confidence(ratio: f64, required_gain: f64) -> f64 {
    (0.5 + (ratio - 1.0 - required_gain)).clamp(0.0, 1.0)
}

/// Fires when `metric` beats its trailing average by `required_gain` and is at least `floor`
fn ratio_rule(
    current: &EqMetrics,
    history: &[EqMetrics],
    metric: EqMetric,
    window: usize,
    required_gain: f64,
    floor: f64,
) -> Option<f64> {
    let baseline = trailing_average(history, metric, window)?;
    if baseline <= 0.0 {
        return None;
    }
    let value = current.value(metric);
    if value < floor {
        return None;
    }
    let ratio = value / baseline;
    (ratio >= 1.0 + required_gain).then(|| gain_confidence(ratio, required_gain))
}

/// Sustained high social skills
fn social_harmony(current: &EqMetrics, history: &[EqMetrics]) -> Option<f64> {
    let trailing = trailing_average(history, EqMetric::SocialSkills, HARMONY_WINDOW)?;
    (current.social_skills >= HARMONY_CURRENT_FLOOR && trailing >= HARMONY_TRAILING_FLOOR)
        .then(|| current.social_skills / 100.0)
}

/// Broad improvement across every subscale at once
fn breakthrough(current: &EqMetrics, history: &[EqMetrics]) -> Option<f64> {
    if history.len() < BREAKTHROUGH_WINDOW {
        return None;
    }
    let tail = &history[history.len() - BREAKTHROUGH_WINDOW..];
    let baseline = tail.iter().map(EqMetrics::overall).sum::<f64>() / BREAKTHROUGH_WINDOW as f64;
    if baseline <= 0.0 {
        return None;
    }
    let ratio = current.overall() / baseline;
    (ratio >= 1.0 + BREAKTHROUGH_GAIN).then(|| gain_confidence(ratio, BREAKTHROUGH_GAIN))
}

fn pattern_text(pattern_type: EqPatternType) -> (&'static str, &'static str) {
    match pattern_type {
        EqPatternType::StressResilience => (
            "Recovery after setbacks has strengthened noticeably.",
            "Note what helped you bounce back so you can reach for it next time.",
        ),
        EqPatternType::EmpathySpike => (
            "Attunement to other people's feelings rose sharply.",
            "Carry this attentiveness into one conversation you usually rush.",
        ),
        EqPatternType::SocialHarmony => (
            "Interactions have been consistently constructive.",
            "Invest in a relationship that could use the same care.",
        ),
        EqPatternType::EmotionalBreakthrough => (
            "Growth is showing up across several dimensions at once.",
            "Pause to reflect on what changed, and write it down.",
        ),
        EqPatternType::RegulationSuccess => (
            "Challenging moments are being handled with more composure.",
            "Practice the same pause-and-breathe routine before challenges arrive.",
        ),
        EqPatternType::AwarenessExpansion => (
            "Reflection and emotional labeling have become more frequent.",
            "Try naming two emotions at once when a feeling is mixed.",
        ),
    }
}

/// Rolling window of past metric snapshots (oldest first)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsHistory {
    snapshots: VecDeque<EqMetrics>,
    window_size: usize,
}

impl Default for MetricsHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl MetricsHistory {
    /// Create an empty history holding at most `window_size` snapshots
    pub fn new(window_size: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Change the window size, keeping only the newest `window_size` snapshots
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self.evict();
        self
    }

    /// Append a snapshot, evicting the oldest beyond the window
    pub fn push(&mut self, metrics: EqMetrics) {
        self.snapshots.push_back(metrics);
        self.evict();
    }

    fn evict(&mut self) {
        while self.snapshots.len() > self.window_size {
            self.snapshots.pop_front();
        }
    }

    /// Contiguous view of the window, oldest first
    pub fn window(&mut self) -> &[EqMetrics] {
        self.snapshots.make_contiguous()
    }

    pub fn latest(&self) -> Option<&EqMetrics> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    /// Load history from JSON.
    ///
    /// A zero window is rejected. Snapshots beyond the window are dropped,
    /// oldest first.
    pub fn from_json(json: &str) -> Result<Self> {
        let history: Self = serde_json::from_str(json)?;
        if history.window_size == 0 {
            return Err(EqError::InvalidInput(
                "history window_size must be positive".into(),
            ));
        }
        let window_size = history.window_size;
        Ok(history.with_window_size(window_size))
    }

    /// Serialize history to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn flat_metrics(value: f64, day: i64) -> EqMetrics {
        EqMetrics {
            self_awareness: value,
            self_regulation: value,
            motivation: value,
            empathy: value,
            social_skills: value,
            emotional_resilience: value,
            emotional_flexibility: value,
            emotional_depth: value,
            emotional_authenticity: value,
            last_updated: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::days(day),
            confidence_score: 80.0,
            data_points: 12,
        }
    }

    fn types(patterns: &[EqPattern]) -> Vec<EqPatternType> {
        patterns.iter().map(|p| p.pattern_type).collect()
    }

    #[test]
    fn test_resilience_needs_three_prior_points() {
        let detector = PatternDetector::default();
        let history = vec![flat_metrics(50.0, 0), flat_metrics(50.0, 1)];
        let mut current = flat_metrics(50.0, 2);
        current.emotional_resilience = 90.0;

        let patterns = detector.detect(&current, &history);
        assert!(!types(&patterns).contains(&EqPatternType::StressResilience));
    }

    #[test]
    fn test_resilience_fires_on_twenty_percent_gain() {
        let detector = PatternDetector::default();
        let history: Vec<_> = (0..3).map(|d| flat_metrics(50.0, d)).collect();
        let mut current = flat_metrics(50.0, 3);
        current.emotional_resilience = 70.0;

        let patterns = detector.detect(&current, &history);
        assert_eq!(types(&patterns), vec![EqPatternType::StressResilience]);
        assert!((patterns[0].confidence - 0.7).abs() < 1e-9);
        assert_eq!(patterns[0].detected_at, current.last_updated);
        assert_eq!(patterns[0].privacy_level, PrivacyLevel::DeviceOnly);
    }

    #[test]
    fn test_small_gain_is_ignored() {
        let detector = PatternDetector::default();
        let history: Vec<_> = (0..3).map(|d| flat_metrics(50.0, d)).collect();
        let mut current = flat_metrics(50.0, 3);
        current.emotional_resilience = 55.0;

        assert!(detector.detect(&current, &history).is_empty());
    }

    #[test]
    fn test_empathy_spike_requires_absolute_floor() {
        let detector = PatternDetector::default();
        let history = vec![flat_metrics(40.0, 0), flat_metrics(40.0, 1)];

        // +50% but below 75
        let mut current = flat_metrics(40.0, 2);
        current.empathy = 60.0;
        assert!(detector.detect(&current, &history).is_empty());

        current.empathy = 80.0;
        assert_eq!(
            types(&detector.detect(&current, &history)),
            vec![EqPatternType::EmpathySpike]
        );
    }

    #[test]
    fn test_multiple_rules_follow_declaration_order() {
        let detector = PatternDetector::new(PrivacyLevel::AnonymousAggregate);
        let history: Vec<_> = (0..5).map(|d| flat_metrics(50.0, d)).collect();
        let current = flat_metrics(90.0, 5);

        let patterns = detector.detect(&current, &history);
        assert_eq!(
            types(&patterns),
            vec![
                EqPatternType::StressResilience,
                EqPatternType::EmpathySpike,
                EqPatternType::EmotionalBreakthrough,
                EqPatternType::RegulationSuccess,
                EqPatternType::AwarenessExpansion,
            ]
        );
        assert!(patterns
            .iter()
            .all(|p| p.privacy_level == PrivacyLevel::AnonymousAggregate));
        assert!(patterns.iter().all(|p| (0.0..=1.0).contains(&p.confidence)));
    }

    #[test]
    fn test_social_harmony_requires_sustained_level() {
        let detector = PatternDetector::default();
        let history: Vec<_> = (0..3).map(|d| flat_metrics(75.0, d)).collect();
        let current = flat_metrics(85.0, 3);

        let patterns = detector.detect(&current, &history);
        assert_eq!(types(&patterns), vec![EqPatternType::SocialHarmony]);
        assert!((patterns[0].confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_zero_baseline_never_fires() {
        let detector = PatternDetector::default();
        let history: Vec<_> = (0..5).map(|d| flat_metrics(0.0, d)).collect();
        let current = flat_metrics(30.0, 5);
        assert!(detector.detect(&current, &history).is_empty());
    }

    #[test]
    fn test_history_window_rolls() {
        let mut history = MetricsHistory::new(3);
        for d in 0..5 {
            history.push(flat_metrics(10.0 * d as f64, d));
        }
        assert_eq!(history.len(), 3);
        let window = history.window();
        assert_eq!(window[0].empathy, 20.0);
        assert_eq!(window[2].empathy, 40.0);
    }

    #[test]
    fn test_history_serialization() {
        let mut history = MetricsHistory::new(7);
        history.push(flat_metrics(42.0, 0));

        let json = history.to_json().unwrap();
        let loaded = MetricsHistory::from_json(&json).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.latest(), history.latest());
        assert_eq!(loaded.window_size(), 7);
    }

    #[test]
    fn test_zero_window_history_rejected() {
        let result = MetricsHistory::from_json(r#"{"snapshots":[],"window_size":0}"#);
        assert!(matches!(result, Err(EqError::InvalidInput(_))));
    }

    #[test]
    fn test_oversized_history_is_truncated_on_load() {
        let mut history = MetricsHistory::new(10);
        for d in 0..6 {
            history.push(flat_metrics(10.0 * d as f64, d));
        }
        let json = history.to_json().unwrap().replace("\"window_size\":10", "\"window_size\":4");

        let mut loaded = MetricsHistory::from_json(&json).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.window()[0].empathy, 20.0);
        assert_eq!(loaded.latest().map(|m| m.empathy), Some(50.0));
    }
}
