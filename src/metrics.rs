//! EQ metrics calculation
//!
//! Reduces a batch of emotional signals into nine bounded subscales. Each
//! subscale is computed independently from a filtered subset of the batch and
//! clamped to [0, 100]. When a subscale's denominator set is empty the neutral
//! score of 50 is returned instead of dividing by zero.

use crate::error::{EqError, Result};
use crate::types::{EmotionalSignal, EqMetrics, SignalOutcome};

/// Score used when a subscale has nothing to measure
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Upper bound of every subscale
pub const MAX_SCORE: f64 = 100.0;

const AWARENESS_TYPES: &[&str] = &["self_reflection", "emotion_labeling", "introspection"];
/// Awareness ratio is scaled past 100 so a fully reflective batch saturates
const AWARENESS_SCALE: f64 = 120.0;

const CHALLENGE_TYPES: &[&str] = &["stress_trigger", "challenge"];
const GOAL_TYPES: &[&str] = &["goal_set", "goal_progress", "goal_achieved"];
const EMPATHY_TYPES: &[&str] = &["empathy_response", "perspective_taking", "compassion"];
/// Each unit of empathic intensity is worth 20 points
const EMPATHY_INTENSITY_FACTOR: f64 = 20.0;

/// Bonus applied to resilience for demonstrated recovery
const RESILIENCE_BONUS: f64 = 1.1;

/// Adjacent intensities within this distance count as consistent
const CONSISTENCY_TOLERANCE: f64 = 0.3;
const QUALITY_WEIGHT: f64 = 0.6;
const CONSISTENCY_WEIGHT: f64 = 0.4;

/// Defaults for optional signal fields
const DEFAULT_INTENSITY: f64 = 0.5;
const DEFAULT_QUALITY: f64 = 0.5;
const DEFAULT_SMOOTHNESS: f64 = 0.5;

/// Calculator for EQ metrics
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Compute metrics for a batch of signals.
    ///
    /// An empty batch is a caller error. Any non-empty batch produces metrics.
    pub fn calculate(signals: &[EmotionalSignal]) -> Result<EqMetrics> {
        let last_updated = signals
            .iter()
            .map(|s| s.timestamp)
            .max()
            .ok_or_else(|| EqError::InvalidInput("signal batch is empty".into()))?;

        Ok(EqMetrics {
            self_awareness: calculate_self_awareness(signals),
            self_regulation: calculate_self_regulation(signals),
            motivation: calculate_motivation(signals),
            empathy: calculate_empathy(signals),
            social_skills: calculate_social_skills(signals),
            emotional_resilience: calculate_emotional_resilience(signals),
            emotional_flexibility: calculate_emotional_flexibility(signals),
            emotional_depth: calculate_emotional_depth(signals),
            emotional_authenticity: calculate_emotional_authenticity(signals),
            last_updated,
            confidence_score: calculate_confidence(signals),
            data_points: signals.len(),
        })
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return NEUTRAL_SCORE;
    }
    value.clamp(0.0, MAX_SCORE)
}

fn unit(value: Option<f64>, default: f64) -> f64 {
    value.map_or(default, |v| if v.is_nan() { default } else { v.clamp(0.0, 1.0) })
}

/// Share of reflective events, scaled by 120
pub fn calculate_self_awareness(signals: &[EmotionalSignal]) -> f64 {
    if signals.is_empty() {
        return NEUTRAL_SCORE;
    }
    let reflective = signals.iter().filter(|s| s.is_one_of(AWARENESS_TYPES)).count();
    clamp_score(reflective as f64 / signals.len() as f64 * AWARENESS_SCALE)
}

/// Smoothness-weighted share of challenge events handled with a positive outcome
pub fn calculate_self_regulation(signals: &[EmotionalSignal]) -> f64 {
    let challenges: Vec<&EmotionalSignal> = signals
        .iter()
        .filter(|s| s.in_category("challenge") || s.is_one_of(CHALLENGE_TYPES))
        .collect();

    if challenges.is_empty() {
        return NEUTRAL_SCORE;
    }

    let regulated: f64 = challenges
        .iter()
        .filter(|s| s.outcome == Some(SignalOutcome::Positive))
        .map(|s| unit(s.smoothness, 1.0))
        .sum();

    clamp_score(regulated / challenges.len() as f64 * 100.0)
}

/// Goal follow-through: progress counts once, achievement twice
pub fn calculate_motivation(signals: &[EmotionalSignal]) -> f64 {
    let goals: Vec<&EmotionalSignal> = signals.iter().filter(|s| s.is_one_of(GOAL_TYPES)).collect();

    if goals.is_empty() {
        return NEUTRAL_SCORE;
    }

    let earned: f64 = goals
        .iter()
        .map(|s| {
            if s.is_one_of(&["goal_achieved"]) {
                2.0
            } else if s.is_one_of(&["goal_progress"]) {
                1.0
            } else {
                0.0
            }
        })
        .sum();

    clamp_score(earned / (2.0 * goals.len() as f64) * 100.0)
}

/// Summed empathic intensity, scaled by 20
pub fn calculate_empathy(signals: &[EmotionalSignal]) -> f64 {
    let total_intensity: f64 = signals
        .iter()
        .filter(|s| s.in_category("empathy") || s.is_one_of(EMPATHY_TYPES))
        .map(|s| unit(s.intensity, DEFAULT_INTENSITY))
        .sum();

    clamp_score(total_intensity * EMPATHY_INTENSITY_FACTOR)
}

/// Quality-weighted share of social interactions with a positive outcome
pub fn calculate_social_skills(signals: &[EmotionalSignal]) -> f64 {
    let social: Vec<&EmotionalSignal> = signals.iter().filter(|s| s.in_category("social")).collect();

    if social.is_empty() {
        return NEUTRAL_SCORE;
    }

    let positive: f64 = social
        .iter()
        .filter(|s| s.outcome == Some(SignalOutcome::Positive))
        .map(|s| unit(s.quality, 1.0))
        .sum();

    clamp_score(positive / social.len() as f64 * 100.0)
}

/// Recoveries per setback with a 1.1x recovery bonus
pub fn calculate_emotional_resilience(signals: &[EmotionalSignal]) -> f64 {
    let setbacks = signals
        .iter()
        .filter(|s| s.outcome == Some(SignalOutcome::Negative) || s.is_one_of(&["setback"]))
        .count();

    if setbacks == 0 {
        return NEUTRAL_SCORE;
    }

    let recoveries = signals.iter().filter(|s| s.is_one_of(&["recovery"])).count();

    clamp_score(recoveries as f64 / setbacks as f64 * 100.0 * RESILIENCE_BONUS)
}

/// Mean smoothness over transitions between categories
pub fn calculate_emotional_flexibility(signals: &[EmotionalSignal]) -> f64 {
    let transitions: Vec<f64> = signals
        .windows(2)
        .filter(|pair| match (&pair[0].category, &pair[1].category) {
            (Some(a), Some(b)) => !a.eq_ignore_ascii_case(b),
            _ => false,
        })
        .map(|pair| unit(pair[1].smoothness, DEFAULT_SMOOTHNESS))
        .collect();

    if transitions.is_empty() {
        return NEUTRAL_SCORE;
    }

    let mean = transitions.iter().sum::<f64>() / transitions.len() as f64;
    clamp_score(mean * 100.0)
}

/// Mean intensity, weighted by how varied the emotional vocabulary is
pub fn calculate_emotional_depth(signals: &[EmotionalSignal]) -> f64 {
    let intensities: Vec<f64> = signals
        .iter()
        .filter_map(|s| s.intensity)
        .map(|i| unit(Some(i), DEFAULT_INTENSITY))
        .collect();

    if intensities.is_empty() {
        return NEUTRAL_SCORE;
    }

    let mut distinct: Vec<String> = signals
        .iter()
        .map(|s| s.signal_type.to_ascii_lowercase())
        .collect();
    distinct.sort();
    distinct.dedup();

    let mean = intensities.iter().sum::<f64>() / intensities.len() as f64;
    let variety = distinct.len() as f64 / signals.len() as f64;

    clamp_score(mean * 100.0 * (0.5 + 0.5 * variety))
}

/// Share of self-reported authentic expressions
pub fn calculate_emotional_authenticity(signals: &[EmotionalSignal]) -> f64 {
    let reported: Vec<bool> = signals.iter().filter_map(|s| s.authentic).collect();

    if reported.is_empty() {
        return NEUTRAL_SCORE;
    }

    let authentic = reported.iter().filter(|a| **a).count();
    clamp_score(authentic as f64 / reported.len() as f64 * 100.0)
}

/// Blend of mean signal quality (60%) and pairwise consistency (40%)
pub fn calculate_confidence(signals: &[EmotionalSignal]) -> f64 {
    if signals.is_empty() {
        return 0.0;
    }

    let quality = signals
        .iter()
        .map(|s| unit(s.quality, DEFAULT_QUALITY))
        .sum::<f64>()
        / signals.len() as f64
        * 100.0;

    clamp_score(QUALITY_WEIGHT * quality + CONSISTENCY_WEIGHT * pairwise_consistency(signals))
}

/// Share of adjacent signal pairs with similar intensity; 100 for a single signal
fn pairwise_consistency(signals: &[EmotionalSignal]) -> f64 {
    if signals.len() < 2 {
        return 100.0;
    }

    let pairs = signals.len() - 1;
    let consistent = signals
        .windows(2)
        .filter(|pair| {
            let a = unit(pair[0].intensity, DEFAULT_INTENSITY);
            let b = unit(pair[1].intensity, DEFAULT_INTENSITY);
            (a - b).abs() <= CONSISTENCY_TOLERANCE
        })
        .count();

    consistent as f64 / pairs as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EqMetric;
    use chrono::{Duration, TimeZone, Utc};

    fn at(minutes: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn signal(kind: &str, minutes: i64) -> EmotionalSignal {
        EmotionalSignal::new(kind, at(minutes))
    }

    fn mixed_batch() -> Vec<EmotionalSignal> {
        vec![
            signal("self_reflection", 0).with_intensity(0.6).with_quality(0.9),
            signal("stress_trigger", 5)
                .with_category("challenge")
                .with_outcome(SignalOutcome::Positive)
                .with_smoothness(0.8),
            signal("setback", 10).with_outcome(SignalOutcome::Negative),
            signal("recovery", 15).with_category("social").with_smoothness(0.7),
            signal("empathy_response", 20).with_category("empathy").with_intensity(0.9),
            signal("conversation", 25)
                .with_category("social")
                .with_outcome(SignalOutcome::Positive)
                .with_quality(0.8)
                .with_authentic(true),
            signal("goal_achieved", 30).with_authentic(false),
        ]
    }

    #[test]
    fn test_empty_batch_is_invalid_input() {
        assert!(matches!(
            MetricsCalculator::calculate(&[]),
            Err(EqError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_all_self_reflection_saturates_awareness() {
        let signals: Vec<_> = (0..10).map(|i| signal("self_reflection", i)).collect();
        let metrics = MetricsCalculator::calculate(&signals).unwrap();
        assert_eq!(metrics.self_awareness, 100.0);
        assert_eq!(metrics.data_points, 10);
    }

    #[test]
    fn test_self_regulation_neutral_without_challenges() {
        let signals = vec![signal("self_reflection", 0), signal("goal_set", 1)];
        assert_eq!(calculate_self_regulation(&signals), 50.0);
    }

    #[test]
    fn test_self_regulation_weights_smoothness() {
        let signals = vec![
            signal("stress_trigger", 0)
                .with_outcome(SignalOutcome::Positive)
                .with_smoothness(0.5),
            signal("challenge", 1).with_outcome(SignalOutcome::Negative),
        ];
        // 0.5 regulated out of 2 challenges
        assert!((calculate_self_regulation(&signals) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_empathy_uses_intensity_times_twenty() {
        let signals = vec![
            signal("empathy_response", 0).with_intensity(0.5),
            signal("compassion", 1).with_intensity(1.0),
        ];
        assert!((calculate_empathy(&signals) - 30.0).abs() < 1e-9);

        let many: Vec<_> = (0..10)
            .map(|i| signal("perspective_taking", i).with_intensity(1.0))
            .collect();
        assert_eq!(calculate_empathy(&many), 100.0);
    }

    #[test]
    fn test_resilience_bonus_then_clamp() {
        let signals = vec![
            signal("setback", 0),
            signal("setback", 1),
            signal("recovery", 2),
        ];
        // 1 / 2 * 100 * 1.1
        assert!((calculate_emotional_resilience(&signals) - 55.0).abs() < 1e-9);

        let full = vec![signal("setback", 0), signal("recovery", 1)];
        assert_eq!(calculate_emotional_resilience(&full), 100.0);
    }

    #[test]
    fn test_motivation_counts_achievements_double() {
        let signals = vec![
            signal("goal_set", 0),
            signal("goal_progress", 1),
            signal("goal_achieved", 2),
        ];
        // (0 + 1 + 2) / 6
        assert!((calculate_motivation(&signals) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_signal_is_fully_consistent() {
        let signals = vec![signal("self_reflection", 0).with_quality(1.0)];
        // 0.6 * 100 + 0.4 * 100
        assert_eq!(calculate_confidence(&signals), 100.0);
    }

    #[test]
    fn test_confidence_penalizes_inconsistent_intensity() {
        let signals = vec![
            signal("a", 0).with_intensity(0.1).with_quality(1.0),
            signal("b", 1).with_intensity(0.9).with_quality(1.0),
        ];
        assert!((calculate_confidence(&signals) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_subscales_bounded() {
        let metrics = MetricsCalculator::calculate(&mixed_batch()).unwrap();
        for metric in EqMetric::ALL {
            let value = metrics.value(metric);
            assert!(
                (0.0..=100.0).contains(&value),
                "{} out of range: {value}",
                metric.as_str()
            );
        }
        assert!((0.0..=100.0).contains(&metrics.confidence_score));
        assert_eq!(metrics.last_updated, at(30));
    }

    #[test]
    fn test_out_of_range_inputs_are_clamped() {
        let signals: Vec<_> = (0..5)
            .map(|i| {
                signal("empathy_response", i)
                    .with_intensity(42.0)
                    .with_quality(-3.0)
                    .with_smoothness(f64::NAN)
            })
            .collect();
        let metrics = MetricsCalculator::calculate(&signals).unwrap();
        for metric in EqMetric::ALL {
            assert!((0.0..=100.0).contains(&metrics.value(metric)));
        }
        assert!((0.0..=100.0).contains(&metrics.confidence_score));
    }

    #[test]
    fn test_flexibility_tracks_category_transitions() {
        let signals = vec![
            signal("a", 0).with_category("social"),
            signal("b", 1).with_category("challenge").with_smoothness(0.9),
            signal("c", 2).with_category("challenge").with_smoothness(0.1),
            signal("d", 3).with_category("empathy").with_smoothness(0.7),
        ];
        // transitions at b and d: (0.9 + 0.7) / 2
        assert!((calculate_emotional_flexibility(&signals) - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_authenticity_only_counts_reported_signals() {
        let signals = vec![
            signal("a", 0).with_authentic(true),
            signal("b", 1).with_authentic(false),
            signal("c", 2),
        ];
        assert_eq!(calculate_emotional_authenticity(&signals), 50.0);
        assert_eq!(calculate_emotional_authenticity(&[signal("c", 0)]), 50.0);
    }
}
