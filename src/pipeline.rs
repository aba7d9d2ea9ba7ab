//! Pipeline orchestration
//!
//! This module provides the local processing API for EQ Vault: signals in,
//! metrics, patterns and coaching out. Nothing reachable from here holds a
//! network transport; the only I/O is the optional encrypted local store.

use tracing::debug;

use crate::coaching::CoachingGenerator;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::keys::KeyManager;
use crate::metrics::MetricsCalculator;
use crate::patterns::{MetricsHistory, PatternDetector};
use crate::store::{KeyValueStore, SecureLocalStore};
use crate::types::{CoachingStyle, EmotionalSignal, EqAnalysis, EqMetrics};

/// Compute metrics for a JSON array of signals.
///
/// # Returns
/// `EqMetrics` as JSON
pub fn signals_to_metrics(signals_json: &str) -> Result<String> {
    let signals: Vec<EmotionalSignal> = serde_json::from_str(signals_json)?;
    let metrics = MetricsCalculator::calculate(&signals)?;
    Ok(serde_json::to_string(&metrics)?)
}

/// Analyze a single batch with no history.
///
/// Pattern rules all need prior snapshots, so the result carries metrics and
/// coaching but no patterns. Use [`EqProcessor`] to accumulate history.
pub fn analyze_signals(signals: &[EmotionalSignal], style: CoachingStyle) -> Result<EqAnalysis> {
    let metrics = MetricsCalculator::calculate(signals)?;
    let insights = CoachingGenerator::new(style).generate(&metrics, &[]);
    Ok(EqAnalysis {
        metrics,
        patterns: Vec::new(),
        insights,
    })
}

/// Stateful processor that keeps a rolling metrics history across batches.
///
/// Use this when pattern detection should see earlier batches.
#[derive(Debug, Clone, Default)]
pub struct EqProcessor {
    detector: PatternDetector,
    coach: CoachingGenerator,
    history: MetricsHistory,
}

impl EqProcessor {
    /// Create a processor with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a processor from a validated config
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detector: PatternDetector::new(config.default_privacy_level),
            coach: CoachingGenerator::new(config.coaching_style),
            history: MetricsHistory::new(config.history_window),
        })
    }

    /// Create a processor with a specific history window (at least one snapshot)
    pub fn with_history_window(window: usize) -> Self {
        Self {
            history: MetricsHistory::new(window.max(1)),
            ..Self::default()
        }
    }

    pub fn history(&self) -> &MetricsHistory {
        &self.history
    }

    /// Load history state from JSON.
    ///
    /// The processor keeps its own window size; only the newest snapshots
    /// that fit are retained.
    pub fn load_history(&mut self, json: &str) -> Result<()> {
        let window_size = self.history.window_size();
        self.history = MetricsHistory::from_json(json)?.with_window_size(window_size);
        Ok(())
    }

    /// Save history state to JSON
    pub fn save_history(&self) -> Result<String> {
        self.history.to_json()
    }

    /// Process one batch: metrics, then patterns against history, then coaching.
    /// The new snapshot joins the history afterwards.
    pub fn process(&mut self, signals: &[EmotionalSignal]) -> Result<EqAnalysis> {
        let metrics = MetricsCalculator::calculate(signals)?;
        Ok(self.analyze_metrics(metrics))
    }

    /// Process a JSON array of signals, returning `EqAnalysis` JSON
    pub fn process_json(&mut self, signals_json: &str) -> Result<String> {
        let signals: Vec<EmotionalSignal> = serde_json::from_str(signals_json)?;
        let analysis = self.process(&signals)?;
        Ok(serde_json::to_string(&analysis)?)
    }

    /// Process a batch and persist the encrypted metrics snapshot
    pub async fn process_and_store<S: KeyValueStore>(
        &mut self,
        signals: &[EmotionalSignal],
        keys: &KeyManager,
        store: &SecureLocalStore<S>,
    ) -> Result<EqAnalysis> {
        let metrics = MetricsCalculator::calculate(signals)?;
        store.save(keys, &metrics).await?;
        Ok(self.analyze_metrics(metrics))
    }

    fn analyze_metrics(&mut self, metrics: EqMetrics) -> EqAnalysis {
        let patterns = self.detector.detect(&metrics, self.history.window());
        let insights = self.coach.generate(&metrics, &patterns);
        self.history.push(metrics.clone());

        debug!(
            data_points = metrics.data_points,
            patterns = patterns.len(),
            history_len = self.history.len(),
            "Processed signal batch"
        );

        EqAnalysis {
            metrics,
            patterns,
            insights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_KDF_ITERATIONS;
    use crate::patterns::tests::flat_metrics;
    use crate::store::InMemoryStore;
    use crate::types::{EqPatternType, PrivacyLevel, SignalOutcome};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn recovery_batch() -> Vec<EmotionalSignal> {
        let at = Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap();
        vec![
            EmotionalSignal::new("stress_trigger", at).with_outcome(SignalOutcome::Negative),
            EmotionalSignal::new("recovery", at).with_intensity(0.6),
        ]
    }

    fn seeded_history(value: f64, days: i64) -> String {
        let mut history = MetricsHistory::default();
        for day in 0..days {
            history.push(flat_metrics(value, day));
        }
        history.to_json().unwrap()
    }

    #[test]
    fn test_signals_to_metrics_json() {
        let json = r#"[{"type": "self_reflection", "timestamp": "2024-05-01T08:00:00Z"}]"#;
        let metrics: serde_json::Value = serde_json::from_str(&signals_to_metrics(json).unwrap()).unwrap();
        assert_eq!(metrics["self_awareness"], 100.0);
        assert_eq!(metrics["data_points"], 1);
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(signals_to_metrics("[]").is_err());
        assert!(EqProcessor::new().process(&[]).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(signals_to_metrics("not valid json").is_err());
    }

    #[test]
    fn test_analyze_signals_has_no_patterns() {
        let analysis = analyze_signals(&recovery_batch(), CoachingStyle::DirectMentor).unwrap();
        assert!(analysis.patterns.is_empty());
        assert_eq!(analysis.insights.len(), 1);
        assert!(analysis.insights[0].starts_with("Strongest area"));
    }

    #[test]
    fn test_processor_detects_against_loaded_history() {
        let mut processor = EqProcessor::new();
        processor.load_history(&seeded_history(40.0, 3)).unwrap();

        let analysis = processor.process(&recovery_batch()).unwrap();
        let types: Vec<_> = analysis.patterns.iter().map(|p| p.pattern_type).collect();

        assert_eq!(types, vec![EqPatternType::StressResilience]);
        assert_eq!(analysis.patterns[0].privacy_level, PrivacyLevel::DeviceOnly);
        // Base insight plus one growth suggestion
        assert_eq!(analysis.insights.len(), 2);
        assert_eq!(processor.history().len(), 4);
    }

    #[test]
    fn test_history_window_is_bounded() {
        let mut processor = EqProcessor::with_history_window(2);
        for _ in 0..5 {
            processor.process(&recovery_batch()).unwrap();
        }
        assert_eq!(processor.history().len(), 2);
    }

    #[test]
    fn test_loaded_history_keeps_processor_window() {
        let mut processor = EqProcessor::with_history_window(30);
        assert!(processor
            .load_history(r#"{"snapshots":[],"window_size":0}"#)
            .is_err());
        for _ in 0..5 {
            processor.process(&recovery_batch()).unwrap();
        }
        assert_eq!(processor.history().len(), 5);

        let mut small = EqProcessor::with_history_window(2);
        small.load_history(&seeded_history(40.0, 6)).unwrap();
        assert_eq!(small.history().len(), 2);
        assert_eq!(small.history().window_size(), 2);
        assert_eq!(small.history().latest().map(|m| m.data_points), Some(12));
    }

    #[test]
    fn test_history_roundtrip() {
        let mut processor = EqProcessor::new();
        processor.process(&recovery_batch()).unwrap();
        let saved = processor.save_history().unwrap();

        let mut restored = EqProcessor::new();
        restored.load_history(&saved).unwrap();
        assert_eq!(restored.history().len(), 1);
        assert_eq!(
            restored.history().latest(),
            processor.history().latest()
        );
    }

    #[test]
    fn test_from_config_applies_privacy_level() {
        let config = EngineConfig {
            default_privacy_level: PrivacyLevel::AnonymousAggregate,
            ..EngineConfig::default()
        };
        let mut processor = EqProcessor::from_config(&config).unwrap();
        processor.load_history(&seeded_history(40.0, 3)).unwrap();

        let analysis = processor.process(&recovery_batch()).unwrap();
        assert_eq!(
            analysis.patterns[0].privacy_level,
            PrivacyLevel::AnonymousAggregate
        );
    }

    #[tokio::test]
    async fn test_process_and_store_persists_encrypted_snapshot() {
        let mut keys = KeyManager::with_iterations(MIN_KDF_ITERATIONS).unwrap();
        keys.initialize("pipeline-secret", "device-pipeline").await.unwrap();
        let store = SecureLocalStore::new(InMemoryStore::new());
        let mut processor = EqProcessor::new();

        let analysis = processor
            .process_and_store(&recovery_batch(), &keys, &store)
            .await
            .unwrap();

        let loaded = store.load(&keys).await.unwrap().unwrap();
        assert_eq!(loaded, analysis.metrics);
        assert_eq!(store.backend().len().await, 1);
    }
}
