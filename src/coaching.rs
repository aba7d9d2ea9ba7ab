//! Coaching insight generation
//!
//! Renders a style-specific base insight from the strongest and weakest
//! subscale, followed by one line per detected pattern. Output is fully
//! deterministic for identical inputs.

use crate::types::{CoachingStyle, EqMetric, EqMetrics, EqPattern};

/// Generator for coaching insights
#[derive(Debug, Clone, Default)]
pub struct CoachingGenerator {
    style: CoachingStyle,
}

impl CoachingGenerator {
    pub fn new(style: CoachingStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> CoachingStyle {
        self.style
    }

    /// Produce the base insight followed by each pattern's growth suggestion
    pub fn generate(&self, metrics: &EqMetrics, patterns: &[EqPattern]) -> Vec<String> {
        let (strongest, weakest) = extremes(metrics);

        let mut insights = Vec::with_capacity(patterns.len() + 1);
        insights.push(base_insight(self.style, strongest, weakest, metrics));
        insights.extend(patterns.iter().map(|p| p.growth_suggestion.clone()));
        insights
    }
}

/// Strongest and weakest subscale; ties go to the earlier subscale
fn extremes(metrics: &EqMetrics) -> (EqMetric, EqMetric) {
    let mut strongest = EqMetric::ALL[0];
    let mut weakest = EqMetric::ALL[0];

    for metric in EqMetric::ALL.iter().skip(1).copied() {
        if metrics.value(metric) > metrics.value(strongest) {
            strongest = metric;
        }
        if metrics.value(metric) < metrics.value(weakest) {
            weakest = metric;
        }
    }

    (strongest, weakest)
}

fn base_insight(
    style: CoachingStyle,
    strongest: EqMetric,
    weakest: EqMetric,
    metrics: &EqMetrics,
) -> String {
    let strong = strongest.label();
    let weak = weakest.label();
    let strong_score = metrics.value(strongest).round();
    let weak_score = metrics.value(weakest).round();

    match style {
        CoachingStyle::GentleGuide => format!(
            "Your {strong} is a real strength right now ({strong_score}). \
             When you feel ready, you might give a little attention to {weak}."
        ),
        CoachingStyle::DirectMentor => format!(
            "Strongest area: {strong} at {strong_score}. \
             Priority for this week: raise {weak} from {weak_score}."
        ),
        CoachingStyle::SocraticQuestioner => format!(
            "What has made your {strong} so steady lately? \
             And what might be getting in the way of your {weak}?"
        ),
        CoachingStyle::SupportiveCompanion => format!(
            "I can see how much your {strong} has grown, and I'm here with you \
             as you work on {weak}."
        ),
    }
}
