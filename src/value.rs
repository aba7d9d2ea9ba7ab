//! Pattern valuation, marketplace listings and research participation
//!
//! Pricing is a pure function of a pattern and caller-supplied factors:
//!
//! ```text
//! value = base(type) × confidence × (1 + rarity) × (1 + impact) × (1 + insight)
//! ```
//!
//! Device-only patterns are never priced, listed or contributed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EqError, Result};
use crate::types::{EqPattern, EqPatternType, PrivacyLevel};

/// Base value in USD for each pattern type
pub fn base_value(pattern_type: EqPatternType) -> f64 {
    match pattern_type {
        EqPatternType::StressResilience => 2.50,
        EqPatternType::EmpathySpike => 1.75,
        EqPatternType::SocialHarmony => 2.00,
        EqPatternType::EmotionalBreakthrough => 5.00,
        EqPatternType::RegulationSuccess => 3.00,
        EqPatternType::AwarenessExpansion => 2.25,
    }
}

/// Percentage split of a pattern's value. Shares must each be non-negative
/// and together at most 100; the rest is reported as unallocated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub user_pct: f64,
    pub platform_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_pct: Option<f64>,
}

impl Default for RevenueSplit {
    fn default() -> Self {
        Self {
            user_pct: 70.0,
            platform_pct: 30.0,
            research_pct: None,
        }
    }
}

impl RevenueSplit {
    pub fn new(user_pct: f64, platform_pct: f64) -> Self {
        Self {
            user_pct,
            platform_pct,
            research_pct: None,
        }
    }

    pub fn with_research(mut self, research_pct: f64) -> Self {
        self.research_pct = Some(research_pct);
        self
    }

    /// Sum of all configured shares
    pub fn allocated_pct(&self) -> f64 {
        self.user_pct + self.platform_pct + self.research_pct.unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        let shares = [
            ("user_pct", Some(self.user_pct)),
            ("platform_pct", Some(self.platform_pct)),
            ("research_pct", self.research_pct),
        ];
        for (name, pct) in shares {
            if let Some(pct) = pct {
                if !pct.is_finite() || pct < 0.0 {
                    return Err(EqError::InvalidInput(format!(
                        "{name} must be a non-negative percentage, got {pct}"
                    )));
                }
            }
        }
        let total = self.allocated_pct();
        if total > 100.0 {
            return Err(EqError::InvalidInput(format!(
                "revenue split sums to {total}%, must be at most 100%"
            )));
        }
        Ok(())
    }
}

/// Multipliers applied on top of the base value, each in 0-1
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueFactors {
    pub rarity: f64,
    pub impact: f64,
    pub insight: f64,
}

impl ValueFactors {
    pub fn new(rarity: f64, impact: f64, insight: f64) -> Self {
        Self {
            rarity,
            impact,
            insight,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, factor) in [
            ("rarity", self.rarity),
            ("impact", self.impact),
            ("insight", self.insight),
        ] {
            if !(0.0..=1.0).contains(&factor) {
                return Err(EqError::InvalidInput(format!(
                    "{name} factor must be within 0-1, got {factor}"
                )));
            }
        }
        Ok(())
    }

    fn multiplier(&self) -> f64 {
        (1.0 + self.rarity) * (1.0 + self.impact) * (1.0 + self.insight)
    }
}

/// Value distributed per [`RevenueSplit`], in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevenueShares {
    pub user: f64,
    pub platform: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<f64>,
    pub unallocated: f64,
}

impl RevenueShares {
    fn split(value: f64, split: &RevenueSplit) -> Self {
        let share = |pct: f64| value * pct / 100.0;
        Self {
            user: share(split.user_pct),
            platform: share(split.platform_pct),
            research: split.research_pct.map(share),
            unallocated: share(100.0 - split.allocated_pct()),
        }
    }
}

/// Outcome of pricing a single pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub success: bool,
    /// True whenever the pattern's privacy level blocked valuation
    pub privacy_guaranteed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<EqPatternType>,
    pub value_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<RevenueShares>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValuationResult {
    fn refused_device_only() -> Self {
        Self {
            success: false,
            privacy_guaranteed: true,
            pattern_type: None,
            value_usd: 0.0,
            shares: None,
            reason: Some("device-only patterns are never valued".into()),
        }
    }
}

/// Marketplace offer for a consented, priced pattern. Carries no pattern id
/// and no insight text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceListing {
    pub listing_id: Uuid,
    #[serde(rename = "type")]
    pub pattern_type: EqPatternType,
    pub confidence: f64,
    /// Detection month, `YYYY-MM`
    pub period: String,
    pub privacy_level: PrivacyLevel,
    pub value_usd: f64,
    pub shares: RevenueShares,
    pub listed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ValueCreator {
    split: RevenueSplit,
}

impl ValueCreator {
    pub fn new(split: RevenueSplit) -> Result<Self> {
        split.validate()?;
        Ok(Self { split })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.revenue_split)
    }

    pub fn split(&self) -> &RevenueSplit {
        &self.split
    }

    /// Price a pattern. Device-only patterns come back unsuccessful with
    /// `privacy_guaranteed` set, never as an error.
    pub fn price(&self, pattern: &EqPattern, factors: &ValueFactors) -> Result<ValuationResult> {
        if !pattern.privacy_level.may_leave_device() {
            debug!("Valuation skipped for device-only pattern");
            return Ok(ValuationResult::refused_device_only());
        }
        factors.validate()?;

        let confidence = pattern.confidence.clamp(0.0, 1.0);
        let value = base_value(pattern.pattern_type) * confidence * factors.multiplier();

        Ok(ValuationResult {
            success: true,
            privacy_guaranteed: false,
            pattern_type: Some(pattern.pattern_type),
            value_usd: value,
            shares: Some(RevenueShares::split(value, &self.split)),
            reason: None,
        })
    }

    /// Price a pattern and turn it into a marketplace listing
    pub fn create_listing(
        &self,
        pattern: &EqPattern,
        factors: &ValueFactors,
        consent: bool,
    ) -> Result<MarketplaceListing> {
        if !consent {
            warn!("Listing refused: explicit consent not given");
            return Err(EqError::ConsentRequired(
                "monetization requires explicit consent".into(),
            ));
        }
        if !pattern.privacy_level.may_leave_device() {
            warn!("Listing refused: device-only pattern");
            return Err(EqError::ConsentRequired(
                "device-only patterns cannot be listed".into(),
            ));
        }

        let valuation = self.price(pattern, factors)?;
        let shares = valuation
            .shares
            .unwrap_or_else(|| RevenueShares::split(valuation.value_usd, &self.split));

        let listing = MarketplaceListing {
            listing_id: Uuid::new_v4(),
            pattern_type: pattern.pattern_type,
            confidence: pattern.confidence.clamp(0.0, 1.0),
            period: pattern.detected_at.format("%Y-%m").to_string(),
            privacy_level: pattern.privacy_level,
            value_usd: valuation.value_usd,
            shares,
            listed_at: Utc::now(),
        };
        info!(listing_id = %listing.listing_id, pattern_type = %listing.pattern_type, "Created listing");
        Ok(listing)
    }
}

/// Consent fields a participant must affirm before joining a study
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchConsent {
    pub study_id: String,
    pub informed_consent: bool,
    pub explicit_consent: bool,
}

/// Rights held by every research participant. All are always granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParticipantRights {
    withdrawal: bool,
    data_export: bool,
    deletion: bool,
}

impl ParticipantRights {
    fn guaranteed() -> Self {
        Self {
            withdrawal: true,
            data_export: true,
            deletion: true,
        }
    }

    pub fn withdrawal(&self) -> bool {
        self.withdrawal
    }

    pub fn data_export(&self) -> bool {
        self.data_export
    }

    pub fn deletion(&self) -> bool {
        self.deletion
    }
}

/// What a study receives for one pattern: its type, confidence and month
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchContribution {
    #[serde(rename = "type")]
    pub pattern_type: EqPatternType,
    pub confidence: f64,
    /// `YYYY-MM`
    pub period: String,
}

impl ResearchContribution {
    /// Strip a pattern down to what a study may see. Device-only patterns are refused.
    pub fn from_pattern(pattern: &EqPattern) -> Result<Self> {
        if !pattern.privacy_level.may_leave_device() {
            return Err(EqError::ConsentRequired(
                "device-only patterns cannot be contributed to research".into(),
            ));
        }
        Ok(Self {
            pattern_type: pattern.pattern_type,
            confidence: pattern.confidence.clamp(0.0, 1.0),
            period: pattern.detected_at.format("%Y-%m").to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchParticipation {
    id: Uuid,
    study_id: String,
    enrolled_at: DateTime<Utc>,
    rights: ParticipantRights,
    contributions: Vec<ResearchContribution>,
}

impl ResearchParticipation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn study_id(&self) -> &str {
        &self.study_id
    }

    pub fn enrolled_at(&self) -> DateTime<Utc> {
        self.enrolled_at
    }

    pub fn rights(&self) -> ParticipantRights {
        self.rights
    }

    pub fn contributions(&self) -> &[ResearchContribution] {
        &self.contributions
    }
}

/// Caller-owned record of research enrollments
#[derive(Debug, Clone, Default)]
pub struct ResearchRegistry {
    participations: BTreeMap<Uuid, ResearchParticipation>,
}

impl ResearchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll in a study. Both consent fields must be true.
    pub fn enroll(&mut self, consent: &ResearchConsent) -> Result<Uuid> {
        if !(consent.informed_consent && consent.explicit_consent) {
            warn!(study_id = %consent.study_id, "Research enrollment refused: consent incomplete");
            return Err(EqError::ConsentRequired(
                "research requires informed and explicit consent".into(),
            ));
        }
        if consent.study_id.is_empty() {
            return Err(EqError::InvalidInput("study id must not be empty".into()));
        }

        let participation = ResearchParticipation {
            id: Uuid::new_v4(),
            study_id: consent.study_id.clone(),
            enrolled_at: Utc::now(),
            rights: ParticipantRights::guaranteed(),
            contributions: Vec::new(),
        };
        let id = participation.id;
        self.participations.insert(id, participation);

        info!(participation_id = %id, study_id = %consent.study_id, "Enrolled in research study");
        Ok(id)
    }

    /// Add a pattern to an enrollment
    pub fn contribute(&mut self, id: &Uuid, pattern: &EqPattern) -> Result<()> {
        let participation = self
            .participations
            .get_mut(id)
            .ok_or_else(|| EqError::InvalidInput(format!("unknown research participation {id}")))?;
        participation
            .contributions
            .push(ResearchContribution::from_pattern(pattern)?);
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Option<&ResearchParticipation> {
        self.participations.get(id)
    }

    /// Export an enrollment and everything contributed under it as JSON
    pub fn export(&self, id: &Uuid) -> Result<String> {
        let participation = self
            .get(id)
            .ok_or_else(|| EqError::InvalidInput(format!("unknown research participation {id}")))?;
        Ok(serde_json::to_string_pretty(participation)?)
    }

    /// Withdraw from a study, deleting the record and its contributions
    pub fn withdraw(&mut self, id: &Uuid) -> Option<ResearchParticipation> {
        let removed = self.participations.remove(id);
        if removed.is_some() {
            info!(participation_id = %id, "Withdrew from research study");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.participations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participations.is_empty()
    }
}
