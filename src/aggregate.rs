//! Anonymous aggregation with a k-anonymity floor
//!
//! Contributions are sets of commitment hashes keyed by an anonymous
//! participant id. Below the participant floor nothing is produced at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, DEFAULT_MINIMUM_PARTICIPANTS, DEFAULT_PREVALENCE_THRESHOLD};
use crate::error::{EqError, Result};
use crate::proof::ProofGenerator;
use crate::types::EqPattern;

/// One participant's anonymized input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub participant_id: String,
    pub commitments: BTreeSet<String>,
}

impl Contribution {
    pub fn new(participant_id: impl Into<String>, commitments: impl IntoIterator<Item = String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            commitments: commitments.into_iter().collect(),
        }
    }

    /// Build a contribution from detected patterns. Device-only patterns are skipped.
    pub fn from_patterns(
        participant_id: impl Into<String>,
        patterns: &[EqPattern],
        generator: &ProofGenerator,
    ) -> Result<Self> {
        let mut commitments = BTreeSet::new();
        let mut skipped = 0usize;
        for pattern in patterns {
            if !pattern.privacy_level.may_leave_device() {
                skipped += 1;
                continue;
            }
            let commitment = generator.pattern_commitment(pattern.pattern_type, pattern.detected_at)?;
            commitments.insert(commitment.proof_hash);
        }

        if skipped > 0 {
            debug!(skipped, "Device-only patterns excluded from contribution");
        }

        Ok(Self {
            participant_id: participant_id.into(),
            commitments,
        })
    }
}

/// A commitment held by more than the prevalence threshold of participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectivePattern {
    pub commitment: String,
    pub participants: usize,
    /// Share of participants holding the commitment (0-1)
    pub prevalence: f64,
}

/// Collective statistics over at least `minimum_participants` participants.
///
/// Only [`AnonymousAggregator::create`] can build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnonymousAggregation {
    id: Uuid,
    participant_count: usize,
    minimum_participants: usize,
    collective_patterns: Vec<CollectivePattern>,
    k_anonymity_score: usize,
    dp_noise: f64,
    created_at: DateTime<Utc>,
}

impl AnonymousAggregation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn participant_count(&self) -> usize {
        self.participant_count
    }

    pub fn minimum_participants(&self) -> usize {
        self.minimum_participants
    }

    /// Sorted by prevalence, most common first
    pub fn collective_patterns(&self) -> &[CollectivePattern] {
        &self.collective_patterns
    }

    pub fn k_anonymity_score(&self) -> usize {
        self.k_anonymity_score
    }

    /// Noise scalar, 1/sqrt(participant count)
    pub fn dp_noise(&self) -> f64 {
        self.dp_noise
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone)]
pub struct AnonymousAggregator {
    minimum_participants: usize,
    prevalence_threshold: f64,
}

impl Default for AnonymousAggregator {
    fn default() -> Self {
        Self {
            minimum_participants: DEFAULT_MINIMUM_PARTICIPANTS,
            prevalence_threshold: DEFAULT_PREVALENCE_THRESHOLD,
        }
    }
}

impl AnonymousAggregator {
    pub fn new(minimum_participants: usize) -> Result<Self> {
        if minimum_participants == 0 {
            return Err(EqError::InvalidInput(
                "minimum participants must be positive".into(),
            ));
        }
        Ok(Self {
            minimum_participants,
            ..Default::default()
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.minimum_participants)?.with_prevalence_threshold(config.prevalence_threshold)
    }

    pub fn with_prevalence_threshold(mut self, threshold: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&threshold) {
            return Err(EqError::InvalidInput(format!(
                "prevalence threshold must be in [0, 1), got {threshold}"
            )));
        }
        self.prevalence_threshold = threshold;
        Ok(self)
    }

    pub fn minimum_participants(&self) -> usize {
        self.minimum_participants
    }

    /// Merge contributions into collective statistics.
    ///
    /// Contributions sharing a participant id count as one participant.
    pub fn create(&self, contributions: &[Contribution], consent: bool) -> Result<AnonymousAggregation> {
        if !consent {
            warn!("Aggregation refused: explicit consent not given");
            return Err(EqError::ConsentRequired(
                "aggregation requires explicit consent".into(),
            ));
        }

        let mut participants: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for contribution in contributions {
            if contribution.participant_id.is_empty() {
                return Err(EqError::InvalidInput(
                    "participant id must not be empty".into(),
                ));
            }
            participants
                .entry(contribution.participant_id.as_str())
                .or_default()
                .extend(contribution.commitments.iter().map(String::as_str));
        }

        let participant_count = participants.len();
        if participant_count < self.minimum_participants {
            warn!(
                participants = participant_count,
                minimum = self.minimum_participants,
                "Aggregation refused: below k-anonymity floor"
            );
            return Err(EqError::InsufficientParticipants {
                participants: participant_count,
                minimum: self.minimum_participants,
            });
        }

        let mut holders: BTreeMap<&str, usize> = BTreeMap::new();
        for commitments in participants.values() {
            for commitment in commitments {
                *holders.entry(commitment).or_default() += 1;
            }
        }
        let distinct_commitments = holders.len();

        let mut collective_patterns: Vec<CollectivePattern> = holders
            .into_iter()
            .map(|(commitment, count)| CollectivePattern {
                commitment: commitment.to_string(),
                participants: count,
                prevalence: count as f64 / participant_count as f64,
            })
            .filter(|p| p.prevalence > self.prevalence_threshold)
            .collect();
        // Counts share a denominator, so ordering by count orders by prevalence
        collective_patterns.sort_by(|a, b| {
            b.participants
                .cmp(&a.participants)
                .then_with(|| a.commitment.cmp(&b.commitment))
        });

        let aggregation = AnonymousAggregation {
            id: Uuid::new_v4(),
            participant_count,
            minimum_participants: self.minimum_participants,
            k_anonymity_score: participant_count.min(distinct_commitments),
            dp_noise: 1.0 / (participant_count as f64).sqrt(),
            collective_patterns,
            created_at: Utc::now(),
        };

        info!(
            aggregation_id = %aggregation.id,
            participants = participant_count,
            collective = aggregation.collective_patterns.len(),
            "Created anonymous aggregation"
        );
        Ok(aggregation)
    }
}
