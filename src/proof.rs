//! Claim commitments
//!
//! A commitment binds a claim to an evidence identifier and a point in time:
//!
//! ```text
//! proof_hash = SHA-256(claim_type 0x1f evidence_id 0x1f timestamp 0x1f verification_key)
//! ```
//!
//! This is a keyed hash commitment. It shows that the generator held the
//! evidence identifier when the commitment was made. It is **not** a
//! zero-knowledge proof: it has no soundness guarantee, and a verifier who can
//! guess the evidence identifier can confirm it. Never present it to users as
//! a cryptographic proof of the underlying metric.

use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{EqError, Result};
use crate::keys::KeyManager;
use crate::metrics::MAX_SCORE;
use crate::types::{EqMetric, EqMetrics, EqPatternType};

/// Domain tag mixed into every verification key
pub const VERIFICATION_KEY_DOMAIN: &str = "eq-vault/commitment/v1";

const FIELD_SEPARATOR: u8 = 0x1f;

/// Hash commitment to a claim. Never carries the underlying metric value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub proof_hash: String,
    pub timestamp: DateTime<Utc>,
    pub claim_type: String,
    pub public_verification_key: String,
}

/// Produces commitments under a single verification key
#[derive(Debug, Clone)]
pub struct ProofGenerator {
    verification_key: String,
}

impl ProofGenerator {
    /// Generator whose verification key is bound to a device id
    pub fn new(device_id: &str) -> Self {
        Self {
            verification_key: verification_key(device_id),
        }
    }

    /// Generator for the device a key manager was initialized for
    pub fn for_device(keys: &KeyManager) -> Result<Self> {
        Ok(Self::new(keys.device_id()?))
    }

    /// Generator shared by every participant in a cohort, so that identical
    /// claims from different devices produce identical commitments
    pub fn for_cohort(cohort: &str) -> Self {
        Self {
            verification_key: verification_key(&format!("cohort:{cohort}")),
        }
    }

    pub fn verification_key(&self) -> &str {
        &self.verification_key
    }

    /// Commit to `claim_type` backed by `evidence_id` at time `at`
    pub fn commit(&self, claim_type: &str, evidence_id: &str, at: DateTime<Utc>) -> Result<Commitment> {
        if claim_type.is_empty() {
            return Err(EqError::InvalidInput("claim type must not be empty".into()));
        }
        if evidence_id.is_empty() {
            return Err(EqError::InvalidInput("evidence id must not be empty".into()));
        }

        let proof_hash = commitment_hash(claim_type, evidence_id, at, &self.verification_key);
        debug!(claim_type, "Created commitment");

        Ok(Commitment {
            proof_hash,
            timestamp: at,
            claim_type: claim_type.to_string(),
            public_verification_key: self.verification_key.clone(),
        })
    }

    /// Commit to "`metric` >= `threshold`", only if the claim holds.
    ///
    /// Returns `Ok(None)` when the metric is below the threshold. The metric
    /// value itself is never part of the commitment.
    pub fn prove_threshold(
        &self,
        metrics: &EqMetrics,
        metric: EqMetric,
        threshold: f64,
        evidence_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Commitment>> {
        if !(0.0..=MAX_SCORE).contains(&threshold) {
            return Err(EqError::InvalidInput(format!(
                "threshold must be within 0-{MAX_SCORE}, got {threshold}"
            )));
        }
        if metrics.value(metric) < threshold {
            return Ok(None);
        }
        let claim = format!("{}>={threshold}", metric.as_str());
        self.commit(&claim, evidence_id, at).map(Some)
    }

    /// Cohort-level commitment to a pattern type within a calendar month.
    ///
    /// Evidence is the month itself, so every participant reporting the same
    /// pattern type in the same month commits to the same hash.
    pub fn pattern_commitment(&self, pattern_type: EqPatternType, at: DateTime<Utc>) -> Result<Commitment> {
        let month_start = Utc
            .with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
            .single()
            .ok_or_else(|| EqError::InvalidInput(format!("invalid pattern timestamp {at}")))?;
        let period = month_start.format("%Y-%m").to_string();
        self.commit(pattern_type.as_str(), &period, month_start)
    }
}

/// Check a commitment against the evidence id the verifier was given
pub fn verify(commitment: &Commitment, evidence_id: &str) -> bool {
    let expected = commitment_hash(
        &commitment.claim_type,
        evidence_id,
        commitment.timestamp,
        &commitment.public_verification_key,
    );
    expected == commitment.proof_hash
}

fn verification_key(subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(VERIFICATION_KEY_DOMAIN.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(subject.as_bytes());
    hex::encode(hasher.finalize())
}

fn commitment_hash(claim_type: &str, evidence_id: &str, at: DateTime<Utc>, key: &str) -> String {
    let timestamp = at.to_rfc3339_opts(SecondsFormat::AutoSi, true);

    let mut hasher = Sha256::new();
    hasher.update(claim_type.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(evidence_id.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(timestamp.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
