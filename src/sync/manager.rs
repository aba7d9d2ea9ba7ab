//! Privacy sync manager
//!
//! Pipeline per request:
//! 1. Drop every device-only pattern, unconditionally
//! 2. Drop pattern types not enabled in the [`SelectiveSyncConfig`]
//! 3. Defer when Wi-Fi or frequency conditions are unmet
//! 4. Anonymize each survivor at its configured level
//! 5. Encrypt the payload with the device key
//!
//! Only then is a task queued. Running a task hands the encrypted envelope to
//! the [`SyncTransport`], retrying failed sends before giving up.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EqError, Result};
use crate::keys::KeyManager;
use crate::sync::anonymize::anonymize;
use crate::sync::config::{SelectiveSyncConfig, SyncConditions};
use crate::sync::task::{SyncEnvelope, SyncPayload, SyncQueue, SyncStatus, SyncTask};
use crate::types::EqPattern;

/// Failure reported by the transport collaborator
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Network collaborator that delivers encrypted envelopes (allows mocking in tests)
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn send(&self, envelope: &SyncEnvelope) -> std::result::Result<(), TransportError>;
}

/// Shared consent flag. Revoking it stops any further transport attempt
/// for tasks created under the same manager, including one mid-retry.
#[derive(Debug, Clone)]
pub struct ConsentHandle(Arc<AtomicBool>);

impl ConsentHandle {
    fn granted() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_granted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn revoke(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How many times a send is attempted and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_sync_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Filters, anonymizes, encrypts and delivers patterns with explicit consent
#[derive(Debug)]
pub struct PrivacySyncManager {
    config: SelectiveSyncConfig,
    consent: ConsentHandle,
    retry: RetryPolicy,
}

impl PrivacySyncManager {
    /// Create a manager. Refuses unless the config carries explicit consent.
    pub fn new(config: SelectiveSyncConfig, retry: RetryPolicy) -> Result<Self> {
        if !config.require_explicit_consent {
            warn!("Sync manager refused: explicit consent not given");
            return Err(EqError::ConsentRequired(
                "selective sync requires explicit consent".into(),
            ));
        }
        config.validate()?;

        Ok(Self {
            config,
            consent: ConsentHandle::granted(),
            retry,
        })
    }

    pub fn config(&self) -> &SelectiveSyncConfig {
        &self.config
    }

    /// Handle that can revoke consent from elsewhere (e.g. a settings screen)
    pub fn consent_handle(&self) -> ConsentHandle {
        self.consent.clone()
    }

    /// Revoke consent and cancel every outstanding task in `queue`
    pub fn revoke_consent(&self, queue: &mut SyncQueue) -> usize {
        self.consent.revoke();
        let cancelled = queue.cancel_outstanding();
        warn!(cancelled, "Sync consent revoked");
        cancelled
    }

    /// Patterns that may be synced under this config. Device-only patterns
    /// are always excluded.
    pub fn filter<'a>(&self, patterns: &'a [EqPattern]) -> Vec<&'a EqPattern> {
        patterns
            .iter()
            .filter(|p| p.privacy_level.may_leave_device())
            .filter(|p| self.config.rule_for(p.pattern_type).is_some())
            .collect()
    }

    /// Prepare an encrypted sync task and add it to `queue`.
    ///
    /// Returns `Ok(None)` when nothing survives filtering, and
    /// [`EqError::SyncDeferred`] when conditions are unmet.
    pub fn schedule<R: Rng + ?Sized>(
        &self,
        queue: &mut SyncQueue,
        keys: &KeyManager,
        patterns: &[EqPattern],
        conditions: &SyncConditions,
        rng: &mut R,
    ) -> Result<Option<Uuid>> {
        self.ensure_consent()?;

        let eligible = self.filter(patterns);
        if eligible.is_empty() {
            debug!(offered = patterns.len(), "No patterns eligible for sync");
            return Ok(None);
        }

        // The queue's own completions count even if the caller under-reports
        let conditions = SyncConditions {
            syncs_today: conditions
                .syncs_today
                .max(queue.completed_on(Utc::now().date_naive())),
            ..*conditions
        };
        conditions.check(&self.config)?;

        let anonymized = eligible
            .iter()
            .filter_map(|p| {
                self.config
                    .rule_for(p.pattern_type)
                    .map(|rule| anonymize(p, rule.anonymization_level, rng))
            })
            .collect::<Vec<_>>();
        let item_count = anonymized.len();

        let payload = keys.encrypt_json(&SyncPayload {
            patterns: anonymized,
        })?;

        let envelope = SyncEnvelope {
            task_id: Uuid::new_v4(),
            key_fingerprint: self.config.device_key_fingerprint.clone(),
            item_count,
            payload,
            created_at: Utc::now(),
        };
        let id = queue.insert(SyncTask::new(envelope));

        info!(task_id = %id, item_count, "Queued sync task");
        Ok(Some(id))
    }

    /// Deliver one pending task, retrying failed sends.
    ///
    /// Transport failures surface only once every attempt is exhausted.
    pub async fn run(
        &self,
        queue: &mut SyncQueue,
        task_id: Uuid,
        transport: &dyn SyncTransport,
    ) -> Result<SyncStatus> {
        let task = queue
            .get_mut(&task_id)
            .ok_or_else(|| EqError::InvalidInput(format!("unknown sync task {task_id}")))?;

        if task.status != SyncStatus::Pending {
            return Err(EqError::InvalidInput(format!(
                "sync task {task_id} is not pending"
            )));
        }

        loop {
            if !self.consent.is_granted() {
                task.transition(SyncStatus::Cancelled);
                warn!(task_id = %task_id, "Sync task cancelled: consent revoked");
                return Err(EqError::ConsentRequired(
                    "consent revoked before transport".into(),
                ));
            }

            task.transition(SyncStatus::Syncing);
            task.attempts += 1;

            match transport.send(&task.envelope).await {
                Ok(()) => {
                    let status = SyncStatus::Completed {
                        synced_items: task.envelope.item_count,
                    };
                    task.transition(status.clone());
                    info!(
                        task_id = %task_id,
                        attempts = task.attempts,
                        synced_items = task.envelope.item_count,
                        "Sync task completed"
                    );
                    return Ok(status);
                }
                Err(e) if task.attempts >= self.retry.max_attempts => {
                    let reason = e.to_string();
                    task.transition(SyncStatus::Failed {
                        reason: reason.clone(),
                    });
                    warn!(task_id = %task_id, attempts = task.attempts, %reason, "Sync task failed");
                    return Err(EqError::SyncFailed {
                        attempts: task.attempts,
                        reason,
                    });
                }
                Err(e) => {
                    debug!(
                        task_id = %task_id,
                        attempt = task.attempts,
                        error = %e,
                        "Sync attempt failed, retrying"
                    );
                    task.transition(SyncStatus::Pending);
                    if !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }
    }

    /// Run every pending task in `queue`, one after another
    pub async fn run_pending(
        &self,
        queue: &mut SyncQueue,
        transport: &dyn SyncTransport,
    ) -> Vec<(Uuid, Result<SyncStatus>)> {
        let mut results = Vec::new();
        for id in queue.pending_ids() {
            let result = self.run(queue, id, transport).await;
            results.push((id, result));
        }
        results
    }

    fn ensure_consent(&self) -> Result<()> {
        if self.consent.is_granted() {
            Ok(())
        } else {
            warn!("Sync refused: consent revoked");
            Err(EqError::ConsentRequired("sync consent has been revoked".into()))
        }
    }
}
