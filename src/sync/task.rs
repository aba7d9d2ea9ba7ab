//! Sync tasks and the caller-owned task queue

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::keys::EncryptedBlob;
use crate::sync::anonymize::AnonymizedPattern;

/// Lifecycle of a sync task: `pending -> syncing -> completed | failed`.
/// A task whose consent is revoked ends `cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed { synced_items: usize },
    Failed { reason: String },
    Cancelled,
}

impl SyncStatus {
    /// Whether the task will never be attempted again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed { .. } | SyncStatus::Failed { .. } | SyncStatus::Cancelled
        )
    }
}

/// Plaintext that gets encrypted into an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub patterns: Vec<AnonymizedPattern>,
}

/// What the transport collaborator receives: ciphertext plus routing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub task_id: Uuid,
    pub key_fingerprint: String,
    pub item_count: usize,
    pub payload: EncryptedBlob,
    pub created_at: DateTime<Utc>,
}

impl SyncEnvelope {
    /// SHA-256 over the ciphertext, hex encoded
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.payload.nonce.as_bytes());
        hasher.update(self.payload.ciphertext.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// One queued sync attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: Uuid,
    pub status: SyncStatus,
    pub attempts: u32,
    pub envelope: SyncEnvelope,
    pub updated_at: DateTime<Utc>,
}

impl SyncTask {
    pub fn new(envelope: SyncEnvelope) -> Self {
        Self {
            id: envelope.task_id,
            status: SyncStatus::Pending,
            attempts: 0,
            updated_at: envelope.created_at,
            envelope,
        }
    }

    pub(crate) fn transition(&mut self, status: SyncStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Arena of sync tasks keyed by id. Owned and threaded by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncQueue {
    tasks: BTreeMap<Uuid, SyncTask>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: SyncTask) -> Uuid {
        let id = task.id;
        self.tasks.insert(id, task);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&SyncTask> {
        self.tasks.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &Uuid) -> Option<&mut SyncTask> {
        self.tasks.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncTask> {
        self.tasks.values()
    }

    /// Ids of tasks still waiting for a transport attempt
    pub fn pending_ids(&self) -> Vec<Uuid> {
        self.tasks
            .values()
            .filter(|t| t.status == SyncStatus::Pending)
            .map(|t| t.id)
            .collect()
    }

    /// Tasks that completed on the given UTC day
    pub fn completed_on(&self, day: NaiveDate) -> u32 {
        let count = self
            .tasks
            .values()
            .filter(|t| matches!(t.status, SyncStatus::Completed { .. }))
            .filter(|t| t.updated_at.date_naive() == day)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Cancel a single non-terminal task. Returns false if it was already terminal or unknown.
    pub fn cancel(&mut self, id: &Uuid) -> bool {
        match self.tasks.get_mut(id) {
            Some(task) if !task.status.is_terminal() => {
                task.transition(SyncStatus::Cancelled);
                true
            }
            _ => false,
        }
    }

    /// Cancel every non-terminal task, returning how many were cancelled
    pub fn cancel_outstanding(&mut self) -> usize {
        let mut cancelled = 0;
        for task in self.tasks.values_mut() {
            if !task.status.is_terminal() {
                task.transition(SyncStatus::Cancelled);
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Drop finished tasks, returning how many were removed
    pub fn prune_terminal(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, t| !t.status.is_terminal());
        before - self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> SyncEnvelope {
        SyncEnvelope {
            task_id: Uuid::new_v4(),
            key_fingerprint: "fp".into(),
            item_count: 2,
            payload: EncryptedBlob {
                ciphertext: "Y2lwaGVy".into(),
                nonce: "bm9uY2U=".into(),
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = SyncTask::new(envelope());
        assert_eq!(task.status, SyncStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.id, task.envelope.task_id);
    }

    #[test]
    fn test_cancel_outstanding_skips_terminal() {
        let mut queue = SyncQueue::new();
        let pending = queue.insert(SyncTask::new(envelope()));
        let mut done = SyncTask::new(envelope());
        done.transition(SyncStatus::Completed { synced_items: 2 });
        let done = queue.insert(done);

        assert_eq!(queue.cancel_outstanding(), 1);
        assert_eq!(queue.get(&pending).unwrap().status, SyncStatus::Cancelled);
        assert_eq!(
            queue.get(&done).unwrap().status,
            SyncStatus::Completed { synced_items: 2 }
        );
        assert!(queue.pending_ids().is_empty());
    }

    #[test]
    fn test_cancel_single_task() {
        let mut queue = SyncQueue::new();
        let id = queue.insert(SyncTask::new(envelope()));
        assert!(queue.cancel(&id));
        assert!(!queue.cancel(&id));
        assert!(!queue.cancel(&Uuid::new_v4()));
    }

    #[test]
    fn test_completed_on_counts_only_that_day() {
        let mut queue = SyncQueue::new();
        let today = Utc::now();

        let mut done = SyncTask::new(envelope());
        done.transition(SyncStatus::Completed { synced_items: 1 });
        queue.insert(done);

        let mut yesterday = SyncTask::new(envelope());
        yesterday.status = SyncStatus::Completed { synced_items: 1 };
        yesterday.updated_at = today - chrono::Duration::days(1);
        queue.insert(yesterday);

        let mut failed = SyncTask::new(envelope());
        failed.transition(SyncStatus::Failed {
            reason: "offline".into(),
        });
        queue.insert(failed);
        queue.insert(SyncTask::new(envelope()));

        assert_eq!(queue.completed_on(today.date_naive()), 1);
    }

    #[test]
    fn test_prune_terminal() {
        let mut queue = SyncQueue::new();
        queue.insert(SyncTask::new(envelope()));
        let id = queue.insert(SyncTask::new(envelope()));
        queue.cancel(&id);

        assert_eq!(queue.prune_terminal(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_status_json_is_tagged() {
        let json = serde_json::to_value(SyncStatus::Failed {
            reason: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "timeout");
    }

    #[test]
    fn test_content_hash_is_stable() {
        let env = envelope();
        assert_eq!(env.content_hash(), env.content_hash());
        assert_eq!(env.content_hash().len(), 64);
    }
}
