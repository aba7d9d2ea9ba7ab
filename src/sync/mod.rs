//! Consent-gated, anonymized pattern sync
//!
//! Nothing in this module runs unless a [`SelectiveSyncConfig`] carries explicit
//! consent. Device-only patterns are dropped before anything else happens.

pub mod anonymize;
pub mod config;
pub mod manager;
pub mod task;

pub use anonymize::{anonymize, coarsen_timestamp, AnonymizedPattern, MAX_ANONYMIZATION_LEVEL};
pub use config::{PatternSyncRule, SelectiveSyncConfig, SyncConditions, DEFAULT_MAX_SYNCS_PER_DAY};
pub use manager::{ConsentHandle, PrivacySyncManager, RetryPolicy, SyncTransport, TransportError};
pub use task::{SyncEnvelope, SyncPayload, SyncQueue, SyncStatus, SyncTask};
