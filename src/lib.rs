//! EQ Vault - On-device, privacy-preserving emotional-intelligence analytics
//!
//! EQ Vault turns emotional observation events into bounded metrics through a
//! local pipeline: metrics calculation → pattern detection → coaching. Results
//! are encrypted on the device before they are stored.
//!
//! ## Modules
//!
//! - **Local pipeline**: [`metrics`], [`patterns`], [`coaching`], [`pipeline`]
//! - **Device security**: [`keys`], [`store`]
//! - **Consented sharing**: [`sync`], [`proof`], [`aggregate`], [`value`]
//!
//! Nothing in the local pipeline holds a network transport. Data leaves the
//! device only through [`sync::PrivacySyncManager`], which needs explicit
//! consent and never forwards device-only patterns.

pub mod aggregate;
pub mod coaching;
pub mod config;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod noise;
pub mod patterns;
pub mod pipeline;
pub mod proof;
pub mod store;
pub mod sync;
pub mod types;
pub mod value;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregate::{AnonymousAggregation, AnonymousAggregator, CollectivePattern, Contribution};
pub use coaching::CoachingGenerator;
pub use config::EngineConfig;
pub use error::{EqError, Result};
pub use keys::{EncryptedBlob, KeyManager};
pub use metrics::MetricsCalculator;
pub use patterns::{MetricsHistory, PatternDetector};
pub use pipeline::{analyze_signals, signals_to_metrics, EqProcessor};
pub use proof::{Commitment, ProofGenerator};
pub use store::{InMemoryStore, KeyValueStore, PrivateEqData, SecureLocalStore};
pub use sync::{PrivacySyncManager, SelectiveSyncConfig, SyncConditions, SyncQueue, SyncTransport};
pub use types::{
    CoachingStyle, EmotionalSignal, EqAnalysis, EqMetric, EqMetrics, EqPattern, EqPatternType,
    PrivacyLevel, SignalOutcome,
};
pub use value::{
    MarketplaceListing, ResearchConsent, ResearchRegistry, RevenueSplit, ValuationResult,
    ValueCreator, ValueFactors,
};

/// Library version, stamped into CLI reports
pub const EQ_VAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for CLI reports
pub const PRODUCER_NAME: &str = "eq-vault";
