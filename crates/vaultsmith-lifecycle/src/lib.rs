//! Certificate lifecycle management
//!
//! Evaluates leaf-certificate expiry against a renewal threshold, renews
//! through the store's issuance endpoint, materializes per-service file
//! layouts atomically, and aggregates batch runs with per-service
//! failure isolation.

pub mod expiry;
pub mod manager;
pub mod report;

pub use expiry::{days_remaining, not_after_timestamp, ExpiryError};
pub use manager::{
    BatchOutcome, CertificateLifecycleManager, IssuedCertificate, LifecycleConfig, RenewalAction,
    RenewalDecision, RenewalError, RenewalPlan,
};
pub use report::{CheckStatus, ExpirationEntry, ExpirationReport, Thresholds};
