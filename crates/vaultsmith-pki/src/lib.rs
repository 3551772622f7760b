//! Two-tier PKI and credential bootstrap
//!
//! One operator-invoked, strictly ordered, idempotent sequence that
//! populates the store: KV namespace, root + intermediate CA, per-service
//! issuance roles, per-service credentials, least-privilege policies,
//! AppRole identities, and the exported CA chain. Any step failure aborts
//! the run; completed steps stay in place and re-running is the recovery
//! path.

pub mod bootstrap;
pub mod report;

pub use bootstrap::{BootstrapConfig, BootstrapError, PkiBootstrapper};
pub use report::{BootstrapReport, StepOutcome};
