//! Per-service credential records
//!
//! Random credential generation plus the idempotent create/read/repair
//! layer over the store's KV v2 records. Records are created once and
//! never silently overwritten; re-runs may only add missing fields.

pub mod generate;
pub mod store;

pub use generate::generate_password;
pub use store::{CredentialOutcome, CredentialStore, CredentialError};
