//! In-process fake secret store for integration tests
//!
//! Implements the slice of the store's v1 HTTP API the workspace talks
//! to (health/seal, KV v2, two PKI mounts, AppRole, ACL policies) with a
//! real rcgen-backed certificate hierarchy, so tests exercise genuine
//! PEM material without Docker or a running store.

pub mod pki;
pub mod server;

pub use pki::{mint_leaf_expiring_in, TestPki};
pub use server::FakeStore;
