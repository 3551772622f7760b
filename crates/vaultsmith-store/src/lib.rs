//! Typed HTTP client for the backing secret/PKI store
//!
//! Wraps the store's v1 HTTP API (health, KV v2, PKI mounts, AppRole,
//! ACL policies) behind a small typed surface, plus the bounded-retry
//! helper every readiness check in the workspace shares.

pub mod client;
pub mod retry;
pub mod types;

pub use client::{SecretStoreClient, StoreConfig, StoreError};
pub use retry::{wait_until, RetryError, RetryPolicy};
pub use types::{
    AccessToken, HealthStatus, IssueRequest, IssuedBundle, RoleDefinition, SecretRecord,
};
