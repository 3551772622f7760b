//! AppRole authentication for dependent services
//!
//! At startup a service exchanges a role identifier and secret identifier
//! (mounted read-only on disk) for a short-lived, least-privilege client
//! token. The running service process never holds a store-wide token; the
//! token exists only for the startup sequence and expires on its own.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use vaultsmith_store::{wait_until, AccessToken, RetryPolicy, SecretStoreClient, StoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    /// role-id / secret-id file absent or empty: a configuration error,
    /// not something to retry.
    #[error("approle credential file missing or empty: {path}")]
    MissingCredentials { path: PathBuf },

    /// The store refused the exchange or returned no usable token.
    /// Fatal; retrying with the same identifiers cannot succeed.
    #[error("approle login rejected by the store")]
    AuthRejected,

    /// The readiness poll never saw a healthy store.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AuthRejected => AuthError::AuthRejected,
            StoreError::Unavailable(msg) => AuthError::StoreUnavailable(msg),
            other => AuthError::Store(other),
        }
    }
}

/// Startup-time AppRole exchange
#[derive(Debug, Clone)]
pub struct ServiceAuthenticator {
    client: SecretStoreClient,
}

impl ServiceAuthenticator {
    pub fn new(client: SecretStoreClient) -> Self {
        Self { client }
    }

    /// Exchange the identifiers in `approle_dir` for a client token.
    ///
    /// Expects `role-id` and `secret-id` files as materialized at
    /// bootstrap. Does not poll: callers that may race the store's own
    /// startup should use [`Self::authenticate_when_ready`].
    pub async fn authenticate(&self, approle_dir: &Path) -> Result<AccessToken, AuthError> {
        let role_id = read_identity(&approle_dir.join("role-id"))?;
        let secret_id = read_identity(&approle_dir.join("secret-id"))?;

        let token = self.client.approle_login(&role_id, &secret_id).await?;
        info!(
            ttl = token.ttl,
            policies = ?token.policies,
            "approle login succeeded"
        );
        Ok(token)
    }

    /// Bounded health-poll, then authenticate.
    ///
    /// A sealed or unreachable store fails with `StoreUnavailable` once
    /// the policy is exhausted, so supervised startup scripts exit
    /// non-zero instead of hanging.
    pub async fn authenticate_when_ready(
        &self,
        approle_dir: &Path,
        policy: RetryPolicy,
    ) -> Result<AccessToken, AuthError> {
        wait_until(policy, || self.client.ready())
            .await
            .map_err(|e| {
                warn!("store never became ready: {e}");
                AuthError::StoreUnavailable(e.to_string())
            })?;
        self.authenticate(approle_dir).await
    }
}

fn read_identity(path: &Path) -> Result<String, AuthError> {
    if !path.exists() {
        return Err(AuthError::MissingCredentials {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path).map_err(|source| AuthError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let id = raw.trim();
    if id.is_empty() {
        return Err(AuthError::MissingCredentials {
            path: path.to_path_buf(),
        });
    }
    Ok(id.to_string())
}
