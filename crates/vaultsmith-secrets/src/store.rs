//! Idempotent credential records over KV v2

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};
use vaultsmith_store::{SecretRecord, SecretStoreClient, StoreError};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What `ensure` did to a service's record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOutcome {
    /// No record existed; all desired fields were written.
    Created,
    /// Record existed but lacked some fields; only those were added.
    Repaired { added: Vec<String> },
    /// Record already carried every desired field; nothing written.
    Unchanged,
}

/// Create/read/repair layer for per-service secret records.
///
/// Existing field values are never mutated: a re-run can only add fields
/// the record is missing (e.g. retrofitting `tls_enabled` onto a record
/// created before TLS support existed).
#[derive(Debug, Clone)]
pub struct CredentialStore {
    client: SecretStoreClient,
}

impl CredentialStore {
    pub fn new(client: SecretStoreClient) -> Self {
        Self { client }
    }

    /// Read a service's record; `SecretNotFound` propagates to the caller.
    pub async fn fetch(&self, service: &str) -> Result<SecretRecord, CredentialError> {
        Ok(self.client.read_secret(service).await?)
    }

    /// Create the record if absent; otherwise add only missing fields.
    pub async fn ensure(
        &self,
        service: &str,
        desired: &BTreeMap<String, String>,
    ) -> Result<CredentialOutcome, CredentialError> {
        let existing = match self.client.read_secret(service).await {
            Ok(record) => record,
            Err(StoreError::SecretNotFound { .. }) => {
                info!(service, "creating credential record");
                self.client
                    .write_secret(
                        service,
                        &SecretRecord {
                            fields: desired.clone(),
                        },
                    )
                    .await?;
                return Ok(CredentialOutcome::Created);
            }
            Err(err) => return Err(err.into()),
        };

        let added: Vec<String> = desired
            .keys()
            .filter(|key| !existing.fields.contains_key(*key))
            .cloned()
            .collect();
        if added.is_empty() {
            debug!(service, "credential record already complete");
            return Ok(CredentialOutcome::Unchanged);
        }

        let mut merged = existing.fields;
        for key in &added {
            merged.insert(key.clone(), desired[key].clone());
        }
        info!(service, fields = ?added, "repairing credential record with missing fields");
        self.client
            .write_secret(service, &SecretRecord { fields: merged })
            .await?;
        Ok(CredentialOutcome::Repaired { added })
    }
}
