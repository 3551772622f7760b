//! The ordered bootstrap sequence

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, instrument, warn};

use vaultsmith_adapter::{write_atomic, ServiceSpec, MODE_PRIVATE, MODE_PUBLIC};
use vaultsmith_secrets::{
    generate_password, CredentialError, CredentialOutcome, CredentialStore,
    generate::DEFAULT_PASSWORD_LEN,
};
use vaultsmith_store::{
    wait_until, RetryPolicy, RoleDefinition, SecretStoreClient, StoreError,
};

use crate::report::{BootstrapReport, StepOutcome};

const KV_MOUNT: &str = "secret";
const ROOT_MOUNT: &str = "pki";
const INT_MOUNT: &str = "pki_int";

/// Everything the bootstrap sequence needs, passed explicitly
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub catalog: Vec<ServiceSpec>,
    /// Where the exported CA chain lands
    pub ca_dir: PathBuf,
    /// Parent of the per-service `role-id` / `secret-id` directories
    pub approle_dir: PathBuf,
    pub root_common_name: String,
    pub intermediate_common_name: String,
    /// Years-scale TTLs for the two CA tiers
    pub root_ttl: String,
    pub intermediate_ttl: String,
    pub ca_key_type: String,
    pub ca_key_bits: u32,
    /// Max TTL for leaf certificates issued under the service roles
    pub leaf_max_ttl: String,
    /// TTL of tokens minted through a service's AppRole
    pub approle_token_ttl: String,
    pub retry: RetryPolicy,
}

impl BootstrapConfig {
    pub fn new(ca_dir: impl Into<PathBuf>, approle_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog: vaultsmith_adapter::default_catalog(),
            ca_dir: ca_dir.into(),
            approle_dir: approle_dir.into(),
            root_common_name: "Vaultsmith Root CA".to_string(),
            intermediate_common_name: "Vaultsmith Intermediate CA".to_string(),
            root_ttl: "87600h".to_string(),
            intermediate_ttl: "43800h".to_string(),
            ca_key_type: "rsa".to_string(),
            ca_key_bits: 4096,
            leaf_max_ttl: "2160h".to_string(),
            approle_token_ttl: "1h".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Vec<ServiceSpec>) -> Self {
        self.catalog = catalog;
        self
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The health poll never saw a ready store.
    #[error("store unavailable after {attempts} attempts: {reason}")]
    StoreUnavailable { attempts: u32, reason: String },

    /// A sequential step failed; completed steps are left in place and
    /// re-running bootstrap is the recovery path.
    #[error("bootstrap step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: StoreError,
    },

    #[error("credential step for '{service}' failed: {source}")]
    Credential {
        service: String,
        #[source]
        source: CredentialError,
    },

    /// A shared-group or derived credential points at a record that does
    /// not exist yet; the catalog must order sources before dependents.
    #[error("credential source '{source_service}' for '{service}' not found")]
    MissingCredentialSource {
        service: String,
        source_service: String,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CA export read back no certificate at a mount even though
    /// the earlier steps created both tiers.
    #[error("no CA material at mount '{mount}' to export")]
    MissingCa { mount: String },
}

/// Idempotent, strictly ordered PKI/credential bootstrap
pub struct PkiBootstrapper {
    client: SecretStoreClient,
    credentials: CredentialStore,
    config: BootstrapConfig,
}

impl PkiBootstrapper {
    pub fn new(client: SecretStoreClient, config: BootstrapConfig) -> Self {
        let credentials = CredentialStore::new(client.clone());
        Self {
            client,
            credentials,
            config,
        }
    }

    /// Run the full sequence. Safe to re-invoke: existing CAs, roles, and
    /// credentials are detected and skipped (credentials may gain missing
    /// fields, never lose or change existing ones).
    #[instrument(skip_all)]
    pub async fn bootstrap(&self) -> Result<BootstrapReport, BootstrapError> {
        let mut report = BootstrapReport::default();

        self.wait_for_store().await?;

        self.ensure_kv_mount(&mut report).await?;
        self.ensure_root_ca(&mut report).await?;
        self.ensure_intermediate_ca(&mut report).await?;
        self.upsert_roles(&mut report).await?;
        self.ensure_credentials(&mut report).await?;
        self.write_policies(&mut report).await?;
        self.ensure_approles(&mut report).await?;
        self.export_ca_chain(&mut report).await?;

        info!(
            created = report.created(),
            skipped = report.skipped(),
            repaired = report.repaired(),
            "bootstrap complete"
        );
        Ok(report)
    }

    async fn wait_for_store(&self) -> Result<(), BootstrapError> {
        let attempts = self.config.retry.max_attempts;
        wait_until(self.config.retry, || self.client.ready())
            .await
            .map(|_| ())
            .map_err(|err| {
                warn!("store readiness poll exhausted");
                BootstrapError::StoreUnavailable {
                    attempts,
                    reason: err.to_string(),
                }
            })
    }

    async fn ensure_kv_mount(&self, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        if step(KV_MOUNT, self.client.mount_exists(KV_MOUNT).await)? {
            report.record("kv-mount", StepOutcome::Skipped);
            return Ok(());
        }
        step(
            "kv-mount",
            self.client
                .enable_mount(KV_MOUNT, "kv", Some(serde_json::json!({ "version": "2" })))
                .await,
        )?;
        report.record("kv-mount", StepOutcome::Created);
        Ok(())
    }

    async fn ensure_root_ca(&self, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        if !step("root-mount", self.client.mount_exists(ROOT_MOUNT).await)? {
            step(
                "root-mount",
                self.client.enable_mount(ROOT_MOUNT, "pki", None).await,
            )?;
        }
        if step("root-ca", self.client.ca_pem(ROOT_MOUNT).await)?.is_some() {
            report.record("root-ca", StepOutcome::Skipped);
            return Ok(());
        }
        info!(cn = %self.config.root_common_name, "generating root CA");
        step(
            "root-ca",
            self.client
                .generate_root(
                    ROOT_MOUNT,
                    &self.config.root_common_name,
                    &self.config.root_ttl,
                    &self.config.ca_key_type,
                    self.config.ca_key_bits,
                )
                .await
                .map(|_| ()),
        )?;
        step(
            "root-ca-urls",
            self.client
                .configure_urls(ROOT_MOUNT, self.client.addr())
                .await,
        )?;
        report.record("root-ca", StepOutcome::Created);
        Ok(())
    }

    /// Three-call protocol: generate CSR, have the root sign it, import
    /// the signed certificate. Probed first so a partial earlier run is
    /// recovered by simply running again.
    async fn ensure_intermediate_ca(
        &self,
        report: &mut BootstrapReport,
    ) -> Result<(), BootstrapError> {
        if !step("int-mount", self.client.mount_exists(INT_MOUNT).await)? {
            step(
                "int-mount",
                self.client.enable_mount(INT_MOUNT, "pki", None).await,
            )?;
        }
        if step("intermediate-ca", self.client.ca_pem(INT_MOUNT).await)?.is_some() {
            report.record("intermediate-ca", StepOutcome::Skipped);
            return Ok(());
        }
        info!(cn = %self.config.intermediate_common_name, "creating intermediate CA");
        let csr = step(
            "intermediate-csr",
            self.client
                .generate_intermediate_csr(
                    INT_MOUNT,
                    &self.config.intermediate_common_name,
                    &self.config.ca_key_type,
                    self.config.ca_key_bits,
                )
                .await,
        )?;
        let signed = step(
            "intermediate-sign",
            self.client
                .sign_intermediate(ROOT_MOUNT, &csr, &self.config.intermediate_ttl)
                .await,
        )?;
        step(
            "intermediate-set-signed",
            self.client.set_signed_intermediate(INT_MOUNT, &signed).await,
        )?;
        step(
            "intermediate-urls",
            self.client
                .configure_urls(INT_MOUNT, self.client.addr())
                .await,
        )?;
        report.record("intermediate-ca", StepOutcome::Created);
        Ok(())
    }

    async fn upsert_roles(&self, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        for spec in &self.config.catalog {
            let role = RoleDefinition {
                allowed_domains: vec![
                    spec.name.clone(),
                    "localhost".to_string(),
                ],
                max_ttl: self.config.leaf_max_ttl.clone(),
                ..RoleDefinition::default()
            };
            step(
                &format!("role:{}", spec.name),
                self.client.upsert_role(INT_MOUNT, &spec.name, &role).await,
            )?;
            report.record(format!("role:{}", spec.name), StepOutcome::Applied);
        }
        Ok(())
    }

    async fn ensure_credentials(&self, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        for spec in &self.config.catalog {
            let desired = self.desired_fields(spec).await?;
            let outcome = self
                .credentials
                .ensure(&spec.name, &desired)
                .await
                .map_err(|source| BootstrapError::Credential {
                    service: spec.name.clone(),
                    source,
                })?;
            let step_outcome = match outcome {
                CredentialOutcome::Created => StepOutcome::Created,
                CredentialOutcome::Repaired { .. } => StepOutcome::Repaired,
                CredentialOutcome::Unchanged => StepOutcome::Skipped,
            };
            report.record(format!("credential:{}", spec.name), step_outcome);
        }
        Ok(())
    }

    /// Desired fields for a fresh record. Existing records keep their
    /// values; only fields absent there are taken from this map.
    async fn desired_fields(
        &self,
        spec: &ServiceSpec,
    ) -> Result<BTreeMap<String, String>, BootstrapError> {
        let mut fields = BTreeMap::new();

        // Dependent records copy from their source instead of generating
        if let Some(source_service) = self.credential_source(spec) {
            let source = self
                .credentials
                .fetch(&source_service)
                .await
                .map_err(|err| match err {
                    CredentialError::Store(StoreError::SecretNotFound { .. }) => {
                        BootstrapError::MissingCredentialSource {
                            service: spec.name.clone(),
                            source_service: source_service.clone(),
                        }
                    }
                    source => BootstrapError::Credential {
                        service: spec.name.clone(),
                        source,
                    },
                })?;
            for field in spec.family.credential_fields() {
                if let Some(value) = source.get(field) {
                    fields.insert(field.to_string(), value.to_string());
                }
            }
        }

        for field in spec.family.credential_fields() {
            if fields.contains_key(*field) {
                continue;
            }
            let value = match *field {
                "user" => "devuser".to_string(),
                "database" => "devdb".to_string(),
                "vhost" => "/".to_string(),
                _ => generate_password(DEFAULT_PASSWORD_LEN),
            };
            fields.insert(field.to_string(), value);
        }
        fields.insert("tls_enabled".to_string(), spec.tls_enabled.to_string());
        Ok(fields)
    }

    /// The record this service's credential is copied from: an explicit
    /// `derived_from`, or the first member of its shared group.
    fn credential_source(&self, spec: &ServiceSpec) -> Option<String> {
        if let Some(source) = &spec.derived_from {
            return Some(source.clone());
        }
        let group = spec.shared_credential_group.as_deref()?;
        let first = vaultsmith_adapter::group_members(&self.config.catalog, group)
            .first()
            .map(|s| s.name.clone())?;
        (first != spec.name).then_some(first)
    }

    async fn write_policies(&self, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        for spec in &self.config.catalog {
            let policy = service_policy(&spec.name);
            step(
                &format!("policy:{}", spec.name),
                self.client.write_policy(&spec.name, &policy).await,
            )?;
            report.record(format!("policy:{}", spec.name), StepOutcome::Applied);
        }
        Ok(())
    }

    /// Enable the AppRole method, bind one role per service to its
    /// policy, and materialize role-id/secret-id files for the service's
    /// startup sequence. Files already present are left untouched so a
    /// re-run does not invalidate identities services already mount.
    async fn ensure_approles(&self, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        if !step("approle-auth", self.client.auth_exists("approle").await)? {
            step(
                "approle-auth",
                self.client.enable_auth("approle", "approle").await,
            )?;
        }
        for spec in &self.config.catalog {
            let dir = self.config.approle_dir.join(&spec.name);
            let role_id_path = dir.join("role-id");
            let secret_id_path = dir.join("secret-id");

            step(
                &format!("approle:{}", spec.name),
                self.client
                    .upsert_approle(
                        &spec.name,
                        &[spec.name.clone()],
                        &self.config.approle_token_ttl,
                    )
                    .await,
            )?;

            if role_id_path.exists() && secret_id_path.exists() {
                report.record(format!("approle:{}", spec.name), StepOutcome::Skipped);
                continue;
            }

            let role_id = step(
                &format!("approle:{}", spec.name),
                self.client.read_role_id(&spec.name).await,
            )?;
            let secret_id = step(
                &format!("approle:{}", spec.name),
                self.client.generate_secret_id(&spec.name).await,
            )?;
            write_file(&role_id_path, role_id.as_bytes(), MODE_PRIVATE)?;
            write_file(&secret_id_path, secret_id.as_bytes(), MODE_PRIVATE)?;
            report.record(format!("approle:{}", spec.name), StepOutcome::Created);
        }
        Ok(())
    }

    async fn export_ca_chain(&self, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        let root = require_ca(
            ROOT_MOUNT,
            step("ca-export", self.client.ca_pem(ROOT_MOUNT).await)?,
        )?;
        let intermediate = require_ca(
            INT_MOUNT,
            step("ca-export", self.client.ca_pem(INT_MOUNT).await)?,
        )?;
        let full = format!("{}\n{}", intermediate.trim_end(), root.trim_end());

        write_file(
            &self.config.ca_dir.join("ca-chain.pem"),
            intermediate.as_bytes(),
            MODE_PUBLIC,
        )?;
        write_file(
            &self.config.ca_dir.join("root-ca.pem"),
            root.as_bytes(),
            MODE_PUBLIC,
        )?;
        write_file(
            &self.config.ca_dir.join("full-chain.pem"),
            full.as_bytes(),
            MODE_PUBLIC,
        )?;
        report.record("ca-export", StepOutcome::Applied);
        Ok(())
    }
}

fn service_policy(service: &str) -> String {
    format!(
        r#"path "secret/data/{service}" {{
  capabilities = ["read"]
}}

path "pki_int/issue/{service}" {{
  capabilities = ["create", "update"]
}}
"#
    )
}

/// Both CA tiers exist by the time export runs; an empty read here means
/// the store lost state mid-run and must not produce empty PEM files.
fn require_ca(mount: &str, pem: Option<String>) -> Result<String, BootstrapError> {
    pem.ok_or_else(|| BootstrapError::MissingCa {
        mount: mount.to_string(),
    })
}

fn step<T>(name: &str, result: Result<T, StoreError>) -> Result<T, BootstrapError> {
    result.map_err(|source| BootstrapError::Step {
        step: name.to_string(),
        source,
    })
}

fn write_file(path: &std::path::Path, contents: &[u8], mode: u32) -> Result<(), BootstrapError> {
    write_atomic(path, contents, mode).map_err(|source| BootstrapError::Io {
        path: path.to_path_buf(),
        source,
    })
}
