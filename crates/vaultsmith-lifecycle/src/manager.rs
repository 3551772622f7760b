//! Renewal decisions and execution

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use vaultsmith_adapter::{materialize_layout, ServiceSpec};
use vaultsmith_store::{wait_until, IssueRequest, RetryPolicy, SecretStoreClient, StoreError};

use crate::expiry::{days_remaining, not_after_timestamp};
use crate::report::{ExpirationEntry, ExpirationReport, Thresholds};

const INT_MOUNT: &str = "pki_int";

/// Days below which a certificate is renewed
pub const DEFAULT_RENEWAL_THRESHOLD_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub catalog: Vec<ServiceSpec>,
    /// Parent directory of per-service certificate directories
    pub cert_root: PathBuf,
    pub threshold_days: i64,
    /// TTL requested for fresh leaf certificates
    pub leaf_ttl: String,
    /// Readiness poll bound before a batch issues anything
    pub retry: RetryPolicy,
}

impl LifecycleConfig {
    pub fn new(cert_root: impl Into<PathBuf>) -> Self {
        Self {
            catalog: vaultsmith_adapter::default_catalog(),
            cert_root: cert_root.into(),
            threshold_days: DEFAULT_RENEWAL_THRESHOLD_DAYS,
            leaf_ttl: "2160h".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalAction {
    /// Certificate valid beyond the threshold; leave it alone
    Skip,
    /// Certificate nearing expiry (or force requested)
    Renew,
    /// No certificate on disk, or unreadable
    Generate,
    /// Renewal was attempted and failed
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenewalDecision {
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    pub action: RenewalAction,
}

/// A freshly issued leaf; ephemeral, only ever materialized to disk
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub service_name: String,
    pub common_name: String,
    pub cert_pem: String,
    pub private_key_pem: String,
    pub ca_chain_pem: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RenewalError {
    /// The readiness poll never saw a healthy store; no service was
    /// attempted.
    #[error("store unavailable after {attempts} attempts: {reason}")]
    StoreUnavailable { attempts: u32, reason: String },

    #[error("issuance for '{service}' failed: {source}")]
    IssuanceFailed {
        service: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to write certificate files for '{service}': {source}")]
    Io {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service '{0}' is not in the catalog")]
    UnknownService(String),

    /// This family's TLS is delegated elsewhere; nothing to renew.
    #[error("service '{0}' has no certificate layout")]
    NoLayout(String),
}

/// Knobs for one batch run
#[derive(Debug, Clone, Default)]
pub struct RenewalPlan {
    pub dry_run: bool,
    pub force: bool,
    /// Restrict the run to one service
    pub service: Option<String>,
}

/// Aggregated batch result with per-service failure isolation
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub decisions: Vec<RenewalDecision>,
    pub renewed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl BatchOutcome {
    /// 0 = full success/no action, 1 = total failure, 2 = partial.
    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() {
            0
        } else if self.renewed.is_empty() && self.skipped.is_empty() {
            1
        } else {
            2
        }
    }
}

/// Drives expiry evaluation and renewal for every cataloged service
pub struct CertificateLifecycleManager {
    client: SecretStoreClient,
    config: LifecycleConfig,
}

impl CertificateLifecycleManager {
    pub fn new(client: SecretStoreClient, config: LifecycleConfig) -> Self {
        Self { client, config }
    }

    fn service_dir(&self, service: &str) -> PathBuf {
        self.config.cert_root.join(service)
    }

    /// Decide what to do for one service without doing it.
    pub fn evaluate(&self, spec: &ServiceSpec, force: bool, now: i64) -> RenewalDecision {
        let layout = match spec.family.cert_layout() {
            Some(layout) if spec.tls_enabled => layout,
            _ => {
                return RenewalDecision {
                    service_name: spec.name.clone(),
                    days_remaining: None,
                    action: RenewalAction::Skip,
                }
            }
        };
        let cert_path = self.service_dir(&spec.name).join(layout.cert_file);
        match not_after_timestamp(&cert_path) {
            Err(_) => RenewalDecision {
                service_name: spec.name.clone(),
                days_remaining: None,
                action: RenewalAction::Generate,
            },
            Ok(not_after) => {
                let days = days_remaining(not_after, now);
                let action = if force || days < self.config.threshold_days {
                    RenewalAction::Renew
                } else {
                    RenewalAction::Skip
                };
                RenewalDecision {
                    service_name: spec.name.clone(),
                    days_remaining: Some(days),
                    action,
                }
            }
        }
    }

    /// Issue a fresh certificate under the service's role and replace the
    /// on-disk layout wholesale. Each file is written atomically, so a
    /// concurrent startup reader never sees a half-written certificate.
    pub async fn renew(&self, spec: &ServiceSpec) -> Result<IssuedCertificate, RenewalError> {
        let layout = spec
            .family
            .cert_layout()
            .ok_or_else(|| RenewalError::NoLayout(spec.name.clone()))?;

        let common_name = format!("{}.localhost", spec.name);
        let request = IssueRequest {
            common_name: common_name.clone(),
            alt_names: Some(format!("localhost,{}", spec.name)),
            ip_sans: Some("127.0.0.1".to_string()),
            ttl: self.config.leaf_ttl.clone(),
        };
        let bundle = self
            .client
            .issue_certificate(INT_MOUNT, &spec.name, &request)
            .await
            .map_err(|source| RenewalError::IssuanceFailed {
                service: spec.name.clone(),
                source,
            })?;

        let ca_chain = if bundle.ca_chain.is_empty() {
            bundle.issuing_ca.clone()
        } else {
            bundle.ca_chain.join("\n")
        };

        let service_dir = self.service_dir(&spec.name);
        // Stale contents are replaced wholesale; a leftover file from an
        // older layout must not survive a renewal
        if service_dir.exists() {
            std::fs::remove_dir_all(&service_dir).map_err(|source| RenewalError::Io {
                service: spec.name.clone(),
                source,
            })?;
        }
        materialize_layout(
            &layout,
            &service_dir,
            &bundle.certificate,
            &bundle.private_key,
            &ca_chain,
        )
        .map_err(|source| RenewalError::Io {
            service: spec.name.clone(),
            source,
        })?;

        let issued_at = Utc::now();
        let expires_at = Utc
            .timestamp_opt(bundle.expiration, 0)
            .single()
            .unwrap_or(issued_at);
        info!(service = %spec.name, %common_name, expires = %expires_at, "certificate renewed");
        self.append_log("renewal.log", &format!(
            "{} renewed service={} cn={} expires={}",
            issued_at.to_rfc3339(),
            spec.name,
            common_name,
            expires_at.to_rfc3339()
        ));

        Ok(IssuedCertificate {
            service_name: spec.name.clone(),
            common_name,
            cert_pem: bundle.certificate,
            private_key_pem: bundle.private_key,
            ca_chain_pem: ca_chain,
            issued_at,
            expires_at,
        })
    }

    /// Evaluate and (unless dry-run) renew every targeted service.
    /// Failures are isolated per service: one broken issuance still lets
    /// the rest of the batch renew.
    pub async fn run(&self, plan: &RenewalPlan) -> Result<BatchOutcome, RenewalError> {
        let targets: Vec<&ServiceSpec> = match &plan.service {
            Some(name) => {
                let spec = self
                    .config
                    .catalog
                    .iter()
                    .find(|s| &s.name == name)
                    .ok_or_else(|| RenewalError::UnknownService(name.clone()))?;
                vec![spec]
            }
            None => self.config.catalog.iter().collect(),
        };

        // A dry run reads only the filesystem; everything else must see a
        // ready store before any service is attempted
        if !plan.dry_run {
            let attempts = self.config.retry.max_attempts;
            wait_until(self.config.retry, || self.client.ready())
                .await
                .map_err(|err| {
                    warn!("store readiness poll exhausted");
                    RenewalError::StoreUnavailable {
                        attempts,
                        reason: err.to_string(),
                    }
                })?;
        }

        let now = Utc::now().timestamp();
        let mut outcome = BatchOutcome::default();
        for spec in targets {
            let mut decision = self.evaluate(spec, plan.force, now);
            match decision.action {
                RenewalAction::Skip => {
                    if spec.tls_enabled && spec.family.cert_layout().is_some() {
                        outcome.skipped.push(spec.name.clone());
                    }
                }
                RenewalAction::Renew | RenewalAction::Generate if plan.dry_run => {}
                RenewalAction::Renew | RenewalAction::Generate => {
                    match self.renew(spec).await {
                        Ok(_) => outcome.renewed.push(spec.name.clone()),
                        Err(err) => {
                            error!(service = %spec.name, "renewal failed: {err}");
                            self.append_log("renewal.log", &format!(
                                "{} failed service={} error={err}",
                                Utc::now().to_rfc3339(),
                                spec.name
                            ));
                            decision.action = RenewalAction::Fail;
                            outcome.failed.push((spec.name.clone(), err.to_string()));
                        }
                    }
                }
                RenewalAction::Fail => {}
            }
            outcome.decisions.push(decision);
        }
        Ok(outcome)
    }

    /// Days-remaining report for `check-expiration`.
    pub fn check(
        &self,
        thresholds: Thresholds,
        service: Option<&str>,
        now: i64,
    ) -> Result<ExpirationReport, RenewalError> {
        if let Some(name) = service {
            if !self.config.catalog.iter().any(|s| s.name == name) {
                return Err(RenewalError::UnknownService(name.to_string()));
            }
        }
        let mut report = ExpirationReport::default();
        for spec in &self.config.catalog {
            if let Some(filter) = service {
                if spec.name != filter {
                    continue;
                }
            }
            let Some(layout) = spec.family.cert_layout() else {
                continue;
            };
            if !spec.tls_enabled {
                continue;
            }
            let cert_path = self.service_dir(&spec.name).join(layout.cert_file);
            let days = not_after_timestamp(&cert_path)
                .ok()
                .map(|not_after| days_remaining(not_after, now));
            report
                .entries
                .push(ExpirationEntry::classify(&spec.name, days, thresholds));
        }
        self.append_log(
            "check.log",
            &format!(
                "{} checked entries={} nagios_exit={}",
                Utc::now().to_rfc3339(),
                report.entries.len(),
                report.nagios_exit_code()
            ),
        );
        Ok(report)
    }

    /// Append-only, timestamped audit logs next to the certificates.
    /// Logging must never fail an operation that already succeeded.
    fn append_log(&self, file: &str, line: &str) {
        let path = self.config.cert_root.join(file);
        let result = std::fs::create_dir_all(&self.config.cert_root).and_then(|_| {
            std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .and_then(|mut f| writeln!(f, "{line}"))
        });
        if let Err(err) = result {
            warn!(path = %path.display(), "could not append audit log: {err}");
        }
    }
}
