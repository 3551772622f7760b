//! Render a secret record + certificate directory into a runtime config

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use vaultsmith_store::SecretRecord;

use crate::catalog::ServiceSpec;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The fetched record lacks a field this family requires.
    #[error("secret for '{service}' is missing required field '{field}'")]
    MissingField { service: String, field: String },

    /// `tls_enabled` carries something other than true/false.
    #[error("secret for '{service}' has unusable tls_enabled value '{value}'")]
    InvalidTlsFlag { service: String, value: String },

    /// TLS is on but a layout file is absent or unreadable. The service
    /// must not start partially secured.
    #[error("certificate file for '{service}' missing or unreadable: {path}")]
    MissingCertificateFile { service: String, path: PathBuf },
}

/// Validated TLS material paths for the launcher
#[derive(Debug, Clone, Serialize)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    pub ca_path: PathBuf,
}

/// Everything an external launcher needs to start the real service
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    pub service: String,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
}

/// Translate a service's secret record and certificate directory into a
/// validated [`RuntimeConfig`].
///
/// Fails fast: a missing credential field or, with TLS enabled, a missing
/// certificate file is a startup error, not something to paper over.
pub fn prepare(
    spec: &ServiceSpec,
    credential: &SecretRecord,
    cert_dir: &Path,
) -> Result<RuntimeConfig, AdapterError> {
    let mut env = BTreeMap::new();
    for (field, var) in spec.family.env_mapping() {
        let value = credential
            .get(field)
            .ok_or_else(|| AdapterError::MissingField {
                service: spec.name.clone(),
                field: field.to_string(),
            })?;
        env.insert(var.to_string(), value.to_string());
    }

    // tls_enabled was written at bootstrap; its absence means the record
    // predates this scheme and must be repaired before the service starts.
    let flag = credential
        .get("tls_enabled")
        .ok_or_else(|| AdapterError::MissingField {
            service: spec.name.clone(),
            field: "tls_enabled".to_string(),
        })?;
    let tls_enabled = match flag {
        "true" | "1" => true,
        "false" | "0" => false,
        other => {
            return Err(AdapterError::InvalidTlsFlag {
                service: spec.name.clone(),
                value: other.to_string(),
            })
        }
    };

    let tls = if tls_enabled {
        match spec.family.cert_layout() {
            Some(layout) => {
                let service_dir = cert_dir.join(&spec.name);
                for file in layout.files() {
                    let path = service_dir.join(file);
                    if !readable(&path) {
                        return Err(AdapterError::MissingCertificateFile {
                            service: spec.name.clone(),
                            path,
                        });
                    }
                }
                Some(TlsSettings {
                    cert_path: service_dir.join(layout.cert_file),
                    key_path: layout.key_file.map(|k| service_dir.join(k)),
                    ca_path: service_dir.join(layout.ca_file),
                })
            }
            // TLS delegated to a proxy layer
            None => {
                debug!(service = %spec.name, "tls handled outside this service");
                None
            }
        }
    } else {
        None
    };

    info!(service = %spec.name, tls = tls.is_some(), "runtime config prepared");
    Ok(RuntimeConfig {
        service: spec.name.clone(),
        env,
        tls,
    })
}

fn readable(path: &Path) -> bool {
    fs::File::open(path).is_ok() && path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::ServiceFamily;
    use std::collections::BTreeMap;

    fn record(pairs: &[(&str, &str)]) -> SecretRecord {
        let fields: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SecretRecord { fields }
    }

    fn write_layout(dir: &Path, service: &str, family: ServiceFamily) {
        let service_dir = dir.join(service);
        fs::create_dir_all(&service_dir).unwrap();
        for file in family.cert_layout().unwrap().files() {
            fs::write(service_dir.join(file), "-----BEGIN TEST-----\n").unwrap();
        }
    }

    #[test]
    fn prepare_maps_fields_into_env() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ServiceSpec::new("postgres", ServiceFamily::RelationalA);
        write_layout(tmp.path(), "postgres", ServiceFamily::RelationalA);
        let cred = record(&[
            ("user", "devuser"),
            ("password", "pw"),
            ("database", "devdb"),
            ("tls_enabled", "true"),
        ]);

        let config = prepare(&spec, &cred, tmp.path()).unwrap();
        assert_eq!(config.env["POSTGRES_USER"], "devuser");
        assert_eq!(config.env["POSTGRES_DB"], "devdb");
        let tls = config.tls.expect("tls settings");
        assert!(tls.key_path.is_some());
    }

    #[test]
    fn missing_field_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ServiceSpec::new("rabbitmq", ServiceFamily::Broker);
        let cred = record(&[("user", "admin"), ("password", "pw"), ("tls_enabled", "false")]);

        let err = prepare(&spec, &cred, tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::MissingField { ref field, .. } if field == "vhost"
        ));
    }

    #[test]
    fn absent_tls_flag_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ServiceSpec::new("redis-1", ServiceFamily::CacheCluster);
        let cred = record(&[("password", "pw")]);

        let err = prepare(&spec, &cred, tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::MissingField { ref field, .. } if field == "tls_enabled"
        ));
    }

    #[test]
    fn tls_with_missing_file_refuses_to_start() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ServiceSpec::new("mysql", ServiceFamily::RelationalB);
        write_layout(tmp.path(), "mysql", ServiceFamily::RelationalB);
        // Remove the key so the layout is incomplete
        fs::remove_file(tmp.path().join("mysql/server-key.pem")).unwrap();
        let cred = record(&[
            ("user", "u"),
            ("password", "p"),
            ("database", "d"),
            ("root_password", "r"),
            ("tls_enabled", "true"),
        ]);

        let err = prepare(&spec, &cred, tmp.path()).unwrap_err();
        assert!(matches!(err, AdapterError::MissingCertificateFile { .. }));
    }

    #[test]
    fn tls_disabled_skips_file_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ServiceSpec::new("mongodb", ServiceFamily::Document);
        let cred = record(&[
            ("user", "u"),
            ("password", "p"),
            ("database", "d"),
            ("tls_enabled", "false"),
        ]);

        let config = prepare(&spec, &cred, tmp.path()).unwrap();
        assert!(config.tls.is_none());
    }

    #[test]
    fn delegated_family_never_requires_files() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = ServiceSpec::new("forgejo", ServiceFamily::GitHost).derived_from("postgres");
        let cred = record(&[
            ("user", "u"),
            ("password", "p"),
            ("database", "d"),
            ("tls_enabled", "true"),
        ]);

        let config = prepare(&spec, &cred, tmp.path()).unwrap();
        assert!(config.tls.is_none());
    }
}
