//! Service families and their declarative shapes

use serde::{Deserialize, Serialize};

/// Certificate file layout inside a service's certificate directory.
///
/// `key_file = None` means the service wants a combined cert+key PEM in
/// `cert_file` (the document store's format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertLayout {
    pub cert_file: &'static str,
    pub key_file: Option<&'static str>,
    pub ca_file: &'static str,
}

impl CertLayout {
    /// Every file a reader must find before enabling TLS.
    pub fn files(&self) -> Vec<&'static str> {
        let mut files = vec![self.cert_file];
        if let Some(key) = self.key_file {
            files.push(key);
        }
        files.push(self.ca_file);
        files
    }

    pub fn combined(&self) -> bool {
        self.key_file.is_none()
    }
}

/// The six service families the stack knows how to bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFamily {
    /// Relational DB (A): single port, encrypted + unencrypted
    RelationalA,
    /// Relational DB (B): like A plus a separate root password
    RelationalB,
    /// Document store: combined cert+key, prefer-TLS
    Document,
    /// In-memory cache cluster: shared password, separate TLS port
    CacheCluster,
    /// Message broker: vhost credential, separate TLS port
    Broker,
    /// Git hosting: credential derived from the relational DB, TLS
    /// delegated to a proxy layer
    GitHost,
}

impl ServiceFamily {
    /// Credential fields this family requires in its secret record.
    /// `tls_enabled` is mandatory for every family and checked separately.
    pub fn credential_fields(&self) -> &'static [&'static str] {
        match self {
            ServiceFamily::RelationalA => &["user", "password", "database"],
            ServiceFamily::RelationalB => &["user", "password", "database", "root_password"],
            ServiceFamily::Document => &["user", "password", "database"],
            ServiceFamily::CacheCluster => &["password"],
            ServiceFamily::Broker => &["user", "password", "vhost"],
            ServiceFamily::GitHost => &["user", "password", "database"],
        }
    }

    /// Certificate layout, or None when TLS is delegated elsewhere.
    pub fn cert_layout(&self) -> Option<CertLayout> {
        match self {
            ServiceFamily::RelationalA => Some(CertLayout {
                cert_file: "server.crt",
                key_file: Some("server.key"),
                ca_file: "ca.crt",
            }),
            ServiceFamily::RelationalB => Some(CertLayout {
                cert_file: "server-cert.pem",
                key_file: Some("server-key.pem"),
                ca_file: "ca.pem",
            }),
            ServiceFamily::Document => Some(CertLayout {
                cert_file: "combined.pem",
                key_file: None,
                ca_file: "ca.crt",
            }),
            ServiceFamily::CacheCluster => Some(CertLayout {
                cert_file: "redis.crt",
                key_file: Some("redis.key"),
                ca_file: "ca.crt",
            }),
            ServiceFamily::Broker => Some(CertLayout {
                cert_file: "server_certificate.pem",
                key_file: Some("server_key.pem"),
                ca_file: "ca_certificate.pem",
            }),
            ServiceFamily::GitHost => None,
        }
    }

    /// Environment mapping: (credential field, env var) pairs handed to
    /// the launcher.
    pub fn env_mapping(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ServiceFamily::RelationalA => &[
                ("user", "POSTGRES_USER"),
                ("password", "POSTGRES_PASSWORD"),
                ("database", "POSTGRES_DB"),
            ],
            ServiceFamily::RelationalB => &[
                ("user", "MYSQL_USER"),
                ("password", "MYSQL_PASSWORD"),
                ("database", "MYSQL_DATABASE"),
                ("root_password", "MYSQL_ROOT_PASSWORD"),
            ],
            ServiceFamily::Document => &[
                ("user", "MONGO_INITDB_ROOT_USERNAME"),
                ("password", "MONGO_INITDB_ROOT_PASSWORD"),
                ("database", "MONGO_INITDB_DATABASE"),
            ],
            ServiceFamily::CacheCluster => &[("password", "REDIS_PASSWORD")],
            ServiceFamily::Broker => &[
                ("user", "RABBITMQ_DEFAULT_USER"),
                ("password", "RABBITMQ_DEFAULT_PASS"),
                ("vhost", "RABBITMQ_DEFAULT_VHOST"),
            ],
            ServiceFamily::GitHost => &[
                ("user", "FORGEJO__database__USER"),
                ("password", "FORGEJO__database__PASSWD"),
                ("database", "FORGEJO__database__NAME"),
            ],
        }
    }
}
