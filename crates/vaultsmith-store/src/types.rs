//! Wire shapes for the store's v1 HTTP API

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Liveness/seal status reported by `GET /v1/sys/health`
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default = "default_sealed")]
    pub sealed: bool,
    #[serde(default)]
    pub standby: bool,
    #[serde(default)]
    pub version: String,
}

fn default_sealed() -> bool {
    true
}

impl HealthStatus {
    /// The store can serve requests: initialized and unsealed.
    pub fn is_ready(&self) -> bool {
        self.initialized && !self.sealed
    }
}

/// Short-lived client token returned by an AppRole login
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    /// Lease duration in seconds (~1h for service AppRoles)
    pub ttl: u64,
    pub policies: Vec<String>,
}

/// One versioned KV v2 record: flat string fields keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl SecretRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Declarative issuance role, upserted via `POST /v1/{mount}/roles/{name}`
#[derive(Debug, Clone, Serialize)]
pub struct RoleDefinition {
    pub allowed_domains: Vec<String>,
    pub allow_subdomains: bool,
    pub allow_ip_sans: bool,
    pub allow_localhost: bool,
    pub key_type: String,
    pub key_bits: u32,
    pub max_ttl: String,
    pub server_flag: bool,
    pub client_flag: bool,
}

impl Default for RoleDefinition {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            allow_subdomains: true,
            allow_ip_sans: true,
            allow_localhost: true,
            key_type: "rsa".to_string(),
            key_bits: 2048,
            max_ttl: "2160h".to_string(),
            server_flag: true,
            client_flag: true,
        }
    }
}

/// Parameters for `POST /v1/{mount}/issue/{role}`
#[derive(Debug, Clone, Serialize)]
pub struct IssueRequest {
    pub common_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_names: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_sans: Option<String>,
    pub ttl: String,
}

/// Certificate bundle returned by an issue call
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedBundle {
    pub certificate: String,
    pub private_key: String,
    #[serde(default)]
    pub ca_chain: Vec<String>,
    #[serde(default)]
    pub issuing_ca: String,
    /// Unix timestamp of notAfter, when the store reports it
    #[serde(default)]
    pub expiration: i64,
}
