//! Async client for the store's v1 HTTP API
//!
//! Every call blocks (awaits) synchronously and carries the configured
//! request timeout; callers that need readiness gating wrap `health()` in
//! [`crate::retry::wait_until`].

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::types::{AccessToken, HealthStatus, IssueRequest, IssuedBundle, RoleDefinition, SecretRecord};

/// Store connection settings, passed explicitly to each component
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base address, e.g. `http://localhost:8200`
    pub addr: String,
    /// Token sent as `X-Vault-Token`; absent for unauthenticated calls
    /// (health, AppRole login)
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Store client errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("authentication rejected by the store")]
    AuthRejected,

    #[error("no secret at {path}")]
    SecretNotFound { path: String },

    #[error("secret at {path} has no usable field '{field}'")]
    InvalidSecretShape { path: String, field: String },

    #[error("store returned {status} for {path}: {message}")]
    Http {
        status: u16,
        path: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Typed HTTP client for the secret/PKI store
#[derive(Debug, Clone)]
pub struct SecretStoreClient {
    http: reqwest::Client,
    config: StoreConfig,
}

impl SecretStoreClient {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    /// A copy of this client authenticated with a different token.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        let mut config = self.config.clone();
        config.token = Some(token.into());
        Self {
            http: self.http.clone(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.addr.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, self.url(path));
        if let Some(token) = &self.config.token {
            req = req.header("X-Vault-Token", token);
        }
        req
    }

    async fn get_json(&self, path: &str) -> Result<Value, StoreError> {
        let resp = self.request(reqwest::Method::GET, path).send().await?;
        Self::expect_success(path, resp).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, StoreError> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        Self::expect_success(path, resp).await
    }

    async fn expect_success(path: &str, resp: reqwest::Response) -> Result<Value, StoreError> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::SecretNotFound {
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| {
                    v.get("errors").and_then(|e| {
                        e.as_array()
                            .map(|a| a.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("; "))
                    })
                })
                .unwrap_or_default();
            return Err(StoreError::Http {
                status: status.as_u16(),
                path: path.to_string(),
                message,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        // Some write endpoints return an empty body with 200
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Http {
            status: status.as_u16(),
            path: path.to_string(),
            message: format!("unparsable response body: {e}"),
        })
    }

    // --- health ---

    /// `GET /v1/sys/health`; accepts the store's non-200 informational
    /// status codes (standby, sealed) as long as a body comes back.
    pub async fn health(&self) -> Result<HealthStatus, StoreError> {
        let resp = self
            .request(reqwest::Method::GET, "sys/health")
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let status: HealthStatus = resp
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(status)
    }

    /// Health probe that only succeeds when the store can serve requests.
    pub async fn ready(&self) -> Result<HealthStatus, StoreError> {
        let health = self.health().await?;
        if health.is_ready() {
            Ok(health)
        } else {
            Err(StoreError::Unavailable(format!(
                "store not ready (initialized={}, sealed={})",
                health.initialized, health.sealed
            )))
        }
    }

    // --- auth ---

    /// `POST /v1/auth/approle/login` exchanging role/secret identifiers
    /// for a short-lived client token.
    #[instrument(skip_all)]
    pub async fn approle_login(
        &self,
        role_id: &str,
        secret_id: &str,
    ) -> Result<AccessToken, StoreError> {
        let resp = self
            .request(reqwest::Method::POST, "auth/approle/login")
            .json(&json!({ "role_id": role_id, "secret_id": secret_id }))
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::FORBIDDEN {
            return Err(StoreError::AuthRejected);
        }
        let body = Self::expect_success("auth/approle/login", resp).await?;
        let auth = body.get("auth").ok_or(StoreError::AuthRejected)?;
        let token = auth
            .get("client_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or(StoreError::AuthRejected)?;
        let ttl = auth
            .get("lease_duration")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let policies = auth
            .get("token_policies")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(AccessToken {
            token: token.to_string(),
            ttl,
            policies,
        })
    }

    // --- mounts ---

    /// Whether a secrets engine is mounted at `path/`.
    pub async fn mount_exists(&self, path: &str) -> Result<bool, StoreError> {
        let mounts = self.get_json("sys/mounts").await?;
        Ok(Self::listing_contains(&mounts, path))
    }

    /// Mount a secrets engine; skip-if-present is the caller's job via
    /// [`Self::mount_exists`].
    pub async fn enable_mount(
        &self,
        path: &str,
        engine_type: &str,
        options: Option<Value>,
    ) -> Result<(), StoreError> {
        let mut body = json!({ "type": engine_type });
        if let Some(options) = options {
            body["options"] = options;
        }
        debug!(path, engine_type, "enabling secrets engine");
        self.post_json(&format!("sys/mounts/{path}"), &body).await?;
        Ok(())
    }

    /// Whether an auth method is enabled at `path/`.
    pub async fn auth_exists(&self, path: &str) -> Result<bool, StoreError> {
        let auths = self.get_json("sys/auth").await?;
        Ok(Self::listing_contains(&auths, path))
    }

    pub async fn enable_auth(&self, path: &str, method_type: &str) -> Result<(), StoreError> {
        debug!(path, method_type, "enabling auth method");
        self.post_json(&format!("sys/auth/{path}"), &json!({ "type": method_type }))
            .await?;
        Ok(())
    }

    // Listings nest entries under "data" but also mirror them at the top
    // level; accept either.
    fn listing_contains(listing: &Value, path: &str) -> bool {
        let key = format!("{}/", path.trim_end_matches('/'));
        listing
            .get("data")
            .map(|d| d.get(&key).is_some())
            .unwrap_or(false)
            || listing.get(&key).is_some()
    }

    // --- KV v2 ---

    /// Read a versioned KV record at `secret/data/{name}`.
    pub async fn read_secret(&self, name: &str) -> Result<SecretRecord, StoreError> {
        let path = format!("secret/data/{name}");
        let body = self.get_json(&path).await?;
        let data = body
            .get("data")
            .and_then(|d| d.get("data"))
            .ok_or_else(|| StoreError::InvalidSecretShape {
                path: path.clone(),
                field: "data".to_string(),
            })?;
        let raw: BTreeMap<String, Value> =
            serde_json::from_value(data.clone()).map_err(|_| StoreError::InvalidSecretShape {
                path: path.clone(),
                field: "data".to_string(),
            })?;
        let mut fields = BTreeMap::new();
        for (key, value) in raw {
            match value {
                Value::String(s) => {
                    fields.insert(key, s);
                }
                other => {
                    // Null or structured fields mean the record was written
                    // by something else; surface it rather than coercing.
                    if other.is_null() {
                        return Err(StoreError::InvalidSecretShape { path, field: key });
                    }
                    fields.insert(key, other.to_string());
                }
            }
        }
        Ok(SecretRecord { fields })
    }

    /// Write a full KV record at `secret/data/{name}`.
    pub async fn write_secret(&self, name: &str, record: &SecretRecord) -> Result<(), StoreError> {
        let path = format!("secret/data/{name}");
        self.post_json(&path, &json!({ "data": record.fields })).await?;
        Ok(())
    }

    // --- PKI ---

    /// The mount's current CA certificate, or None when no CA exists yet.
    pub async fn ca_pem(&self, mount: &str) -> Result<Option<String>, StoreError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("{mount}/ca/pem"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let pem = resp.text().await?;
        if pem.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(pem))
        }
    }

    /// `POST /v1/{mount}/root/generate/internal`: self-signed root, key
    /// pair held inside the store.
    pub async fn generate_root(
        &self,
        mount: &str,
        common_name: &str,
        ttl: &str,
        key_type: &str,
        key_bits: u32,
    ) -> Result<String, StoreError> {
        let path = format!("{mount}/root/generate/internal");
        let body = self
            .post_json(
                &path,
                &json!({
                    "common_name": common_name,
                    "ttl": ttl,
                    "key_type": key_type,
                    "key_bits": key_bits,
                }),
            )
            .await?;
        Self::data_str(&body, &path, "certificate")
    }

    /// Configure issuing-certificate / CRL URLs on a PKI mount.
    pub async fn configure_urls(&self, mount: &str, base_addr: &str) -> Result<(), StoreError> {
        self.post_json(
            &format!("{mount}/config/urls"),
            &json!({
                "issuing_certificates": format!("{base_addr}/v1/{mount}/ca"),
                "crl_distribution_points": format!("{base_addr}/v1/{mount}/crl"),
            }),
        )
        .await?;
        Ok(())
    }

    /// `POST /v1/{mount}/intermediate/generate/internal`: CSR for the
    /// intermediate, private key held inside the store.
    pub async fn generate_intermediate_csr(
        &self,
        mount: &str,
        common_name: &str,
        key_type: &str,
        key_bits: u32,
    ) -> Result<String, StoreError> {
        let path = format!("{mount}/intermediate/generate/internal");
        let body = self
            .post_json(
                &path,
                &json!({
                    "common_name": common_name,
                    "key_type": key_type,
                    "key_bits": key_bits,
                }),
            )
            .await?;
        Self::data_str(&body, &path, "csr")
    }

    /// `POST /v1/{root_mount}/root/sign-intermediate`.
    pub async fn sign_intermediate(
        &self,
        root_mount: &str,
        csr: &str,
        ttl: &str,
    ) -> Result<String, StoreError> {
        let path = format!("{root_mount}/root/sign-intermediate");
        let body = self
            .post_json(
                &path,
                &json!({ "csr": csr, "ttl": ttl, "format": "pem_bundle" }),
            )
            .await?;
        Self::data_str(&body, &path, "certificate")
    }

    /// `POST /v1/{mount}/intermediate/set-signed`.
    pub async fn set_signed_intermediate(
        &self,
        mount: &str,
        certificate: &str,
    ) -> Result<(), StoreError> {
        self.post_json(
            &format!("{mount}/intermediate/set-signed"),
            &json!({ "certificate": certificate }),
        )
        .await?;
        Ok(())
    }

    /// Declarative role upsert; always safe to overwrite.
    pub async fn upsert_role(
        &self,
        mount: &str,
        name: &str,
        role: &RoleDefinition,
    ) -> Result<(), StoreError> {
        self.post_json(&format!("{mount}/roles/{name}"), role).await?;
        Ok(())
    }

    /// Issue a leaf certificate under a role.
    pub async fn issue_certificate(
        &self,
        mount: &str,
        role: &str,
        request: &IssueRequest,
    ) -> Result<IssuedBundle, StoreError> {
        let path = format!("{mount}/issue/{role}");
        let body = self.post_json(&path, request).await?;
        let data = body.get("data").ok_or_else(|| StoreError::InvalidSecretShape {
            path: path.clone(),
            field: "data".to_string(),
        })?;
        serde_json::from_value(data.clone()).map_err(|_| StoreError::InvalidSecretShape {
            path,
            field: "certificate".to_string(),
        })
    }

    // --- policies ---

    /// `PUT /v1/sys/policies/acl/{name}`.
    pub async fn write_policy(&self, name: &str, policy: &str) -> Result<(), StoreError> {
        let path = format!("sys/policies/acl/{name}");
        let resp = self
            .request(reqwest::Method::PUT, &path)
            .json(&json!({ "policy": policy }))
            .send()
            .await?;
        Self::expect_success(&path, resp).await?;
        Ok(())
    }

    // --- AppRole management (bootstrap-time) ---

    /// Upsert an AppRole bound to a policy, with a bounded token TTL.
    pub async fn upsert_approle(
        &self,
        name: &str,
        policies: &[String],
        token_ttl: &str,
    ) -> Result<(), StoreError> {
        self.post_json(
            &format!("auth/approle/role/{name}"),
            &json!({ "token_policies": policies, "token_ttl": token_ttl }),
        )
        .await?;
        Ok(())
    }

    pub async fn read_role_id(&self, name: &str) -> Result<String, StoreError> {
        let path = format!("auth/approle/role/{name}/role-id");
        let body = self.get_json(&path).await?;
        Self::data_str(&body, &path, "role_id")
    }

    pub async fn generate_secret_id(&self, name: &str) -> Result<String, StoreError> {
        let path = format!("auth/approle/role/{name}/secret-id");
        let body = self.post_json(&path, &json!({})).await?;
        Self::data_str(&body, &path, "secret_id")
    }

    fn data_str(body: &Value, path: &str, field: &str) -> Result<String, StoreError> {
        body.get("data")
            .and_then(|d| d.get(field))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidSecretShape {
                path: path.to_string(),
                field: field.to_string(),
            })
    }
}
