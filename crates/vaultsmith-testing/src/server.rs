//! The fake store's HTTP surface

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rcgen::{Certificate, KeyPair};
use serde_json::{json, Map, Value};
use time::{Duration, OffsetDateTime};

use crate::pki::TestPki;

const ROOT_TOKEN: &str = "root-token";

#[derive(Default)]
struct AppRole {
    role_id: String,
    secret_ids: Vec<String>,
    policies: Vec<String>,
    token_ttl: u64,
}

/// Signing state of the two PKI mounts
#[derive(Default)]
struct PkiState {
    root: Option<(Certificate, KeyPair)>,
    /// Keypair created by intermediate/generate/internal, waiting for
    /// sign-intermediate
    pending_int_key: Option<(String, KeyPair)>,
    /// Certificate produced by sign-intermediate, waiting for set-signed
    pending_signed: Option<(Certificate, KeyPair)>,
    int_signed: Option<(Certificate, KeyPair)>,
}

#[derive(Default)]
struct StoreState {
    sealed: bool,
    mounts: BTreeMap<String, String>,
    auth_mounts: BTreeMap<String, String>,
    kv: BTreeMap<String, Map<String, Value>>,
    policies: BTreeMap<String, String>,
    approles: BTreeMap<String, AppRole>,
    issued_tokens: BTreeMap<String, Vec<String>>,
    pki: PkiState,
    roles: BTreeMap<String, Value>,
    fail_issue: HashSet<String>,
    root_generations: u32,
}

type Shared = Arc<Mutex<StoreState>>;

/// Handle to a spawned fake store
pub struct FakeStore {
    addr: String,
    state: Shared,
    task: tokio::task::JoinHandle<()>,
}

impl FakeStore {
    /// Bind an ephemeral port and serve the fake API until dropped.
    pub async fn spawn() -> Self {
        let state: Shared = Arc::new(Mutex::new(StoreState::default()));
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake store");
        let addr = format!("http://{}", listener.local_addr().expect("local addr"));
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, state, task }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn root_token(&self) -> &str {
        ROOT_TOKEN
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("fake store state")
    }

    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    pub fn unseal(&self) {
        self.lock().sealed = false;
    }

    /// Make issuance under one role fail with HTTP 500, for batch
    /// isolation tests.
    pub fn fail_issuance_for(&self, role: &str) {
        self.lock().fail_issue.insert(role.to_string());
    }

    pub fn clear_issuance_failures(&self) {
        self.lock().fail_issue.clear();
    }

    /// Raw KV record as the store holds it.
    pub fn kv_record(&self, name: &str) -> Option<Map<String, Value>> {
        self.lock().kv.get(name).cloned()
    }

    pub fn role_definition(&self, name: &str) -> Option<Value> {
        self.lock().roles.get(name).cloned()
    }

    pub fn policy(&self, name: &str) -> Option<String> {
        self.lock().policies.get(name).cloned()
    }

    /// How many times a root CA was generated; idempotent bootstrap must
    /// leave this at 1.
    pub fn root_generations(&self) -> u32 {
        self.lock().root_generations
    }
}

impl Drop for FakeStore {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/v1/sys/health", get(health))
        .route("/v1/sys/mounts", get(list_mounts))
        .route("/v1/sys/mounts/{path}", post(enable_mount))
        .route("/v1/sys/auth", get(list_auth))
        .route("/v1/sys/auth/{path}", post(enable_auth))
        .route("/v1/sys/policies/acl/{name}", put(write_policy))
        .route("/v1/secret/data/{name}", get(read_kv).post(write_kv))
        .route("/v1/auth/approle/login", post(approle_login))
        .route("/v1/auth/approle/role/{name}", post(upsert_approle))
        .route("/v1/auth/approle/role/{name}/role-id", get(read_role_id))
        .route("/v1/auth/approle/role/{name}/secret-id", post(gen_secret_id))
        .route("/v1/{mount}/ca/pem", get(ca_pem))
        .route("/v1/pki/root/generate/internal", post(generate_root))
        .route("/v1/{mount}/config/urls", post(config_urls))
        .route(
            "/v1/pki_int/intermediate/generate/internal",
            post(generate_int_csr),
        )
        .route("/v1/pki/root/sign-intermediate", post(sign_intermediate))
        .route("/v1/pki_int/intermediate/set-signed", post(set_signed))
        .route("/v1/pki_int/roles/{role}", post(upsert_role))
        .route("/v1/pki_int/issue/{role}", post(issue))
        .with_state(state)
}

fn errors(status: StatusCode, msg: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "errors": [msg] })))
}

fn authed(state: &StoreState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    let token = headers
        .get("X-Vault-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if token == ROOT_TOKEN || state.issued_tokens.contains_key(token) {
        Ok(())
    } else {
        Err(errors(StatusCode::FORBIDDEN, "permission denied"))
    }
}

async fn health(State(state): State<Shared>) -> impl IntoResponse {
    let state = state.lock().unwrap();
    let status = if state.sealed {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(json!({
            "initialized": true,
            "sealed": state.sealed,
            "standby": false,
            "version": "fake",
        })),
    )
}

async fn list_mounts(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let state = state.lock().unwrap();
    authed(&state, &headers)?;
    let data: Map<String, Value> = state
        .mounts
        .iter()
        .map(|(path, t)| (format!("{path}/"), json!({ "type": t })))
        .collect();
    Ok(Json(json!({ "data": data })))
}

async fn enable_mount(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    let engine = body
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("kv")
        .to_string();
    if state.mounts.contains_key(&path) {
        return Err(errors(
            StatusCode::BAD_REQUEST,
            "path is already in use",
        ));
    }
    state.mounts.insert(path, engine);
    Ok(StatusCode::NO_CONTENT)
}

async fn list_auth(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let state = state.lock().unwrap();
    authed(&state, &headers)?;
    let data: Map<String, Value> = state
        .auth_mounts
        .iter()
        .map(|(path, t)| (format!("{path}/"), json!({ "type": t })))
        .collect();
    Ok(Json(json!({ "data": data })))
}

async fn enable_auth(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    let method = body
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("approle")
        .to_string();
    state.auth_mounts.insert(path, method);
    Ok(StatusCode::NO_CONTENT)
}

async fn write_policy(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    let policy = body
        .get("policy")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    state.policies.insert(name, policy);
    Ok(StatusCode::NO_CONTENT)
}

async fn read_kv(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let state = state.lock().unwrap();
    authed(&state, &headers)?;
    match state.kv.get(&name) {
        Some(data) => Ok(Json(json!({
            "data": { "data": data, "metadata": { "version": 1 } }
        }))),
        None => Err(errors(StatusCode::NOT_FOUND, "secret not found")),
    }
}

async fn write_kv(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    let data = body
        .get("data")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| errors(StatusCode::BAD_REQUEST, "missing data"))?;
    state.kv.insert(name, data);
    Ok(Json(json!({ "data": { "version": 1 } })))
}

async fn approle_login(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    let role_id = body.get("role_id").and_then(Value::as_str).unwrap_or("");
    let secret_id = body.get("secret_id").and_then(Value::as_str).unwrap_or("");
    let matched = state.approles.values().find_map(|role| {
        (role.role_id == role_id && role.secret_ids.iter().any(|s| s == secret_id))
            .then(|| (role.policies.clone(), role.token_ttl))
    });
    match matched {
        Some((policies, ttl)) => {
            let token = random_id("s.");
            state.issued_tokens.insert(token.clone(), policies.clone());
            Ok(Json(json!({
                "auth": {
                    "client_token": token,
                    "lease_duration": ttl,
                    "token_policies": policies,
                }
            })))
        }
        None => Err(errors(StatusCode::BAD_REQUEST, "invalid role or secret ID")),
    }
}

async fn upsert_approle(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    let policies = body
        .get("token_policies")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let token_ttl = parse_ttl_secs(body.get("token_ttl").and_then(Value::as_str).unwrap_or("1h"));
    let entry = state.approles.entry(name).or_insert_with(|| AppRole {
        role_id: random_id(""),
        ..AppRole::default()
    });
    entry.policies = policies;
    entry.token_ttl = token_ttl;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_role_id(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let state = state.lock().unwrap();
    authed(&state, &headers)?;
    match state.approles.get(&name) {
        Some(role) => Ok(Json(json!({ "data": { "role_id": role.role_id } }))),
        None => Err(errors(StatusCode::NOT_FOUND, "role not found")),
    }
}

async fn gen_secret_id(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    let secret_id = random_id("sid-");
    match state.approles.get_mut(&name) {
        Some(role) => {
            role.secret_ids.push(secret_id.clone());
            Ok(Json(json!({ "data": { "secret_id": secret_id } })))
        }
        None => Err(errors(StatusCode::NOT_FOUND, "role not found")),
    }
}

async fn ca_pem(
    State(state): State<Shared>,
    Path(mount): Path<String>,
) -> Result<String, StatusCode> {
    let state = state.lock().unwrap();
    let pem = match mount.as_str() {
        "pki" => state.pki.root.as_ref().map(|(cert, _)| cert.pem()),
        "pki_int" => state.pki.int_signed.as_ref().map(|(cert, _)| cert.pem()),
        _ => None,
    };
    pem.ok_or(StatusCode::NOT_FOUND)
}

async fn generate_root(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    if state.pki.root.is_some() {
        // The bootstrapper must never reach this: it probes ca/pem first.
        return Err(errors(StatusCode::BAD_REQUEST, "root CA already exists"));
    }
    let cn = body
        .get("common_name")
        .and_then(Value::as_str)
        .unwrap_or("Root CA");
    let key = KeyPair::generate().expect("root key");
    let cert = ca_cert_params(cn, 3650).self_signed(&key).expect("root cert");
    let pem = cert.pem();
    state.pki.root = Some((cert, key));
    state.root_generations += 1;
    Ok(Json(json!({ "data": { "certificate": pem } })))
}

async fn config_urls(
    State(state): State<Shared>,
    Path(_mount): Path<String>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let state = state.lock().unwrap();
    authed(&state, &headers)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn generate_int_csr(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    let cn = body
        .get("common_name")
        .and_then(Value::as_str)
        .unwrap_or("Intermediate CA")
        .to_string();
    let key = KeyPair::generate().expect("intermediate key");
    // rcgen refuses to serialize CA params into a CSR (UnsupportedInCsr);
    // the CSR body is opaque to callers (sign_intermediate ignores it), so
    // serialize plain params with just the CN.
    let csr = {
        let mut params = rcgen::CertificateParams::new(Vec::new()).expect("csr params");
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, &cn);
        params.serialize_request(&key).expect("csr")
    }
    .pem()
    .expect("csr pem");
    state.pki.pending_int_key = Some((cn, key));
    Ok(Json(json!({ "data": { "csr": csr } })))
}

async fn sign_intermediate(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    let (cn, int_key) = match state.pki.pending_int_key.take() {
        Some(pending) => pending,
        None => return Err(errors(StatusCode::BAD_REQUEST, "no pending CSR")),
    };
    let signed = {
        let (root_cert, root_key) = state
            .pki
            .root
            .as_ref()
            .ok_or_else(|| errors(StatusCode::BAD_REQUEST, "no root CA"))?;
        ca_cert_params(&cn, 1825)
            .signed_by(&int_key, root_cert, root_key)
            .expect("signed intermediate")
    };
    let pem = signed.pem();
    // Hold the signed cert until set-signed installs it on pki_int
    state.pki.pending_signed = Some((signed, int_key));
    Ok(Json(json!({ "data": { "certificate": pem } })))
}

async fn set_signed(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    let certificate = body
        .get("certificate")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let (cert, key) = match state.pki.pending_signed.take() {
        Some(pending) => pending,
        None => return Err(errors(StatusCode::BAD_REQUEST, "nothing to install")),
    };
    if certificate.trim() != cert.pem().trim() {
        return Err(errors(StatusCode::BAD_REQUEST, "certificate mismatch"));
    }
    state.pki.int_signed = Some((cert, key));
    Ok(StatusCode::NO_CONTENT)
}

async fn upsert_role(
    State(state): State<Shared>,
    Path(role): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let mut state = state.lock().unwrap();
    authed(&state, &headers)?;
    state.roles.insert(role, body);
    Ok(StatusCode::NO_CONTENT)
}

async fn issue(
    State(state): State<Shared>,
    Path(role): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let state = state.lock().unwrap();
    authed(&state, &headers)?;
    if state.fail_issue.contains(&role) {
        return Err(errors(
            StatusCode::INTERNAL_SERVER_ERROR,
            "issuance backend failure",
        ));
    }
    if !state.roles.contains_key(&role) {
        return Err(errors(StatusCode::NOT_FOUND, "unknown role"));
    }
    let (int_cert, int_key) = state
        .pki
        .int_signed
        .as_ref()
        .ok_or_else(|| errors(StatusCode::BAD_REQUEST, "intermediate not configured"))?;
    let (root_pem, int_pem) = (
        state.pki.root.as_ref().map(|(c, _)| c.pem()).unwrap_or_default(),
        int_cert.pem(),
    );

    let cn = body
        .get("common_name")
        .and_then(Value::as_str)
        .unwrap_or("localhost");
    let mut sans: Vec<String> = body
        .get("alt_names")
        .and_then(Value::as_str)
        .map(|s| s.split(',').map(|x| x.trim().to_string()).collect())
        .unwrap_or_default();
    if !sans.contains(&cn.to_string()) {
        sans.push(cn.to_string());
    }
    let ttl_hours = parse_ttl_secs(body.get("ttl").and_then(Value::as_str).unwrap_or("2160h")) / 3600;

    let leaf_key = KeyPair::generate().expect("leaf key");
    let mut params = rcgen::CertificateParams::new(sans).expect("leaf params");
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, cn);
    params.not_before = OffsetDateTime::now_utc() - Duration::hours(1);
    params.not_after = OffsetDateTime::now_utc() + Duration::hours(ttl_hours as i64);
    let expiration = params.not_after.unix_timestamp();
    let leaf = params
        .signed_by(&leaf_key, int_cert, int_key)
        .expect("leaf cert");

    Ok(Json(json!({
        "data": {
            "certificate": leaf.pem(),
            "private_key": leaf_key.serialize_pem(),
            "ca_chain": [int_pem, root_pem],
            "issuing_ca": int_cert.pem(),
            "expiration": expiration,
        }
    })))
}

fn ca_cert_params(common_name: &str, days: i64) -> rcgen::CertificateParams {
    let mut params = rcgen::CertificateParams::new(Vec::new()).expect("ca params");
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
    params.not_after = OffsetDateTime::now_utc() + Duration::days(days);
    params
}

fn parse_ttl_secs(ttl: &str) -> u64 {
    let ttl = ttl.trim();
    if let Some(hours) = ttl.strip_suffix('h') {
        hours.parse::<u64>().unwrap_or(1) * 3600
    } else if let Some(days) = ttl.strip_suffix('d') {
        days.parse::<u64>().unwrap_or(1) * 86400
    } else {
        ttl.parse::<u64>().unwrap_or(3600)
    }
}

fn random_id(prefix: &str) -> String {
    use rand::Rng;
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("{prefix}{suffix}")
}
