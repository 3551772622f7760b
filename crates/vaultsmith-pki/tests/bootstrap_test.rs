//! End-to-end bootstrap tests against the in-process fake store

use std::time::Duration;

use vaultsmith_pki::{BootstrapConfig, PkiBootstrapper};
use vaultsmith_store::{RetryPolicy, SecretStoreClient, StoreConfig};
use vaultsmith_testing::FakeStore;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        interval: Duration::from_millis(10),
    }
}

fn client_for(store: &FakeStore) -> SecretStoreClient {
    SecretStoreClient::new(
        StoreConfig::new(store.addr()).with_token(store.root_token()),
    )
    .unwrap()
}

fn config(tmp: &tempfile::TempDir) -> BootstrapConfig {
    let mut config = BootstrapConfig::new(
        tmp.path().join("ca"),
        tmp.path().join("approles"),
    );
    config.retry = fast_retry();
    config
}

#[tokio::test]
async fn bootstrap_populates_the_hierarchy() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let bootstrapper = PkiBootstrapper::new(client_for(&store), config(&tmp));

    let report = bootstrapper.bootstrap().await.unwrap();
    assert!(report.created() > 0);

    // Both CA tiers exist and the chain was exported
    let client = client_for(&store);
    let root = client.ca_pem("pki").await.unwrap().expect("root CA");
    let intermediate = client.ca_pem("pki_int").await.unwrap().expect("intermediate CA");
    assert!(root.contains("BEGIN CERTIFICATE"));
    assert_ne!(root, intermediate);

    let chain = std::fs::read_to_string(tmp.path().join("ca/ca-chain.pem")).unwrap();
    assert_eq!(chain.trim(), intermediate.trim());
    let full = std::fs::read_to_string(tmp.path().join("ca/full-chain.pem")).unwrap();
    assert!(full.contains(intermediate.trim()));
    assert!(full.contains(root.trim()));

    // Roles, policies, and credentials per declared service
    assert!(store.role_definition("postgres").is_some());
    assert!(store.policy("rabbitmq").unwrap().contains("secret/data/rabbitmq"));
    assert!(store.kv_record("mysql").is_some());

    // AppRole identity files for every service
    for service in ["postgres", "mysql", "mongodb", "redis-1", "rabbitmq", "forgejo"] {
        let dir = tmp.path().join("approles").join(service);
        assert!(dir.join("role-id").is_file(), "{service} role-id");
        assert!(dir.join("secret-id").is_file(), "{service} secret-id");
    }
}

#[tokio::test]
async fn rerunning_bootstrap_changes_nothing() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let bootstrapper = PkiBootstrapper::new(client_for(&store), config(&tmp));

    bootstrapper.bootstrap().await.unwrap();
    let client = client_for(&store);
    let root_before = client.ca_pem("pki").await.unwrap().unwrap();
    let postgres_before = store.kv_record("postgres").unwrap();
    let role_before = store.role_definition("postgres").unwrap();

    let second = bootstrapper.bootstrap().await.unwrap();
    assert!(second.is_noop(), "second run must be a no-op: {second:?}");

    // Same CA, same credential values, same role definition
    assert_eq!(store.root_generations(), 1);
    assert_eq!(client.ca_pem("pki").await.unwrap().unwrap(), root_before);
    assert_eq!(store.kv_record("postgres").unwrap(), postgres_before);
    assert_eq!(store.role_definition("postgres").unwrap(), role_before);
}

#[tokio::test]
async fn cache_cluster_members_share_one_password() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let bootstrapper = PkiBootstrapper::new(client_for(&store), config(&tmp));

    bootstrapper.bootstrap().await.unwrap();

    let first = store.kv_record("redis-1").unwrap();
    let second = store.kv_record("redis-2").unwrap();
    let third = store.kv_record("redis-3").unwrap();
    assert_eq!(first["password"], second["password"]);
    assert_eq!(first["password"], third["password"]);
}

#[tokio::test]
async fn git_host_credential_derives_from_relational_db() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let bootstrapper = PkiBootstrapper::new(client_for(&store), config(&tmp));

    bootstrapper.bootstrap().await.unwrap();

    let postgres = store.kv_record("postgres").unwrap();
    let forgejo = store.kv_record("forgejo").unwrap();
    assert_eq!(postgres["password"], forgejo["password"]);
    assert_eq!(postgres["user"], forgejo["user"]);
    assert_eq!(forgejo["tls_enabled"], "false");
}

#[tokio::test]
async fn existing_credentials_gain_missing_fields_only() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();

    // Simulate a record created before tls_enabled existed
    let client = client_for(&store);
    client
        .enable_mount("secret", "kv", Some(serde_json::json!({"version": "2"})))
        .await
        .unwrap();
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("user".to_string(), "legacy_user".to_string());
    fields.insert("password".to_string(), "legacy_pw".to_string());
    fields.insert("database".to_string(), "legacy_db".to_string());
    client
        .write_secret(
            "postgres",
            &vaultsmith_store::SecretRecord { fields },
        )
        .await
        .unwrap();

    let bootstrapper = PkiBootstrapper::new(client_for(&store), config(&tmp));
    bootstrapper.bootstrap().await.unwrap();

    let repaired = store.kv_record("postgres").unwrap();
    assert_eq!(repaired["user"], "legacy_user");
    assert_eq!(repaired["password"], "legacy_pw");
    assert_eq!(repaired["tls_enabled"], "true");
}

#[tokio::test]
async fn sealed_store_fails_with_unavailable() {
    let store = FakeStore::spawn().await;
    store.seal();
    let tmp = tempfile::tempdir().unwrap();
    let bootstrapper = PkiBootstrapper::new(client_for(&store), config(&tmp));

    let err = bootstrapper.bootstrap().await.unwrap_err();
    assert!(matches!(
        err,
        vaultsmith_pki::BootstrapError::StoreUnavailable { attempts: 3, .. }
    ));
}
