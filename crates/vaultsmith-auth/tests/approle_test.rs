//! AppRole startup-sequence tests against the in-process fake store

use std::time::Duration;

use vaultsmith_auth::{AuthError, ServiceAuthenticator};
use vaultsmith_pki::{BootstrapConfig, PkiBootstrapper};
use vaultsmith_store::{RetryPolicy, SecretStoreClient, StoreConfig};
use vaultsmith_testing::FakeStore;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        interval: Duration::from_millis(10),
    }
}

fn root_client(store: &FakeStore) -> SecretStoreClient {
    SecretStoreClient::new(StoreConfig::new(store.addr()).with_token(store.root_token())).unwrap()
}

fn anon_client(store: &FakeStore) -> SecretStoreClient {
    SecretStoreClient::new(StoreConfig::new(store.addr())).unwrap()
}

async fn bootstrap(store: &FakeStore, tmp: &tempfile::TempDir) {
    let mut config = BootstrapConfig::new(tmp.path().join("ca"), tmp.path().join("approles"));
    config.retry = fast_retry();
    PkiBootstrapper::new(root_client(store), config)
        .bootstrap()
        .await
        .unwrap();
}

#[tokio::test]
async fn identity_files_exchange_for_a_scoped_token() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    bootstrap(&store, &tmp).await;

    let auth = ServiceAuthenticator::new(anon_client(&store));
    let token = auth
        .authenticate(&tmp.path().join("approles/postgres"))
        .await
        .unwrap();
    assert!(!token.token.is_empty());
    assert!(token.policies.contains(&"postgres".to_string()));

    // The minted token can read its own service's credential
    let client = anon_client(&store).with_token(&token.token);
    let record = client.read_secret("postgres").await.unwrap();
    assert!(record.get("password").is_some());
}

#[tokio::test]
async fn tampered_secret_id_is_rejected() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    bootstrap(&store, &tmp).await;

    let dir = tmp.path().join("approles/mysql");
    std::fs::write(dir.join("secret-id"), "counterfeit").unwrap();

    let auth = ServiceAuthenticator::new(anon_client(&store));
    let err = auth.authenticate(&dir).await.unwrap_err();
    assert!(matches!(err, AuthError::AuthRejected));
}

#[tokio::test]
async fn missing_identity_files_fail_without_a_network_call() {
    let tmp = tempfile::tempdir().unwrap();
    // Deliberately unreachable address; the file check must come first
    let client =
        SecretStoreClient::new(StoreConfig::new("http://127.0.0.1:1")).unwrap();
    let auth = ServiceAuthenticator::new(client);
    let err = auth.authenticate(tmp.path()).await.unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials { .. }));
}

#[tokio::test]
async fn empty_identity_file_counts_as_missing() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    bootstrap(&store, &tmp).await;

    let dir = tmp.path().join("approles/rabbitmq");
    std::fs::write(dir.join("role-id"), "\n").unwrap();

    let auth = ServiceAuthenticator::new(anon_client(&store));
    let err = auth.authenticate(&dir).await.unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials { .. }));
}

#[tokio::test]
async fn sealed_store_exhausts_the_readiness_poll() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    bootstrap(&store, &tmp).await;
    store.seal();

    let auth = ServiceAuthenticator::new(anon_client(&store));
    let err = auth
        .authenticate_when_ready(&tmp.path().join("approles/postgres"), fast_retry())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::StoreUnavailable(_)));
}

#[tokio::test]
async fn readiness_poll_rides_out_a_sealed_window() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    bootstrap(&store, &tmp).await;
    store.seal();

    let auth = ServiceAuthenticator::new(anon_client(&store));
    let approle_dir = tmp.path().join("approles/postgres");
    let login = auth.authenticate_when_ready(
        &approle_dir,
        RetryPolicy {
            max_attempts: 50,
            interval: Duration::from_millis(10),
        },
    );
    let unsealer = async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.unseal();
        Ok::<(), AuthError>(())
    };
    let (token, ()) = tokio::try_join!(login, unsealer).unwrap();
    assert!(!token.token.is_empty());
}
