//! Renewal engine tests against the in-process fake store

use std::time::Duration;

use chrono::Utc;
use vaultsmith_lifecycle::{
    CertificateLifecycleManager, CheckStatus, LifecycleConfig, RenewalAction, RenewalError,
    RenewalPlan, Thresholds,
};
use vaultsmith_pki::{BootstrapConfig, PkiBootstrapper};
use vaultsmith_store::{RetryPolicy, SecretStoreClient, StoreConfig};
use vaultsmith_testing::{mint_leaf_expiring_in, FakeStore};

fn client_for(store: &FakeStore) -> SecretStoreClient {
    SecretStoreClient::new(StoreConfig::new(store.addr()).with_token(store.root_token())).unwrap()
}

/// Bootstrap the hierarchy so issuance roles exist, then hand back a
/// manager pointed at a scratch certificate root.
async fn bootstrapped_manager(
    store: &FakeStore,
    tmp: &tempfile::TempDir,
) -> CertificateLifecycleManager {
    let mut config = BootstrapConfig::new(tmp.path().join("ca"), tmp.path().join("approles"));
    config.retry = RetryPolicy {
        max_attempts: 3,
        interval: Duration::from_millis(10),
    };
    PkiBootstrapper::new(client_for(store), config)
        .bootstrap()
        .await
        .unwrap();
    let mut config = LifecycleConfig::new(tmp.path().join("certs"));
    config.retry = RetryPolicy {
        max_attempts: 50,
        interval: Duration::from_millis(10),
    };
    CertificateLifecycleManager::new(client_for(store), config)
}

#[tokio::test]
async fn missing_certificates_are_generated_with_the_family_layout() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;

    let outcome = manager.run(&RenewalPlan::default()).await.unwrap();
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.renewed.contains(&"postgres".to_string()));
    assert!(outcome.renewed.contains(&"redis-3".to_string()));
    // The git host has no layout of its own
    assert!(!outcome.renewed.contains(&"forgejo".to_string()));

    let pg = tmp.path().join("certs/postgres");
    for file in ["server.crt", "server.key", "ca.crt"] {
        assert!(pg.join(file).is_file(), "missing {file}");
    }
    // MongoDB gets a combined cert+key bundle instead of a split pair
    let mongo = tmp.path().join("certs/mongodb");
    assert!(mongo.join("combined.pem").is_file());
    let combined = std::fs::read_to_string(mongo.join("combined.pem")).unwrap();
    assert!(combined.contains("BEGIN CERTIFICATE"));
    assert!(combined.contains("PRIVATE KEY"));

    let chain = std::fs::read_to_string(pg.join("ca.crt")).unwrap();
    assert!(chain.matches("BEGIN CERTIFICATE").count() >= 2);
}

#[cfg(unix)]
#[tokio::test]
async fn private_keys_are_unreadable_to_others() {
    use std::os::unix::fs::PermissionsExt;

    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;
    manager.run(&RenewalPlan::default()).await.unwrap();

    let key = tmp.path().join("certs/postgres/server.key");
    let mode = std::fs::metadata(&key).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
    let cert = tmp.path().join("certs/postgres/server.crt");
    let mode = std::fs::metadata(&cert).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o644);
}

#[tokio::test]
async fn fresh_certificates_are_left_alone_until_forced() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;

    manager.run(&RenewalPlan::default()).await.unwrap();
    let first = std::fs::read_to_string(tmp.path().join("certs/mysql/server-cert.pem")).unwrap();

    // Second run: everything is ~90 days out, nothing to do
    let outcome = manager.run(&RenewalPlan::default()).await.unwrap();
    assert!(outcome.renewed.is_empty());
    assert!(!outcome.skipped.is_empty());
    assert_eq!(outcome.exit_code(), 0);
    let unchanged = std::fs::read_to_string(tmp.path().join("certs/mysql/server-cert.pem")).unwrap();
    assert_eq!(first, unchanged);

    // Force reissues even a fresh certificate
    let outcome = manager
        .run(&RenewalPlan {
            force: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(outcome.renewed.contains(&"mysql".to_string()));
    let reissued = std::fs::read_to_string(tmp.path().join("certs/mysql/server-cert.pem")).unwrap();
    assert_ne!(first, reissued);
}

#[tokio::test]
async fn near_expiry_certificates_are_renewed() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;

    // Plant a 10-day certificate where the renewal engine looks
    let dir = tmp.path().join("certs/postgres");
    std::fs::create_dir_all(&dir).unwrap();
    let (cert, key, ca) = mint_leaf_expiring_in("postgres.localhost", 10);
    std::fs::write(dir.join("server.crt"), &cert).unwrap();
    std::fs::write(dir.join("server.key"), &key).unwrap();
    std::fs::write(dir.join("ca.crt"), &ca).unwrap();

    let outcome = manager
        .run(&RenewalPlan {
            service: Some("postgres".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(outcome.renewed, vec!["postgres".to_string()]);
    let decision = &outcome.decisions[0];
    assert_eq!(decision.action, RenewalAction::Renew);
    let days = decision.days_remaining.unwrap();
    assert!((8..=10).contains(&days), "planted cert reads {days} days");

    let renewed = std::fs::read_to_string(dir.join("server.crt")).unwrap();
    assert_ne!(cert, renewed);
}

#[tokio::test]
async fn one_failure_does_not_stop_the_batch() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;
    store.fail_issuance_for("mysql");

    let outcome = manager.run(&RenewalPlan::default()).await.unwrap();
    assert!(outcome.renewed.contains(&"postgres".to_string()));
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, "mysql");
    assert_eq!(outcome.exit_code(), 2);
    assert!(!tmp.path().join("certs/mysql").exists());

    let decision = outcome
        .decisions
        .iter()
        .find(|d| d.service_name == "mysql")
        .unwrap();
    assert_eq!(decision.action, RenewalAction::Fail);
}

#[tokio::test]
async fn total_failure_exits_hard() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;
    store.fail_issuance_for("rabbitmq");

    let outcome = manager
        .run(&RenewalPlan {
            service: Some("rabbitmq".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(outcome.renewed.is_empty());
    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn dry_run_reports_without_touching_disk() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;

    let outcome = manager
        .run(&RenewalPlan {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(outcome.renewed.is_empty());
    assert!(outcome.failed.is_empty());
    assert!(outcome
        .decisions
        .iter()
        .any(|d| d.action == RenewalAction::Generate));
    assert!(!tmp.path().join("certs/postgres").exists());
}

#[tokio::test]
async fn renew_waits_out_a_sealed_window() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;
    store.seal();

    let plan = RenewalPlan {
        service: Some("postgres".to_string()),
        ..Default::default()
    };
    let run = manager.run(&plan);
    let unsealer = async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.unseal();
        Ok::<(), RenewalError>(())
    };
    let (outcome, ()) = tokio::try_join!(run, unsealer).unwrap();
    assert_eq!(outcome.renewed, vec!["postgres".to_string()]);
}

#[tokio::test]
async fn sealed_store_fails_the_batch_as_unavailable() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let _ = bootstrapped_manager(&store, &tmp).await;
    store.seal();

    let mut config = LifecycleConfig::new(tmp.path().join("certs"));
    config.retry = RetryPolicy {
        max_attempts: 3,
        interval: Duration::from_millis(10),
    };
    let manager = CertificateLifecycleManager::new(client_for(&store), config);

    let err = manager.run(&RenewalPlan::default()).await.unwrap_err();
    assert!(matches!(
        err,
        RenewalError::StoreUnavailable { attempts: 3, .. }
    ));
    // Nothing was issued or written before the poll gave up
    assert!(!tmp.path().join("certs").exists());
}

#[tokio::test]
async fn renewals_and_failures_land_in_the_audit_log() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;
    store.fail_issuance_for("mysql");

    manager.run(&RenewalPlan::default()).await.unwrap();

    let log = std::fs::read_to_string(tmp.path().join("certs/renewal.log")).unwrap();
    assert!(log.lines().any(|l| l.contains("renewed service=postgres")));
    assert!(log.lines().any(|l| l.contains("failed service=mysql")));
    // Every line opens with an RFC 3339 timestamp
    assert!(log.lines().all(|l| l.starts_with("20")));

    // A second run appends rather than truncates
    store.clear_issuance_failures();
    manager
        .run(&RenewalPlan {
            service: Some("mysql".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let longer = std::fs::read_to_string(tmp.path().join("certs/renewal.log")).unwrap();
    assert!(longer.len() > log.len());
    assert!(longer.contains("renewed service=mysql"));
}

#[tokio::test]
async fn expiration_checks_land_in_their_own_log() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;

    manager
        .check(Thresholds::default(), None, Utc::now().timestamp())
        .unwrap();

    let log = std::fs::read_to_string(tmp.path().join("certs/check.log")).unwrap();
    assert!(log.lines().any(|l| l.contains("checked entries=")));
    assert!(log.lines().all(|l| l.starts_with("20")));
}

#[tokio::test]
async fn unknown_service_is_rejected() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;

    let err = manager
        .run(&RenewalPlan {
            service: Some("etcd".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("etcd"));
}

#[tokio::test]
async fn check_classifies_planted_and_missing_certificates() {
    let store = FakeStore::spawn().await;
    let tmp = tempfile::tempdir().unwrap();
    let manager = bootstrapped_manager(&store, &tmp).await;

    let dir = tmp.path().join("certs/postgres");
    std::fs::create_dir_all(&dir).unwrap();
    let (cert, _, _) = mint_leaf_expiring_in("postgres.localhost", 5);
    std::fs::write(dir.join("server.crt"), cert).unwrap();

    let report = manager
        .check(Thresholds::default(), None, Utc::now().timestamp())
        .unwrap();
    let postgres = report
        .entries
        .iter()
        .find(|e| e.service == "postgres")
        .unwrap();
    assert_eq!(postgres.status, CheckStatus::Critical);
    let mysql = report
        .entries
        .iter()
        .find(|e| e.service == "mysql")
        .unwrap();
    assert_eq!(mysql.status, CheckStatus::Missing);
    assert_eq!(report.nagios_exit_code(), 2);
}
