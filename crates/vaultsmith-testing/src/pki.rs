//! A tiny working PKI for tests

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
};
use time::{Duration, OffsetDateTime};

/// Root + intermediate hierarchy with signing keys held in memory
pub struct TestPki {
    pub root_cert: Certificate,
    pub root_key: KeyPair,
    pub int_cert: Certificate,
    pub int_key: KeyPair,
}

impl TestPki {
    pub fn new() -> Self {
        let root_key = KeyPair::generate().expect("root key");
        let mut root_params = ca_params("Test Root CA", 3650);
        root_params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
        let root_cert = root_params.self_signed(&root_key).expect("root cert");

        let int_key = KeyPair::generate().expect("intermediate key");
        let int_cert = ca_params("Test Intermediate CA", 1825)
            .signed_by(&int_key, &root_cert, &root_key)
            .expect("intermediate cert");

        Self {
            root_cert,
            root_key,
            int_cert,
            int_key,
        }
    }

    /// Issue a leaf under the intermediate, expiring `days` from now.
    /// Returns (cert_pem, key_pem).
    pub fn issue_leaf(&self, common_name: &str, sans: &[String], days: i64) -> (String, String) {
        let key = KeyPair::generate().expect("leaf key");
        let mut params = CertificateParams::new(sans.to_vec()).expect("leaf params");
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.not_before = OffsetDateTime::now_utc() - Duration::hours(1);
        params.not_after = OffsetDateTime::now_utc() + Duration::days(days);
        let cert = params
            .signed_by(&key, &self.int_cert, &self.int_key)
            .expect("leaf cert");
        (cert.pem(), key.serialize_pem())
    }
}

impl Default for TestPki {
    fn default() -> Self {
        Self::new()
    }
}

fn ca_params(common_name: &str, days: i64) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::new()).expect("ca params");
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
    params.not_after = OffsetDateTime::now_utc() + Duration::days(days);
    params
}

/// Standalone leaf (plus its CA) expiring `days` from now, for expiry
/// evaluation tests that never touch a store.
/// Returns (cert_pem, key_pem, ca_pem).
pub fn mint_leaf_expiring_in(common_name: &str, days: i64) -> (String, String, String) {
    let pki = TestPki::new();
    let (cert, key) = pki.issue_leaf(common_name, &["localhost".to_string()], days);
    (cert, key, pki.int_cert.pem())
}
