//! Certificate expiry parsing

use std::path::Path;

use thiserror::Error;
use x509_parser::pem::parse_x509_pem;

/// Unreadable/unparsable certificates are not fatal: the caller treats
/// them as "needs generation".
#[derive(Debug, Error)]
pub enum ExpiryError {
    #[error("certificate unreadable at {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// notAfter of the first certificate in a PEM file, as a unix timestamp.
pub fn not_after_timestamp(path: &Path) -> Result<i64, ExpiryError> {
    let bytes = std::fs::read(path).map_err(|e| ExpiryError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    not_after_from_pem(&bytes).map_err(|reason| ExpiryError::Unreadable {
        path: path.display().to_string(),
        reason,
    })
}

fn not_after_from_pem(bytes: &[u8]) -> Result<i64, String> {
    let (_, pem) = parse_x509_pem(bytes).map_err(|e| e.to_string())?;
    let cert = pem.parse_x509().map_err(|e| e.to_string())?;
    Ok(cert.validity().not_after.timestamp())
}

/// Whole days until `not_after`, negative once expired.
pub fn days_remaining(not_after: i64, now: i64) -> i64 {
    (not_after - now) / 86_400
}
