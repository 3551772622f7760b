//! Atomic file materialization
//!
//! Certificate directories are shared between the renewal writer and
//! every service's startup reader, so writes go to a temp sibling and
//! are atomically renamed into place; a reader can never observe a
//! half-written certificate.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::family::CertLayout;

/// Key files are private to the service user; certs are world-readable.
pub const MODE_PRIVATE: u32 = 0o600;
pub const MODE_PUBLIC: u32 = 0o644;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `contents` to `path` atomically with the given unix mode.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed");
    let tmp = parent.join(format!(
        ".{file_name}.tmp.{}.{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&tmp, contents)?;
    set_mode(&tmp, mode)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), mode = format!("{mode:o}"), "wrote file atomically");
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Materialize an issued certificate into a family's layout under
/// `service_dir`: cert and CA chain world-readable, keys private, the
/// document store's combined form concatenating cert + key.
pub fn materialize_layout(
    layout: &CertLayout,
    service_dir: &Path,
    cert_pem: &str,
    key_pem: &str,
    ca_chain_pem: &str,
) -> io::Result<()> {
    fs::create_dir_all(service_dir)?;
    match layout.key_file {
        Some(key_file) => {
            write_atomic(
                &service_dir.join(layout.cert_file),
                cert_pem.as_bytes(),
                MODE_PUBLIC,
            )?;
            write_atomic(
                &service_dir.join(key_file),
                key_pem.as_bytes(),
                MODE_PRIVATE,
            )?;
        }
        None => {
            // Combined bundle carries the private key, so it gets the
            // private mode even though it also holds the cert
            let combined = format!("{}\n{}", cert_pem.trim_end(), key_pem.trim_end());
            write_atomic(
                &service_dir.join(layout.cert_file),
                combined.as_bytes(),
                MODE_PRIVATE,
            )?;
        }
    }
    write_atomic(
        &service_dir.join(layout.ca_file),
        ca_chain_pem.as_bytes(),
        MODE_PUBLIC,
    )?;
    Ok(())
}
