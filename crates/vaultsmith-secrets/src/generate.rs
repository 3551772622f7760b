//! Random credential material

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Default password length for generated service credentials
pub const DEFAULT_PASSWORD_LEN: usize = 32;

/// Generate an alphanumeric password.
///
/// Alphanumeric only: these values end up in connection strings, env
/// files, and shell-adjacent config, where symbol characters cause
/// quoting trouble.
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
