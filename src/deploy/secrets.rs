//! Random credentials for generated databases.
//!
//! Values come from the operating system's CSPRNG and are never logged. The
//! caller owns persisting them before any container that uses them starts.

use rand::RngCore;
use rand::rngs::OsRng;

use crate::types::DbCredentials;

/// Minimum entropy of a generated password, in bytes.
pub const PASSWORD_BYTES: usize = 16;

/// Returns `bytes` random bytes, hex-encoded.
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes.max(PASSWORD_BYTES)];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn generate_password() -> String {
    random_hex(PASSWORD_BYTES)
}

/// Fresh root and application-user passwords for a database the site owns.
pub fn generate_db_credentials() -> DbCredentials {
    DbCredentials {
        root: generate_password(),
        user: generate_password(),
    }
}
