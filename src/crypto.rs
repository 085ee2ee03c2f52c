// src/crypto.rs
use std::fmt::Write;

use ring::digest;

/// Digest a plaintext password into a lowercase hex SHA-256 string.
///
/// Demo-grade on purpose: no salt, no key stretching, and verification is a
/// plain string comparison of stored vs. freshly computed digests. For
/// production use proper password hashing (bcrypt/argon2).
pub fn hash_password(password: &str) -> String {
    let digest = digest::digest(&digest::SHA256, password.as_bytes());
    let mut hex = String::with_capacity(digest.as_ref().len() * 2);
    for byte in digest.as_ref() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
