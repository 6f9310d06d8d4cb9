//! Secret generation

use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Digits, lowercase and uppercase ASCII letters
pub const SECRET_ALPHABET: &[u8; 62] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const SALT_LEN: usize = 12;

/// Random secret of `length` characters drawn from [`SECRET_ALPHABET`]
pub fn generate_secret(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| SECRET_ALPHABET[rng.gen_range(0..SECRET_ALPHABET.len())] as char)
        .collect()
}

/// Salted hash in the notebook server's `algorithm:salt:digest` form
pub fn hash_app_secret(secret: &str) -> String {
    let mut salt = [0u8; SALT_LEN / 2];
    OsRng.fill(&mut salt[..]);
    hash_with_salt(secret, &hex::encode(salt))
}

fn hash_with_salt(secret: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(salt.as_bytes());
    format!("sha256:{}:{}", salt, hex::encode(hasher.finalize()))
}

/// Check a secret against a hash produced by [`hash_app_secret`]
pub fn verify_app_secret(hashed: &str, secret: &str) -> bool {
    let mut parts = hashed.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("sha256"), Some(salt), Some(_)) => hash_with_salt(secret, salt) == hashed,
        _ => false,
    }
}
