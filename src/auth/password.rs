use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use sha2::Sha256;
use tracing::error;

use crate::config::PasswordScheme;

type HmacSha256 = Hmac<Sha256>;

const ARGON2_PREFIX: &str = "$argon2";

pub fn hash_password(plain: &str, scheme: PasswordScheme) -> anyhow::Result<String> {
    match scheme {
        PasswordScheme::Argon2 => hash_argon2(plain),
        PasswordScheme::LegacyHmac => legacy_hmac_hex(plain),
    }
}

pub fn hash_argon2(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// HMAC-SHA256 keyed by the plaintext over an empty message, hex encoded.
///
/// Deterministic and unsalted: rows written by the legacy service carry this
/// digest, so it stays available for them and nothing else.
pub fn legacy_hmac_hex(plain: &str) -> anyhow::Result<String> {
    let mac = legacy_mac(plain)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn legacy_mac(plain: &str) -> anyhow::Result<HmacSha256> {
    HmacSha256::new_from_slice(plain.as_bytes()).map_err(|e| {
        error!(error = %e, "hmac key init error");
        anyhow::anyhow!(e.to_string())
    })
}

/// Checks `plain` against a stored hash of either scheme.
pub fn verify_password(plain: &str, stored: &str) -> anyhow::Result<bool> {
    if stored.starts_with(ARGON2_PREFIX) {
        let parsed = PasswordHash::new(stored).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        return Ok(Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok());
    }

    let expected = hex::decode(stored).map_err(|e| {
        error!(error = %e, "stored password hash is neither argon2 nor hex");
        anyhow::anyhow!("malformed password hash: {e}")
    })?;
    Ok(legacy_mac(plain)?.verify_slice(&expected).is_ok())
}
