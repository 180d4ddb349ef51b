//! Rotation-secret digests.
//!
//! The raw refresh artifact is pre-hashed with SHA-256 (bounding the input
//! of the slow hash) and the 32-byte pre-hash is stretched with salted
//! PBKDF2-HMAC-SHA256. The result is stored as a PHC string, which carries
//! its own salt and round count so the work factor can be raised later
//! without invalidating existing digests.

use anyhow::Result;
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Algorithm, Params, Pbkdf2};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Default PBKDF2 round count for new digests.
pub const DEFAULT_DIGEST_ROUNDS: u32 = 100_000;

/// Salt byte length before base64 encoding.
const SALT_BYTES: usize = 16;

/// Derived key length in bytes.
const OUTPUT_BYTES: usize = 32;

/// Fixed-size pre-hash of a raw artifact.
pub fn prehash(raw_artifact: &str) -> [u8; 32] {
    Sha256::digest(raw_artifact.as_bytes()).into()
}

/// Compute the storable digest of a raw refresh artifact.
pub fn digest_refresh(raw_artifact: &str, rounds: u32) -> Result<String> {
    let mut salt_bytes = [0u8; SALT_BYTES];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| anyhow::anyhow!("Salt encoding failed: {e}"))?;

    let params = Params {
        rounds,
        output_length: OUTPUT_BYTES,
    };
    let hash = Pbkdf2
        .hash_password_customized(
            &prehash(raw_artifact),
            Some(Algorithm::Pbkdf2Sha256.ident()),
            None,
            params,
            &salt,
        )
        .map_err(|e| anyhow::anyhow!("Digest computation failed: {e}"))?;

    Ok(hash.to_string())
}

/// Check a raw artifact against a stored digest.
///
/// The final comparison is constant-time. An unparseable stored digest is
/// reported as an error, not as a mismatch.
pub fn matches_refresh(raw_artifact: &str, stored_digest: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_digest)
        .map_err(|e| anyhow::anyhow!("Stored digest is not a valid PHC string: {e}"))?;
    match Pbkdf2.verify_password(&prehash(raw_artifact), &parsed) {
        Ok(()) => Ok(true),
        Err(pbkdf2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Digest verification failed: {e}")),
    }
}
