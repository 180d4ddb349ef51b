//! Signed credential artifacts.
//!
//! Artifacts use the compact JWT layout
//! `b64url(header).b64url(claims).b64url(tag)` with an HMAC-SHA512 tag, so
//! any HS512-aware JWT library can inspect them. Claims:
//! - `sub`: identity
//! - `ip`: network address observed at mint time
//! - `exp` / `nbf`: validity window, unix seconds
//! - `jti`: random per-artifact id

use super::error::InvalidArtifact;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Algorithm name written to (and required in) the artifact header.
const ALG: &str = "HS512";

/// Artifact type written to the header.
const TYP: &str = "JWT";

/// An access artifact and a refresh artifact minted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Claims recovered from an artifact that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifact {
    pub identity: String,
    pub origin_address: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies tamper-evident credential artifacts.
pub trait Signer: Send + Sync {
    /// Mint one artifact. Fails only when the signing backend does.
    fn mint(&self, identity: &str, origin_address: &str, expires_at: DateTime<Utc>)
        -> Result<String>;

    /// Verify structure, tag and validity window against the current time.
    fn verify(&self, artifact: &str) -> std::result::Result<ParsedArtifact, InvalidArtifact>;

    /// Mint an access/refresh pair sharing identity and origin address.
    fn mint_pair(
        &self,
        identity: &str,
        origin_address: &str,
        access_expiry: DateTime<Utc>,
        refresh_expiry: DateTime<Utc>,
    ) -> Result<TokenPair> {
        let access = self
            .mint(identity, origin_address, access_expiry)
            .context("mint access artifact")?;
        let refresh = self
            .mint(identity, origin_address, refresh_expiry)
            .context("mint refresh artifact")?;
        Ok(TokenPair { access, refresh })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactClaims {
    sub: String,
    ip: String,
    exp: i64,
    nbf: i64,
    jti: String,
}

/// HMAC-SHA512 signer keyed by the process-wide signing secret.
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    /// Shortest signing key accepted (256 bits).
    pub const MIN_KEY_BYTES: usize = 32;

    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.len() < Self::MIN_KEY_BYTES {
            bail!(
                "Signing key too short: {} bytes (need at least {})",
                key.len(),
                Self::MIN_KEY_BYTES
            );
        }
        Ok(Self { key })
    }

    fn mac(&self) -> Result<HmacSha512> {
        HmacSha512::new_from_slice(&self.key).map_err(|e| anyhow::anyhow!("HMAC init failed: {e}"))
    }

    /// Mint with an explicit issue instant (becomes `nbf`).
    pub fn mint_at(
        &self,
        identity: &str,
        origin_address: &str,
        expires_at: DateTime<Utc>,
        issued_at: DateTime<Utc>,
    ) -> Result<String> {
        let header = ArtifactHeader {
            alg: ALG.into(),
            typ: TYP.into(),
        };
        let claims = ArtifactClaims {
            sub: identity.to_owned(),
            ip: origin_address.to_owned(),
            exp: expires_at.timestamp(),
            nbf: issued_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{tag}"))
    }

    /// Verify against an explicit instant. Valid iff `nbf <= now < exp`.
    pub fn verify_at(
        &self,
        artifact: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<ParsedArtifact, InvalidArtifact> {
        let mut segments = artifact.split('.');
        let (Some(header_b64), Some(claims_b64), Some(tag_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(InvalidArtifact);
        };

        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| InvalidArtifact)?;
        let mut mac = self.mac().map_err(|_| InvalidArtifact)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&tag).map_err(|_| InvalidArtifact)?;

        let header: ArtifactHeader = decode_segment(header_b64)?;
        if header.alg != ALG {
            return Err(InvalidArtifact);
        }

        let claims: ArtifactClaims = decode_segment(claims_b64)?;
        let now_secs = now.timestamp();
        if now_secs < claims.nbf || now_secs >= claims.exp {
            return Err(InvalidArtifact);
        }
        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(InvalidArtifact)?;

        Ok(ParsedArtifact {
            identity: claims.sub,
            origin_address: claims.ip,
            expires_at,
        })
    }
}

impl Signer for HmacSigner {
    fn mint(
        &self,
        identity: &str,
        origin_address: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        self.mint_at(identity, origin_address, expires_at, Utc::now())
    }

    fn verify(&self, artifact: &str) -> std::result::Result<ParsedArtifact, InvalidArtifact> {
        self.verify_at(artifact, Utc::now())
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> std::result::Result<T, InvalidArtifact> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| InvalidArtifact)?;
    serde_json::from_slice(&bytes).map_err(|_| InvalidArtifact)
}
