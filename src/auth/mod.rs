//! Credential issuance and refresh rotation.
//!
//! Provides:
//! - HMAC-SHA512 signed access/refresh artifacts (`signer`)
//! - Salted, iterated digests of refresh artifacts for storage (`digest`)
//! - The issue/refresh flow with single-use rotation and address-change
//!   alerts (`authenticator`)
//!
//! Raw refresh artifacts are never persisted or logged; the store only ever
//! sees their digest.

pub mod authenticator;
pub mod digest;
pub mod error;
pub mod signer;

pub use authenticator::{Authenticator, RotationPolicy};
pub use error::{AuthError, InvalidArtifact};
pub use signer::{HmacSigner, ParsedArtifact, Signer, TokenPair};
