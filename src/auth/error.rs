//! Error kinds surfaced by the authenticator.
//!
//! The boundary layer maps each variant to a response; nothing below it
//! matches on error strings.

use thiserror::Error;

/// Failure of an `issue` or `refresh` call.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity has no row in the user store.
    #[error("no such user")]
    NoSuchIdentity,

    /// The presented refresh artifact is malformed, forged, expired or not
    /// yet valid. Deliberately uniform across those cases.
    #[error("invalid refresh token")]
    InvalidRefresh,

    /// The artifact verifies but is not the currently active refresh
    /// artifact for its identity (already rotated out).
    #[error("wrong refresh token")]
    WrongRefresh,

    /// The digest update affected no row. Transient from the caller's view.
    #[error("could not persist rotated refresh digest")]
    RotationPersistFailed,

    /// Any unclassified failure from the signer, store or hashing backend.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable code for clients and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchIdentity => "NO_SUCH_IDENTITY",
            Self::InvalidRefresh => "INVALID_REFRESH",
            Self::WrongRefresh => "WRONG_REFRESH",
            Self::RotationPersistFailed => "ROTATION_PERSIST_FAILED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RotationPersistFailed | Self::Internal(_))
    }
}

/// Returned by [`crate::auth::Signer::verify`] for every verification
/// failure, so callers cannot tell a bad tag from an expired artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid artifact")]
pub struct InvalidArtifact;
