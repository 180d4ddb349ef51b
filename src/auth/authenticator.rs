//! Credential issuance and single-use refresh rotation.
//!
//! Per identity the store holds at most one rotation digest. `issue`
//! overwrites it unconditionally; `refresh` replaces it only if it still
//! equals the digest that was just verified, so of two concurrent refreshes
//! presenting the same artifact at most one can win.

use super::digest;
use super::error::AuthError;
use super::signer::{Signer, TokenPair};
use crate::config::RotationConfig;
use crate::notify::Notifier;
use crate::store::UserStore;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// TTLs, hashing work factor and per-call deadline. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub digest_rounds: u32,
    pub call_timeout: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::from_config(&RotationConfig::default())
    }
}

impl RotationPolicy {
    pub fn from_config(config: &RotationConfig) -> Self {
        Self {
            access_ttl: Duration::from_secs(config.access_ttl_secs),
            refresh_ttl: Duration::from_secs(config.refresh_ttl_secs),
            digest_rounds: config.digest_rounds,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }
}

pub struct Authenticator {
    store: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    signer: Arc<dyn Signer>,
    policy: RotationPolicy,
}

impl Authenticator {
    pub fn new(
        store: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
        signer: Arc<dyn Signer>,
        policy: RotationPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            signer,
            policy,
        }
    }

    /// Mint a fresh pair for `identity` and make its refresh artifact the
    /// only valid one.
    pub async fn issue(
        &self,
        identity: &str,
        origin_address: &str,
    ) -> Result<TokenPair, AuthError> {
        let exists = self
            .bounded("store exists", self.store.exists(identity))
            .await?;
        if !exists {
            return Err(AuthError::NoSuchIdentity);
        }

        let (pair, new_digest) = self.mint_and_digest(identity, origin_address).await?;

        let persisted = self
            .bounded(
                "store update_rotation_digest",
                self.store.update_rotation_digest(identity, &new_digest, None),
            )
            .await?;
        if !persisted {
            return Err(AuthError::RotationPersistFailed);
        }

        tracing::info!(identity = identity, "Issued credential pair");
        Ok(pair)
    }

    /// Exchange the active refresh artifact for a fresh pair.
    pub async fn refresh(
        &self,
        raw_refresh: &str,
        origin_address: &str,
    ) -> Result<TokenPair, AuthError> {
        let claims = self
            .signer
            .verify(raw_refresh)
            .map_err(|_| AuthError::InvalidRefresh)?;
        let identity = claims.identity.as_str();

        let record = self
            .bounded("store lookup", self.store.lookup(identity))
            .await?
            .ok_or(AuthError::NoSuchIdentity)?;

        let Some(stored_digest) = record.rotation_digest else {
            tracing::info!(
                identity = identity,
                "Refresh for identity with no active secret"
            );
            return Err(AuthError::WrongRefresh);
        };
        if !self.digest_matches(raw_refresh, &stored_digest).await? {
            tracing::info!(identity = identity, "Refresh artifact is not the active one");
            return Err(AuthError::WrongRefresh);
        }

        let (pair, new_digest) = self.mint_and_digest(identity, origin_address).await?;

        let persisted = self
            .bounded(
                "store update_rotation_digest",
                self.store
                    .update_rotation_digest(identity, &new_digest, Some(&stored_digest)),
            )
            .await?;
        if !persisted {
            return Err(AuthError::RotationPersistFailed);
        }

        if claims.origin_address != origin_address {
            self.notify_address_change(identity, &record.contact_address, origin_address)
                .await;
        }

        tracing::info!(identity = identity, "Rotated credential pair");
        Ok(pair)
    }

    async fn mint_and_digest(
        &self,
        identity: &str,
        origin_address: &str,
    ) -> Result<(TokenPair, String), AuthError> {
        let now = Utc::now();
        let access_expiry = expiry_after(now, self.policy.access_ttl)?;
        let refresh_expiry = expiry_after(now, self.policy.refresh_ttl)?;

        let pair = self
            .signer
            .mint_pair(identity, origin_address, access_expiry, refresh_expiry)
            .context("mint pair")?;

        let raw = pair.refresh.clone();
        let rounds = self.policy.digest_rounds;
        let new_digest = tokio::task::spawn_blocking(move || digest::digest_refresh(&raw, rounds))
            .await
            .context("digest task failed")?
            .context("digest refresh artifact")?;

        Ok((pair, new_digest))
    }

    async fn digest_matches(
        &self,
        raw_refresh: &str,
        stored_digest: &str,
    ) -> Result<bool, AuthError> {
        let raw = raw_refresh.to_owned();
        let stored = stored_digest.to_owned();
        let matches = tokio::task::spawn_blocking(move || digest::matches_refresh(&raw, &stored))
            .await
            .context("digest verify task failed")?
            .context("verify refresh digest")?;
        Ok(matches)
    }

    /// Best-effort alert; failures are logged and never surface to the caller.
    async fn notify_address_change(
        &self,
        identity: &str,
        contact_address: &str,
        new_address: &str,
    ) {
        let message = format!("Auth from unknown IP address: {new_address}");
        let sent = tokio::time::timeout(
            self.policy.call_timeout,
            self.notifier.send(contact_address, &message),
        )
        .await;

        match sent {
            Ok(Ok(())) => {
                tracing::info!(
                    identity = identity,
                    notifier = self.notifier.name(),
                    "Address change alert sent"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    identity = identity,
                    contact = contact_address,
                    "Could not send address change alert: {e:#}"
                );
            }
            Err(_) => {
                tracing::warn!(
                    identity = identity,
                    contact = contact_address,
                    "Address change alert timed out"
                );
            }
        }
    }

    /// Run a collaborator call under the per-call deadline.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.policy.call_timeout, fut).await {
            Ok(result) => result.context(op).map_err(AuthError::Internal),
            Err(_) => Err(AuthError::Internal(anyhow::anyhow!(
                "{op} timed out after {:?}",
                self.policy.call_timeout
            ))),
        }
    }
}

fn to_chrono(ttl: Duration) -> anyhow::Result<chrono::Duration> {
    chrono::Duration::from_std(ttl).context("TTL out of range")
}

/// `now + ttl`, failing instead of overflowing the calendar range.
fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> anyhow::Result<DateTime<Utc>> {
    now.checked_add_signed(to_chrono(ttl)?)
        .with_context(|| format!("TTL {ttl:?} overflows expiry"))
}
