//! Single-use, expiring tokens for credential recovery.
//!
//! Tokens live only in memory: a restart invalidates every outstanding
//! token, and the holder simply requests a new one. The registry is keyed
//! by the SHA-256 digest of each secret, so raw secrets are never retained
//! after [`RecoveryTokenCache::issue`] returns them.

use crate::error::{Result, StoreError};
use crate::types::SecretDigest;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Random bytes per secret (256 bits).
pub const SECRET_BYTES: usize = 32;

/// Length of a rendered secret: lowercase hex, two characters per byte.
pub const SECRET_LEN: usize = SECRET_BYTES * 2;

/// Whether `secret` has the shape of an issued secret.
pub fn is_well_formed_secret(secret: &str) -> bool {
    secret.len() == SECRET_LEN
        && secret
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// A live token.
#[derive(Debug)]
struct RecoveryToken<P> {
    subject: String,
    /// `None` when `issued + ttl` overflows; such a token never expires.
    expires_at: Option<Instant>,
    payload: P,
}

impl<P> RecoveryToken<P> {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }
}

#[derive(Debug)]
struct Registry<P> {
    by_digest: HashMap<SecretDigest, RecoveryToken<P>>,
    by_subject: HashMap<String, SecretDigest>,
}

impl<P> Registry<P> {
    fn remove(&mut self, digest: &SecretDigest) -> Option<RecoveryToken<P>> {
        let token = self.by_digest.remove(digest)?;
        if self.by_subject.get(&token.subject) == Some(digest) {
            self.by_subject.remove(&token.subject);
        }
        Some(token)
    }
}

/// Registry of recovery tokens, at most one per subject.
///
/// Has its own lock, independent of the record store.
#[derive(Debug)]
pub struct RecoveryTokenCache<P> {
    registry: Mutex<Registry<P>>,
}

impl<P> Default for RecoveryTokenCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> RecoveryTokenCache<P> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                by_digest: HashMap::new(),
                by_subject: HashMap::new(),
            }),
        }
    }

    /// Issue a token for `subject`, replacing any token it already has.
    ///
    /// Returns the secret, [`SECRET_LEN`] lowercase hex characters.
    pub fn issue(&self, subject: impl Into<String>, payload: P, ttl: Duration) -> String {
        let subject = subject.into();
        let secret = generate_secret();
        let digest = SecretDigest::of(&secret);

        let token = RecoveryToken {
            subject: subject.clone(),
            expires_at: Instant::now().checked_add(ttl),
            payload,
        };

        let mut registry = self.registry.lock();
        if let Some(previous) = registry.by_subject.insert(subject, digest) {
            registry.by_digest.remove(&previous);
            debug!(subject = %token.subject, "Replaced recovery token");
        } else {
            debug!(subject = %token.subject, "Issued recovery token");
        }
        registry.by_digest.insert(digest, token);

        secret
    }

    /// Redeem a secret, consuming its token.
    ///
    /// Fails with `TokenNotFound` if no token has this secret (including a
    /// malformed secret or one already redeemed), and with `TokenExpired` if
    /// the token is past its expiry. An expired token is removed.
    pub fn redeem(&self, secret: &str) -> Result<P> {
        if !is_well_formed_secret(secret) {
            return Err(StoreError::TokenNotFound);
        }

        let digest = SecretDigest::of(secret);
        let now = Instant::now();

        let token = self
            .registry
            .lock()
            .remove(&digest)
            .ok_or(StoreError::TokenNotFound)?;

        if token.is_expired(now) {
            debug!(subject = %token.subject, "Recovery token expired");
            return Err(StoreError::TokenExpired);
        }

        debug!(subject = %token.subject, "Recovery token redeemed");
        Ok(token.payload)
    }

    /// Whether `subject` holds an unexpired token.
    pub fn has_active(&self, subject: &str) -> bool {
        let registry = self.registry.lock();
        let now = Instant::now();
        registry
            .by_subject
            .get(subject)
            .and_then(|digest| registry.by_digest.get(digest))
            .map(|token| !token.is_expired(now))
            .unwrap_or(false)
    }

    /// Drop every expired token, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut registry = self.registry.lock();
        let now = Instant::now();

        let expired: Vec<SecretDigest> = registry
            .by_digest
            .iter()
            .filter(|(_, token)| token.is_expired(now))
            .map(|(digest, _)| *digest)
            .collect();

        for digest in &expired {
            registry.remove(digest);
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Purged expired recovery tokens");
        }
        expired.len()
    }

    /// Number of stored tokens, including expired ones not yet discovered.
    pub fn len(&self) -> usize {
        self.registry.lock().by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
