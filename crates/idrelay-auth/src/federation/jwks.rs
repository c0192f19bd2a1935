//! Signing key cache for upstream identity tokens.
//!
//! Identity tokens issued by an upstream provider are signed with one of the
//! keys published at the provider's JWKS endpoint. [`SigningKeyCache`] keeps
//! exactly one of those keys: the one that verified the most recent token.
//!
//! # Refresh policy
//!
//! A lookup is answered from the cache only when the requested `kid` equals
//! the cached one and the entry is younger than the staleness threshold
//! (one hour by default). Anything else triggers a fetch of the full key set,
//! and the matching key replaces the cached entry. Entries are never merged.
//!
//! # Concurrency
//!
//! The slot is an [`ArcSwapOption`], so readers never observe a half-written
//! entry. Two concurrent misses may both fetch; the last one to finish wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey};
use url::Url;

/// Default age after which the cached key is refetched.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(3600);

/// Errors that can occur while obtaining a signing key.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The key set could not be retrieved.
    #[error("Key set unreachable: {0}")]
    Unreachable(String),

    /// The key set does not contain the requested key.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The key set or the matching key could not be parsed.
    #[error("Malformed key set: {0}")]
    Malformed(String),
}

/// A cached verification key.
pub struct CachedSigningKey {
    /// Key id the entry was fetched for.
    pub kid: String,
    /// Verification key.
    pub key: DecodingKey,
    /// Algorithm declared by the key, if any.
    pub algorithm: Option<Algorithm>,
    /// When the entry was fetched.
    pub fetched_at: Instant,
}

impl CachedSigningKey {
    fn is_fresh_for(&self, kid: &str, staleness: Duration) -> bool {
        self.kid == kid && self.fetched_at.elapsed() < staleness
    }
}

impl std::fmt::Debug for CachedSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("fetched_at", &self.fetched_at)
            .finish_non_exhaustive()
    }
}

/// Single-slot cache of the signing key published at one JWKS endpoint.
pub struct SigningKeyCache {
    http_client: reqwest::Client,
    jwks_uri: Url,
    staleness: Duration,
    slot: ArcSwapOption<CachedSigningKey>,
}

impl SigningKeyCache {
    /// Creates an empty cache for `jwks_uri`.
    ///
    /// The client's own timeout bounds every fetch.
    #[must_use]
    pub fn new(http_client: reqwest::Client, jwks_uri: Url) -> Self {
        Self {
            http_client,
            jwks_uri,
            staleness: DEFAULT_STALENESS,
            slot: ArcSwapOption::empty(),
        }
    }

    /// Sets the staleness threshold.
    #[must_use]
    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Returns the JWKS endpoint this cache reads from.
    #[must_use]
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Returns the currently cached entry without touching the network.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<CachedSigningKey>> {
        self.slot.load_full()
    }

    /// Returns the key for `kid`, fetching the key set when the cached entry
    /// is for another key or has gone stale.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Unreachable` on transport failures or non-success
    /// status, `FetchError::Malformed` when the set or key cannot be parsed,
    /// and `FetchError::KeyNotFound` when the set lacks `kid`. The cached entry
    /// is left untouched on error.
    pub async fn get_key(&self, kid: &str) -> Result<Arc<CachedSigningKey>, FetchError> {
        if let Some(entry) = self.slot.load_full()
            && entry.is_fresh_for(kid, self.staleness)
        {
            tracing::trace!(kid, "Signing key cache hit");
            return Ok(entry);
        }

        tracing::debug!(kid, jwks_uri = %self.jwks_uri, "Signing key cache miss");
        let entry = Arc::new(self.fetch(kid).await?);
        self.slot.store(Some(Arc::clone(&entry)));
        Ok(entry)
    }

    async fn fetch(&self, kid: &str) -> Result<CachedSigningKey, FetchError> {
        let response = self
            .http_client
            .get(self.jwks_uri.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to fetch JWKS from {}: {}", self.jwks_uri, e);
                FetchError::Unreachable(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Unreachable(format!(
                "HTTP status {}",
                response.status().as_u16()
            )));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            tracing::warn!("Failed to parse JWKS from {}: {}", self.jwks_uri, e);
            FetchError::Malformed(e.to_string())
        })?;

        let jwk = jwks
            .find(kid)
            .ok_or_else(|| FetchError::KeyNotFound(kid.to_string()))?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| FetchError::Malformed(e.to_string()))?;

        tracing::debug!(
            kid,
            keys = jwks.keys.len(),
            "Cached signing key from {}",
            self.jwks_uri
        );

        Ok(CachedSigningKey {
            kid: kid.to_string(),
            key,
            algorithm: jwk_algorithm(jwk),
            fetched_at: Instant::now(),
        })
    }
}

/// Extracts the algorithm from a JWK.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    use jsonwebtoken::jwk::KeyAlgorithm;

    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        _ => None,
    })
}
