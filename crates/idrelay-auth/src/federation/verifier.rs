//! Identity token verification.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use regex::Regex;

use super::claims::IdTokenClaims;
use super::error::AdapterError;
use super::jwks::SigningKeyCache;

/// Accepted issuer values.
///
/// An issuer is accepted when it equals one of the configured values, or
/// when a configured pattern matches the whole issuer string.
#[derive(Debug, Clone, Default)]
pub struct IssuerMatcher {
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl IssuerMatcher {
    /// Accepts only the listed issuers, compared exactly.
    #[must_use]
    pub fn exact(issuers: &[String]) -> Self {
        Self {
            exact: issuers.to_vec(),
            patterns: Vec::new(),
        }
    }

    /// Accepts the listed issuers exactly and as anchored patterns.
    ///
    /// # Errors
    /// Returns an error if an entry is not a valid regular expression.
    pub fn patterns(issuers: &[String]) -> Result<Self, regex::Error> {
        let patterns = issuers
            .iter()
            .map(|p| Regex::new(&format!("^(?:{p})$")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            exact: issuers.to_vec(),
            patterns,
        })
    }

    #[must_use]
    pub fn matches(&self, issuer: &str) -> bool {
        self.exact.iter().any(|e| e == issuer) || self.patterns.iter().any(|p| p.is_match(issuer))
    }
}

/// Verifies identity tokens issued to one client registration.
pub struct IdTokenVerifier {
    key_cache: Arc<SigningKeyCache>,
    audience: String,
    issuers: IssuerMatcher,
}

impl IdTokenVerifier {
    /// Creates a verifier accepting tokens for `audience` (the client id).
    #[must_use]
    pub fn new(
        key_cache: Arc<SigningKeyCache>,
        audience: impl Into<String>,
        issuers: IssuerMatcher,
    ) -> Self {
        Self {
            key_cache,
            audience: audience.into(),
            issuers,
        }
    }

    /// Returns the key cache used for signature checks.
    #[must_use]
    pub fn key_cache(&self) -> &Arc<SigningKeyCache> {
        &self.key_cache
    }

    /// Verifies signature, expiry, audience and issuer of `id_token`.
    ///
    /// # Errors
    /// Returns `AdapterError::KeyFetch` when the signing key cannot be
    /// obtained and `AdapterError::InvalidIdentityToken` for every other
    /// validation failure.
    pub async fn verify(&self, id_token: &str) -> Result<IdTokenClaims, AdapterError> {
        let header = decode_header(id_token)?;
        let kid = header.kid.ok_or_else(|| {
            AdapterError::InvalidIdentityToken("missing key id (kid) header".to_string())
        })?;

        let signing_key = self.key_cache.get_key(&kid).await?;

        let algorithm = signing_key.algorithm.unwrap_or(Algorithm::RS256);
        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);
        validation.leeway = 0;

        let claims = decode::<IdTokenClaims>(id_token, &signing_key.key, &validation)?.claims;

        let issuer = claims
            .optional_str("iss")?
            .ok_or_else(|| AdapterError::InvalidIdentityToken("missing issuer".to_string()))?;
        if !self.issuers.matches(issuer) {
            tracing::warn!(issuer, "Identity token issuer not accepted");
            return Err(AdapterError::InvalidIdentityToken(format!(
                "issuer '{issuer}' is not accepted"
            )));
        }

        tracing::debug!(issuer, kid = %kid, "Validated identity token");
        Ok(claims)
    }
}
