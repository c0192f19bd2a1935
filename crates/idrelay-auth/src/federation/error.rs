//! Error types for provider adapters.

use super::jwks::FetchError;

/// Errors that can occur while completing an upstream login.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The authorization code could not be exchanged at the token endpoint.
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// The token response carried no `id_token`.
    #[error("Token response did not include an id_token")]
    MissingIdentityToken,

    /// The identity token failed signature, audience, issuer or expiry checks.
    #[error("Identity token is invalid: {0}")]
    InvalidIdentityToken(String),

    /// The signing key for the identity token could not be obtained.
    #[error("Signing key unavailable: {0}")]
    KeyFetch(#[from] FetchError),

    /// None of the principal-name claims were present.
    #[error("Identity token has no principal name claim")]
    NoPrincipalClaim,

    /// The `name` claim was missing.
    #[error("Identity token has no name claim")]
    NoNameClaim,

    /// The `tid` claim was missing.
    #[error("Identity token has no tenant claim")]
    NoTenantClaim,

    /// A claim was present but not a string.
    #[error("Claim '{claim}' is not a string")]
    MalformedClaim {
        /// Name of the offending claim.
        claim: String,
    },

    /// The `state` parameter could not be decoded.
    #[error("Invalid state parameter: {0}")]
    InvalidState(String),
}

impl AdapterError {
    /// Creates a malformed-claim error.
    #[must_use]
    pub fn malformed_claim(claim: impl Into<String>) -> Self {
        Self::MalformedClaim {
            claim: claim.into(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AdapterError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidIdentityToken(err.to_string())
    }
}
