//! Upstream identity provider federation.
//!
//! Each supported provider has an adapter implementing
//! [`IdentityProviderAdapter`]. An adapter turns a login request into a
//! provider authorization URL, and a provider callback into a
//! [`CanonicalIdentity`].
//!
//! # Callback flow
//!
//! 1. Exchange the authorization code at the provider token endpoint.
//! 2. Take the `id_token` from the token response.
//! 3. Verify the identity token against the provider's published keys
//!    ([`jwks::SigningKeyCache`]), the client id and the accepted issuers.
//! 4. Decode the login state carried through the provider and check its
//!    audience.
//! 5. Read the identity claims declared by the provider's
//!    [`claims::ClaimProfile`].
//!
//! Failures are reported immediately as [`AdapterError`]; nothing is retried.

pub mod claims;
pub mod error;
pub mod google;
pub mod jwks;
pub mod microsoft;
pub mod oauth;
pub mod verifier;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

pub use claims::{ClaimProfile, IdTokenClaims};
pub use error::AdapterError;
pub use google::GoogleAdapter;
pub use jwks::{CachedSigningKey, FetchError, SigningKeyCache};
pub use microsoft::MicrosoftAdapter;
pub use oauth::{OAuthClient, TokenResponse};
pub use verifier::{IdTokenVerifier, IssuerMatcher};

use crate::config::ConfigError;
use crate::identity::{CanonicalIdentity, LoginState, Provider, is_valid_audience};

/// Form fields posted back by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
}

/// A login provider.
#[async_trait]
pub trait IdentityProviderAdapter: Send + Sync {
    /// The provider this adapter talks to.
    fn provider(&self) -> Provider;

    /// Returns the provider URL the browser is sent to. `state` is embedded
    /// in the request and comes back with the callback.
    fn begin_login(&self, state: &LoginState) -> Result<Url, AdapterError>;

    /// Completes a login from the provider callback.
    async fn complete_login(
        &self,
        callback: &CallbackParams,
    ) -> Result<CanonicalIdentity, AdapterError>;
}

/// Runs the authorization-code callback flow for profile `P`.
async fn complete_code_flow<P: ClaimProfile>(
    oauth: &OAuthClient,
    verifier: &IdTokenVerifier,
    callback: &CallbackParams,
) -> Result<CanonicalIdentity, AdapterError> {
    let tokens = oauth.exchange_code(&callback.code).await.inspect_err(|e| {
        tracing::warn!(provider = %P::PROVIDER, error = %e, "Code exchange failed");
    })?;

    let id_token = tokens.id_token.ok_or_else(|| {
        tracing::warn!(provider = %P::PROVIDER, "No id_token in token response");
        AdapterError::MissingIdentityToken
    })?;

    let claims = verifier.verify(&id_token).await.inspect_err(|e| {
        tracing::warn!(provider = %P::PROVIDER, error = %e, "Identity token rejected");
    })?;

    let state = LoginState::decode(&callback.state)
        .map_err(|e| AdapterError::InvalidState(e.to_string()))?;
    // The audience ends up in membership URLs
    if !is_valid_audience(&state.audience) {
        tracing::warn!(provider = %P::PROVIDER, "Login state carries an invalid audience");
        return Err(AdapterError::InvalidState(format!(
            "invalid audience '{}'",
            state.audience
        )));
    }

    let identity = claims.extract::<P>(state)?;
    tracing::info!(
        upn = %identity.upn,
        provider = %P::PROVIDER,
        audience = %identity.audience,
        "User found in identity token"
    );
    Ok(identity)
}

fn provider_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue(format!("{field}: {e}")))
}
