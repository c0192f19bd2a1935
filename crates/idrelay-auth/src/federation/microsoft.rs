//! Microsoft (Azure AD v2) login.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::claims::ClaimProfile;
use super::error::AdapterError;
use super::jwks::SigningKeyCache;
use super::oauth::OAuthClient;
use super::verifier::{IdTokenVerifier, IssuerMatcher};
use super::{CallbackParams, IdentityProviderAdapter, complete_code_flow, provider_url};
use crate::config::{ConfigError, MicrosoftConfig};
use crate::identity::{CanonicalIdentity, LoginState, Provider, is_valid_tenant};

const SCOPES: &[&str] = &["openid", "email", "profile"];
const COMMON_TENANT_SEGMENT: &str = "/common/";

/// Claims read from Azure AD identity tokens.
pub struct MicrosoftClaims;

impl ClaimProfile for MicrosoftClaims {
    const PROVIDER: Provider = Provider::Microsoft;
    const PRINCIPAL_CLAIMS: &'static [&'static str] = &["upn", "unique_name", "preferred_username"];
    const NAME_CLAIM: Option<&'static str> = Some("name");
    const TENANT_CLAIM: Option<&'static str> = Some("tid");
}

/// Microsoft provider adapter.
pub struct MicrosoftAdapter {
    oauth: OAuthClient,
    verifier: IdTokenVerifier,
}

impl MicrosoftAdapter {
    /// Builds the adapter from configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if an endpoint URL or an issuer
    /// pattern is invalid.
    pub fn from_config(
        config: &MicrosoftConfig,
        public_base_url: &str,
        http_client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let jwks_uri = provider_url("microsoft.jwks_uri", &config.jwks_uri)?;
        let key_cache = Arc::new(SigningKeyCache::new(http_client.clone(), jwks_uri));
        Self::with_key_cache(config, public_base_url, http_client, key_cache)
    }

    /// Builds the adapter around an existing key cache.
    ///
    /// # Errors
    /// See [`MicrosoftAdapter::from_config`].
    pub fn with_key_cache(
        config: &MicrosoftConfig,
        public_base_url: &str,
        http_client: reqwest::Client,
        key_cache: Arc<SigningKeyCache>,
    ) -> Result<Self, ConfigError> {
        let redirect_uri = provider_url(
            "microsoft.callback_path",
            &format!(
                "{}/{}",
                public_base_url.trim_end_matches('/'),
                config.callback_path.trim_start_matches('/')
            ),
        )?;
        let oauth = OAuthClient::new(
            http_client,
            &config.client_id,
            &config.client_secret,
            provider_url("microsoft.authorization_endpoint", &config.authorization_endpoint)?,
            provider_url("microsoft.token_endpoint", &config.token_endpoint)?,
            redirect_uri,
        )
        .with_scopes(SCOPES);

        let issuers = IssuerMatcher::patterns(&config.issuers)
            .map_err(|e| ConfigError::InvalidValue(format!("microsoft.issuers: {e}")))?;
        let verifier = IdTokenVerifier::new(key_cache, &config.client_id, issuers);

        Ok(Self { oauth, verifier })
    }
}

#[async_trait]
impl IdentityProviderAdapter for MicrosoftAdapter {
    fn provider(&self) -> Provider {
        Provider::Microsoft
    }

    fn begin_login(&self, state: &LoginState) -> Result<Url, AdapterError> {
        let encoded = state
            .encode()
            .map_err(|e| AdapterError::InvalidState(e.to_string()))?;
        let mut url = self.oauth.authorization_url(&encoded);

        if let Some(tenant) = state.tenant.as_deref()
            && is_valid_tenant(tenant)
        {
            let path = url
                .path()
                .replacen(COMMON_TENANT_SEGMENT, &format!("/{tenant}/"), 1);
            url.set_path(&path);
        }

        tracing::debug!(
            "Prepared Microsoft authorization URL: {}",
            url.as_str().split('?').next().unwrap_or("")
        );
        Ok(url)
    }

    async fn complete_login(
        &self,
        callback: &CallbackParams,
    ) -> Result<CanonicalIdentity, AdapterError> {
        complete_code_flow::<MicrosoftClaims>(&self.oauth, &self.verifier, callback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{jwks_document, now, sign_id_token};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &str) -> MicrosoftConfig {
        MicrosoftConfig {
            client_id: "ms-client".to_string(),
            client_secret: "ms-secret".to_string(),
            callback_path: "/callback/microsoft".to_string(),
            jwks_uri: format!("{server}/keys"),
            issuers: vec![r"https://login\.example\.com/[0-9a-f-]+/v2\.0".to_string()],
            authorization_endpoint: "https://login.example.com/common/oauth2/v2.0/authorize"
                .to_string(),
            token_endpoint: format!("{server}/token"),
        }
    }

    async fn mount_provider(server: &MockServer, claims: serde_json::Value) {
        let id_token = sign_id_token("k1", &claims);
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "at", "id_token": id_token})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(&["k1"])))
            .mount(server)
            .await;
    }

    fn token_claims(extra: serde_json::Value) -> serde_json::Value {
        let mut claims = json!({
            "iss": "https://login.example.com/abcd-1234/v2.0",
            "aud": "ms-client",
            "exp": now() + 300,
            "iat": now(),
            "name": "Alice Doe",
            "tid": "abcd-1234",
        });
        if let (Some(base), Some(extra)) = (claims.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        claims
    }

    fn adapter(server: &MockServer) -> MicrosoftAdapter {
        MicrosoftAdapter::from_config(
            &config(&server.uri()),
            "https://broker.example.com/",
            reqwest::Client::new(),
        )
        .unwrap()
    }

    fn callback(state: &LoginState) -> CallbackParams {
        CallbackParams {
            code: "auth-code".to_string(),
            state: state.encode().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_begin_login_rewrites_tenant() {
        let server = MockServer::start().await;
        let adapter = adapter(&server);

        let url = adapter
            .begin_login(&LoginState::new("acme").with_tenant("contoso.onmicrosoft.com"))
            .unwrap();
        assert_eq!(url.path(), "/contoso.onmicrosoft.com/oauth2/v2.0/authorize");

        let url = adapter.begin_login(&LoginState::new("acme")).unwrap();
        assert_eq!(url.path(), "/common/oauth2/v2.0/authorize");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["redirect_uri"], "https://broker.example.com/callback/microsoft");
        assert_eq!(pairs["scope"], "openid email profile");
    }

    #[tokio::test]
    async fn test_begin_login_ignores_invalid_tenant() {
        let server = MockServer::start().await;
        let url = adapter(&server)
            .begin_login(&LoginState::new("acme").with_tenant("../evil"))
            .unwrap();
        assert_eq!(url.path(), "/common/oauth2/v2.0/authorize");
    }

    #[tokio::test]
    async fn test_complete_login_prefers_upn() {
        let server = MockServer::start().await;
        mount_provider(
            &server,
            token_claims(json!({
                "upn": "alice@contoso.com",
                "unique_name": "alice-unique",
                "preferred_username": "alice-preferred"
            })),
        )
        .await;

        let state = LoginState::new("acme").with_redirect("/home");
        let identity = adapter(&server).complete_login(&callback(&state)).await.unwrap();

        assert_eq!(identity.upn, "alice@contoso.com");
        assert_eq!(identity.name.as_deref(), Some("Alice Doe"));
        assert_eq!(identity.tenant.as_deref(), Some("abcd-1234"));
        assert_eq!(identity.provider, Provider::Microsoft);
        assert_eq!(identity.redirect.as_deref(), Some("/home"));
    }

    #[tokio::test]
    async fn test_complete_login_falls_back_to_preferred_username() {
        let server = MockServer::start().await;
        mount_provider(
            &server,
            token_claims(json!({"preferred_username": "alice@live.com"})),
        )
        .await;

        let identity = adapter(&server)
            .complete_login(&callback(&LoginState::new("acme")))
            .await
            .unwrap();
        assert_eq!(identity.upn, "alice@live.com");
    }

    #[tokio::test]
    async fn test_complete_login_without_principal() {
        let server = MockServer::start().await;
        mount_provider(&server, token_claims(json!({}))).await;

        let err = adapter(&server)
            .complete_login(&callback(&LoginState::new("acme")))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NoPrincipalClaim));
    }

    #[tokio::test]
    async fn test_complete_login_with_bad_state() {
        let server = MockServer::start().await;
        mount_provider(&server, token_claims(json!({"upn": "alice@contoso.com"}))).await;

        let params = CallbackParams {
            code: "auth-code".to_string(),
            state: "{not json".to_string(),
        };
        let err = adapter(&server).complete_login(&params).await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidState(_)));
    }
}
