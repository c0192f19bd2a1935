//! Google login.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::claims::ClaimProfile;
use super::error::AdapterError;
use super::jwks::SigningKeyCache;
use super::oauth::OAuthClient;
use super::verifier::{IdTokenVerifier, IssuerMatcher};
use super::{CallbackParams, IdentityProviderAdapter, complete_code_flow, provider_url};
use crate::config::{ConfigError, GoogleConfig};
use crate::identity::{CanonicalIdentity, LoginState, Provider};

const SCOPES: &[&str] = &["openid", "email"];

/// Claims read from Google identity tokens.
pub struct GoogleClaims;

impl ClaimProfile for GoogleClaims {
    const PROVIDER: Provider = Provider::Google;
    const PRINCIPAL_CLAIMS: &'static [&'static str] = &["email"];
}

/// Google provider adapter.
pub struct GoogleAdapter {
    oauth: OAuthClient,
    verifier: IdTokenVerifier,
}

impl GoogleAdapter {
    /// Builds the adapter from configuration. Issuers are compared exactly.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if an endpoint URL is invalid.
    pub fn from_config(
        config: &GoogleConfig,
        public_base_url: &str,
        http_client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let jwks_uri = provider_url("google.jwks_uri", &config.jwks_uri)?;
        let key_cache = Arc::new(SigningKeyCache::new(http_client.clone(), jwks_uri));

        let redirect_uri = provider_url(
            "google.callback_path",
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
            provider_url("google.authorization_endpoint", &config.authorization_endpoint)?,
            provider_url("google.token_endpoint", &config.token_endpoint)?,
            redirect_uri,
        )
        .with_scopes(SCOPES);

        let verifier = IdTokenVerifier::new(
            key_cache,
            &config.client_id,
            IssuerMatcher::exact(&config.issuers),
        );

        Ok(Self { oauth, verifier })
    }
}

#[async_trait]
impl IdentityProviderAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn begin_login(&self, state: &LoginState) -> Result<Url, AdapterError> {
        let encoded = state
            .encode()
            .map_err(|e| AdapterError::InvalidState(e.to_string()))?;
        Ok(self.oauth.authorization_url(&encoded))
    }

    async fn complete_login(
        &self,
        callback: &CallbackParams,
    ) -> Result<CanonicalIdentity, AdapterError> {
        complete_code_flow::<GoogleClaims>(&self.oauth, &self.verifier, callback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{jwks_document, now, sign_id_token};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> GoogleAdapter {
        let config: GoogleConfig = serde_json::from_value(json!({
            "client_id": "g-client",
            "client_secret": "g-secret",
            "jwks_uri": format!("{}/certs", server.uri()),
            "token_endpoint": format!("{}/token", server.uri()),
        }))
        .unwrap();
        GoogleAdapter::from_config(&config, "https://broker.example.com", reqwest::Client::new())
            .unwrap()
    }

    async fn mount(server: &MockServer, token_response: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(&["g1"])))
            .mount(server)
            .await;
    }

    fn callback() -> CallbackParams {
        CallbackParams {
            code: "code-1".to_string(),
            state: LoginState::new("acme")
                .with_device_code("0123456789abcdef0123456789abcdef")
                .encode()
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn test_begin_login_uses_google_endpoint() {
        let server = MockServer::start().await;
        let url = adapter(&server).begin_login(&LoginState::new("acme")).unwrap();
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(url.path(), "/o/oauth2/auth");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["scope"], "openid email");
        assert_eq!(pairs["redirect_uri"], "https://broker.example.com/callback/google");
    }

    #[tokio::test]
    async fn test_complete_login_reads_email() {
        let server = MockServer::start().await;
        let id_token = sign_id_token(
            "g1",
            &json!({
                "iss": "https://accounts.google.com",
                "aud": "g-client",
                "exp": now() + 300,
                "email": "bob@gmail.com",
                "name": "Bob",
            }),
        );
        mount(&server, json!({"access_token": "at", "id_token": id_token})).await;

        let identity = adapter(&server).complete_login(&callback()).await.unwrap();
        assert_eq!(identity.upn, "bob@gmail.com");
        assert_eq!(identity.provider, Provider::Google);
        assert_eq!(identity.name, None);
        assert_eq!(
            identity.device_code.as_deref(),
            Some("0123456789abcdef0123456789abcdef")
        );
    }

    #[tokio::test]
    async fn test_short_issuer_form_is_accepted() {
        let server = MockServer::start().await;
        let id_token = sign_id_token(
            "g1",
            &json!({
                "iss": "accounts.google.com",
                "aud": "g-client",
                "exp": now() + 300,
                "email": "bob@gmail.com",
            }),
        );
        mount(&server, json!({"id_token": id_token})).await;

        assert!(adapter(&server).complete_login(&callback()).await.is_ok());
    }

    #[tokio::test]
    async fn test_state_audience_must_be_a_host_label() {
        let server = MockServer::start().await;
        let id_token = sign_id_token(
            "g1",
            &json!({
                "iss": "https://accounts.google.com",
                "aud": "g-client",
                "exp": now() + 300,
                "email": "bob@gmail.com",
            }),
        );
        mount(&server, json!({"id_token": id_token})).await;

        for state in [r#"{"audience":"127.0.0.1:9000/x#"}"#, "{}"] {
            let callback = CallbackParams {
                code: "code-1".to_string(),
                state: state.to_string(),
            };
            let err = adapter(&server).complete_login(&callback).await.unwrap_err();
            assert!(matches!(err, AdapterError::InvalidState(_)), "{state}");
        }
    }

    #[tokio::test]
    async fn test_missing_id_token() {
        let server = MockServer::start().await;
        mount(&server, json!({"access_token": "at"})).await;

        let err = adapter(&server).complete_login(&callback()).await.unwrap_err();
        assert!(matches!(err, AdapterError::MissingIdentityToken));
    }

    #[tokio::test]
    async fn test_foreign_issuer_rejected() {
        let server = MockServer::start().await;
        let id_token = sign_id_token(
            "g1",
            &json!({
                "iss": "https://accounts.google.com.evil.example",
                "aud": "g-client",
                "exp": now() + 300,
                "email": "bob@gmail.com",
            }),
        );
        mount(&server, json!({"id_token": id_token})).await;

        let err = adapter(&server).complete_login(&callback()).await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidIdentityToken(_)));
    }
}
