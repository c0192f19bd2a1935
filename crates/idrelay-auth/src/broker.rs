//! Login orchestration.
//!
//! [`Broker`] ties the pieces together for one provider callback:
//!
//! ```text
//! callback ─► adapter ─► identity ─► router ─► token maker ─┬─► device pairing ─► confirmation
//!                                                           └─► redirect with token in fragment
//! ```
//!
//! The first failure ends the request. Nothing is retried and no state
//! outlives the request apart from the adapters' key caches.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::authorization::AuthorizationRouter;
use crate::config::BrokerConfig;
use crate::BrokerResult;
use crate::error::BrokerError;
use crate::federation::{CallbackParams, GoogleAdapter, IdentityProviderAdapter, MicrosoftAdapter};
use crate::identity::{CanonicalIdentity, LoginState, Provider, is_valid_audience, is_valid_device_code};
use crate::membership::MembershipClient;
use crate::token::TokenMaker;

/// How a completed login is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOutcome {
    /// Send the browser to this URL; the token is in the fragment.
    Redirect(Url),
    /// The device was paired; show the confirmation page.
    DeviceLinked,
}

/// Login orchestrator.
pub struct Broker {
    adapters: HashMap<Provider, Arc<dyn IdentityProviderAdapter>>,
    router: AuthorizationRouter,
    token_maker: Arc<TokenMaker>,
    redirect_domain: String,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("providers", &self.providers())
            .field("token_maker", &self.token_maker)
            .field("redirect_domain", &self.redirect_domain)
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Creates a broker without adapters.
    #[must_use]
    pub fn new(
        router: AuthorizationRouter,
        token_maker: Arc<TokenMaker>,
        redirect_domain: impl Into<String>,
    ) -> Self {
        Self {
            adapters: HashMap::new(),
            router,
            token_maker,
            redirect_domain: redirect_domain.into(),
        }
    }

    /// Registers an adapter, replacing any adapter for the same provider.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn IdentityProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    /// Builds the broker and all its collaborators from configuration.
    ///
    /// # Errors
    /// Returns `BrokerError::Configuration` if the configuration is invalid
    /// and `BrokerError::Token` if the signing keys cannot be loaded.
    pub fn from_config(config: &BrokerConfig) -> BrokerResult<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BrokerError::configuration(format!("HTTP client: {e}")))?;

        let token_maker = Arc::new(TokenMaker::from_config(config)?);
        let membership = MembershipClient::new(http_client.clone(), Arc::clone(&token_maker));
        let router = AuthorizationRouter::from_config(config, membership);

        let mut broker = Self::new(router, token_maker, &config.redirect_domain);

        if let Some(ms) = &config.microsoft {
            let adapter =
                MicrosoftAdapter::from_config(ms, config.public_base_url(), http_client.clone())?;
            broker = broker.with_adapter(Arc::new(adapter));
        }
        if let Some(google) = &config.google {
            let adapter =
                GoogleAdapter::from_config(google, config.public_base_url(), http_client.clone())?;
            broker = broker.with_adapter(Arc::new(adapter));
        }

        tracing::info!(
            issuer = %config.issuer,
            algorithm = ?broker.token_maker.algorithm(),
            providers = ?broker.providers(),
            audiences = config.audiences.len(),
            "Broker initialized"
        );

        Ok(broker)
    }

    /// Returns the configured providers in a stable order.
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort_by_key(Provider::as_str);
        providers
    }

    /// Returns the token maker.
    #[must_use]
    pub fn token_maker(&self) -> &Arc<TokenMaker> {
        &self.token_maker
    }

    /// Returns the authorization router.
    #[must_use]
    pub fn router(&self) -> &AuthorizationRouter {
        &self.router
    }

    fn adapter(&self, provider: Provider) -> Result<&Arc<dyn IdentityProviderAdapter>, BrokerError> {
        self.adapters
            .get(&provider)
            .ok_or(BrokerError::ProviderUnavailable(provider))
    }

    /// Returns the provider URL that starts a login for `state`.
    ///
    /// # Errors
    /// Returns `BrokerError::ProviderUnavailable` if `provider` is not
    /// configured.
    pub fn begin_login(&self, provider: Provider, state: LoginState) -> Result<Url, BrokerError> {
        let adapter = self.adapter(provider)?;
        let state = LoginState {
            provider: Some(provider),
            ..state
        };
        adapter.begin_login(&state).map_err(|e| {
            tracing::error!(provider = %provider, error = %e, "Failed to build authorization URL");
            BrokerError::configuration(e.to_string())
        })
    }

    /// Completes a login from a provider callback.
    ///
    /// # Errors
    /// Returns the `BrokerError` for the first step that failed; see
    /// [`BrokerError::status_code`] for how each is answered.
    pub async fn complete_login(
        &self,
        provider: Provider,
        callback: &CallbackParams,
    ) -> BrokerResult<BrokerOutcome> {
        let adapter = self.adapter(provider)?;
        let mut identity = adapter.complete_login(callback).await?;

        if let Some(code) = identity.device_code.as_deref()
            && !is_valid_device_code(code)
        {
            tracing::warn!(upn = %identity.upn, "Ignoring malformed device code from state");
            identity.device_code = None;
        }

        let membership = self.router.authorize(&identity).await.inspect_err(|e| {
            tracing::warn!(upn = %identity.upn, audience = %identity.audience, error = %e, "Authorization denied");
        })?;

        let issued = self
            .token_maker
            .issue(&identity, membership.as_ref())
            .inspect_err(|e| tracing::error!(error = %e, "Failed to create token"))?;
        tracing::debug!(
            jti = %issued.payload.jti,
            expires_at = %issued.expires_at,
            "Issued token"
        );

        if let Some(code) = identity.device_code.as_deref() {
            let base_url = self.router.membership_base_url(&identity.audience);
            self.router
                .membership()
                .link_device(base_url, &identity, code)
                .await
                .map_err(|e| {
                    tracing::error!(upn = %identity.upn, error = %e, "Device pairing failed");
                    BrokerError::DeviceLink(e)
                })?;
            tracing::info!(
                upn = %identity.upn,
                provider = %identity.provider,
                audience = %identity.audience,
                "Device login completed"
            );
            return Ok(BrokerOutcome::DeviceLinked);
        }

        let target = self.redirect_target(&identity, &issued.token)?;
        tracing::info!(
            upn = %identity.upn,
            provider = %identity.provider,
            audience = %identity.audience,
            "Login completed"
        );
        Ok(BrokerOutcome::Redirect(target))
    }

    /// Builds the post-login redirect for `identity` carrying `token` in the
    /// fragment.
    ///
    /// The target is the audience's fixed redirect when configured, else
    /// `https://{audience}.{redirect_domain}?from=oauth`. The identity's
    /// redirect hint is appended as the `redirect` query parameter.
    ///
    /// # Errors
    /// Returns `BrokerError::InvalidRedirect` if the target cannot be built.
    pub fn redirect_target(
        &self,
        identity: &CanonicalIdentity,
        token: &str,
    ) -> Result<Url, BrokerError> {
        let fixed = self
            .router
            .policy(&identity.audience)
            .and_then(|policy| policy.redirect.as_deref())
            .filter(|redirect| !redirect.is_empty());

        let mut url = match fixed {
            Some(redirect) => Url::parse(redirect)
                .map_err(|e| BrokerError::invalid_redirect(format!("{redirect}: {e}")))?,
            None => self.default_redirect(&identity.audience)?,
        };

        if let Some(hint) = identity.redirect.as_deref() {
            url.query_pairs_mut().append_pair("redirect", hint);
        }
        url.set_fragment(Some(token));
        Ok(url)
    }

    fn default_redirect(&self, audience: &str) -> Result<Url, BrokerError> {
        if !is_valid_audience(audience) {
            return Err(BrokerError::invalid_redirect(format!(
                "audience '{audience}' cannot be used as a host label"
            )));
        }

        let expected_host = format!("{audience}.{}", self.redirect_domain).to_ascii_lowercase();
        let url = Url::parse(&format!("https://{expected_host}?from=oauth"))
            .map_err(|e| BrokerError::invalid_redirect(e.to_string()))?;

        // the domain must not smuggle in a path, port or credentials
        if url.host_str() != Some(expected_host.as_str()) || url.path() != "/" {
            return Err(BrokerError::invalid_redirect(format!(
                "redirect host does not match {expected_host}"
            )));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudiencePolicy;
    use crate::federation::AdapterError;
    use crate::identity::ROLE_ADMINISTRATOR;
    use async_trait::async_trait;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DEVICE_CODE: &str = "0123456789abcdef0123456789abcdef";

    /// Adapter answering every callback with a fixed identity.
    struct FixedAdapter {
        identity: Option<CanonicalIdentity>,
    }

    #[async_trait]
    impl IdentityProviderAdapter for FixedAdapter {
        fn provider(&self) -> Provider {
            Provider::Google
        }

        fn begin_login(&self, state: &LoginState) -> Result<Url, AdapterError> {
            let mut url = Url::parse("https://accounts.example.com/auth").unwrap();
            url.query_pairs_mut()
                .append_pair("state", &state.encode().unwrap());
            Ok(url)
        }

        async fn complete_login(
            &self,
            _callback: &CallbackParams,
        ) -> Result<CanonicalIdentity, AdapterError> {
            self.identity.clone().ok_or(AdapterError::MissingIdentityToken)
        }
    }

    fn identity(audience: &str) -> CanonicalIdentity {
        CanonicalIdentity::new("alice@example.com", audience, Provider::Google)
    }

    fn broker(
        server: &MockServer,
        policies: Vec<AudiencePolicy>,
        identity: Option<CanonicalIdentity>,
    ) -> Broker {
        let maker = Arc::new(
            TokenMaker::hs256("0123456789abcdef0123456789abcdef", "https://login.example.com")
                .unwrap(),
        );
        let membership = MembershipClient::new(reqwest::Client::new(), Arc::clone(&maker));
        let router = AuthorizationRouter::new(policies, server.uri(), membership);
        Broker::new(router, maker, "example.com").with_adapter(Arc::new(FixedAdapter { identity }))
    }

    fn skip_policy(name: &str, redirect: Option<&str>) -> AudiencePolicy {
        AudiencePolicy {
            name: name.to_string(),
            authorize: false,
            authorize_url: None,
            redirect: redirect.map(str::to_string),
        }
    }

    fn token_from(url: &Url) -> &str {
        url.fragment().unwrap()
    }

    #[tokio::test]
    async fn test_skipped_authorization_redirects_with_token() {
        let server = MockServer::start().await;
        let broker = broker(&server, vec![skip_policy("acme", None)], Some(identity("acme")));

        let outcome = broker
            .complete_login(Provider::Google, &CallbackParams::default())
            .await
            .unwrap();
        let BrokerOutcome::Redirect(url) = outcome else {
            panic!("expected redirect");
        };
        assert_eq!(url.host_str(), Some("acme.example.com"));
        assert_eq!(url.query(), Some("from=oauth"));

        let payload = broker.token_maker().verify_token(token_from(&url)).unwrap();
        assert_eq!(payload.upn, "alice@example.com");
        assert!(payload.roles.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_member_roles_are_in_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/alice@example.com/google"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"roles": [ROLE_ADMINISTRATOR]})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let broker = broker(&server, Vec::new(), Some(identity("acme")));

        let BrokerOutcome::Redirect(url) = broker
            .complete_login(Provider::Google, &CallbackParams::default())
            .await
            .unwrap()
        else {
            panic!("expected redirect");
        };
        let payload = broker.token_maker().verify_token(token_from(&url)).unwrap();
        assert_eq!(payload.roles, vec![ROLE_ADMINISTRATOR]);
    }

    #[tokio::test]
    async fn test_not_member() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let broker = broker(&server, Vec::new(), Some(identity("acme")));

        let err = broker
            .complete_login(Provider::Google, &CallbackParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(
            err.user_message(),
            "User: alice@example.com is not member in the organisation ACME."
        );
    }

    #[tokio::test]
    async fn test_device_login_links_device() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/user/alice@example.com/device/{DEVICE_CODE}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let mut identity = identity("acme");
        identity.device_code = Some(DEVICE_CODE.to_string());
        let broker = broker(&server, vec![skip_policy("acme", None)], Some(identity));

        let outcome = broker
            .complete_login(Provider::Google, &CallbackParams::default())
            .await
            .unwrap();
        assert_eq!(outcome, BrokerOutcome::DeviceLinked);
    }

    #[tokio::test]
    async fn test_device_link_failure_is_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let mut identity = identity("acme");
        identity.device_code = Some(DEVICE_CODE.to_string());
        let broker = broker(&server, vec![skip_policy("acme", None)], Some(identity));

        let err = broker
            .complete_login(Provider::Google, &CallbackParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::DeviceLink(_)));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.user_message(), "Server error");
    }

    #[tokio::test]
    async fn test_malformed_device_code_is_ignored() {
        let server = MockServer::start().await;
        let mut identity = identity("acme");
        identity.device_code = Some("../../admin".to_string());
        let broker = broker(&server, vec![skip_policy("acme", None)], Some(identity));

        let outcome = broker
            .complete_login(Provider::Google, &CallbackParams::default())
            .await
            .unwrap();
        assert!(matches!(outcome, BrokerOutcome::Redirect(_)));
    }

    #[tokio::test]
    async fn test_fixed_redirect_with_hint() {
        let server = MockServer::start().await;
        let mut identity = identity("console");
        identity.redirect = Some("/settings?tab=1".to_string());
        let broker = broker(
            &server,
            vec![skip_policy("console", Some("https://console.example.net/login"))],
            Some(identity),
        );

        let BrokerOutcome::Redirect(url) = broker
            .complete_login(Provider::Google, &CallbackParams::default())
            .await
            .unwrap()
        else {
            panic!("expected redirect");
        };
        assert_eq!(url.host_str(), Some("console.example.net"));
        assert_eq!(url.path(), "/login");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("redirect".to_string(), "/settings?tab=1".to_string())]);
        assert!(url.fragment().is_some());
    }

    #[tokio::test]
    async fn test_default_redirect_rejects_bad_audience() {
        let server = MockServer::start().await;
        let broker = broker(&server, Vec::new(), None);

        let err = broker.redirect_target(&identity("evil.com/x"), "t").unwrap_err();
        assert_eq!(err.status_code(), 500);

        let url = broker.redirect_target(&identity("Acme"), "t").unwrap();
        assert_eq!(url.as_str(), "https://acme.example.com/?from=oauth#t");
    }

    #[tokio::test]
    async fn test_default_redirect_rejects_domain_with_path() {
        let server = MockServer::start().await;
        let mut broker = broker(&server, Vec::new(), None);
        broker.redirect_domain = "example.com/phish".to_string();
        assert!(broker.redirect_target(&identity("acme"), "t").is_err());
    }

    #[tokio::test]
    async fn test_adapter_failure_is_unauthorized() {
        let server = MockServer::start().await;
        let broker = broker(&server, Vec::new(), None);

        let err = broker
            .complete_login(Provider::Google, &CallbackParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.user_message(), "Error when processing request.");
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let server = MockServer::start().await;
        let broker = broker(&server, Vec::new(), None);

        let err = broker
            .begin_login(Provider::Microsoft, LoginState::new("acme"))
            .unwrap_err();
        assert!(matches!(err, BrokerError::ProviderUnavailable(Provider::Microsoft)));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_begin_login_stamps_provider() {
        let server = MockServer::start().await;
        let broker = broker(&server, Vec::new(), None);

        let url = broker
            .begin_login(Provider::Google, LoginState::new("acme"))
            .unwrap();
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let state = LoginState::decode(&state).unwrap();
        assert_eq!(state.provider, Some(Provider::Google));
        assert_eq!(broker.providers(), vec![Provider::Google]);
    }
}
