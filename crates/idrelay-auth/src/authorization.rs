//! Audience-scoped authorization.
//!
//! [`AuthorizationRouter`] decides per request whether the membership service
//! must confirm the user, and which service instance to ask. The first
//! matching rule wins:
//!
//! | audience policy                         | membership check          |
//! |-----------------------------------------|---------------------------|
//! | none                                    | default service           |
//! | `authorize = false`                     | skipped, no roles         |
//! | `authorize = true`, `authorize_url` set | that URL only             |
//! | `authorize = true`, no `authorize_url`  | default service           |

use std::collections::HashMap;

use crate::config::{AudiencePolicy, BrokerConfig};
use crate::identity::{CanonicalIdentity, MembershipRecord};
use crate::membership::{MembershipClient, MembershipError};

/// Outcome of a failed authorization.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    /// The membership service does not know the user in this audience.
    #[error("User {upn} is not a member of {audience}")]
    NotMember { upn: String, audience: String },

    /// The membership service could not answer.
    #[error("Membership service unavailable: {0}")]
    BackendUnavailable(#[source] MembershipError),
}

/// Routes membership checks according to the audience policies.
#[derive(Debug, Clone)]
pub struct AuthorizationRouter {
    policies: HashMap<String, AudiencePolicy>,
    default_base_url: String,
    membership: MembershipClient,
}

impl AuthorizationRouter {
    /// Creates a router over `policies`, using `default_base_url` when an
    /// audience has no custom membership service.
    #[must_use]
    pub fn new(
        policies: impl IntoIterator<Item = AudiencePolicy>,
        default_base_url: impl Into<String>,
        membership: MembershipClient,
    ) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|policy| (policy.name.clone(), policy))
                .collect(),
            default_base_url: default_base_url.into(),
            membership,
        }
    }

    /// Creates a router from the broker configuration.
    #[must_use]
    pub fn from_config(config: &BrokerConfig, membership: MembershipClient) -> Self {
        Self::new(
            config.audiences.iter().cloned(),
            &config.membership.base_url,
            membership,
        )
    }

    /// Returns the policy for `audience`, if one is configured.
    #[must_use]
    pub fn policy(&self, audience: &str) -> Option<&AudiencePolicy> {
        self.policies.get(audience)
    }

    /// Returns the membership service base URL for `audience`, before
    /// placeholder substitution.
    #[must_use]
    pub fn membership_base_url(&self, audience: &str) -> &str {
        self.policy(audience)
            .and_then(|policy| policy.authorize_url.as_deref())
            .unwrap_or(&self.default_base_url)
    }

    /// Returns the membership client used for checks and device pairing.
    #[must_use]
    pub fn membership(&self) -> &MembershipClient {
        &self.membership
    }

    /// Authorizes `identity` for its audience.
    ///
    /// Returns `Ok(None)` when the audience does not require a membership
    /// check, and the membership record otherwise.
    ///
    /// # Errors
    /// Returns `AuthorizationError::NotMember` when the service answers 404
    /// and `AuthorizationError::BackendUnavailable` for any other failure.
    pub async fn authorize(
        &self,
        identity: &CanonicalIdentity,
    ) -> Result<Option<MembershipRecord>, AuthorizationError> {
        if let Some(policy) = self.policy(&identity.audience)
            && !policy.authorize
        {
            tracing::debug!(audience = %identity.audience, "Authorization skipped by policy");
            return Ok(None);
        }

        let base_url = self.membership_base_url(&identity.audience);
        match self.membership.get_user(base_url, identity).await {
            Ok(record) => {
                tracing::debug!(
                    upn = %identity.upn,
                    audience = %identity.audience,
                    roles = ?record.roles,
                    "User authorized"
                );
                Ok(Some(record))
            }
            Err(e) if e.is_not_found() => Err(AuthorizationError::NotMember {
                upn: identity.upn.clone(),
                audience: identity.audience.clone(),
            }),
            Err(e) => {
                tracing::error!(audience = %identity.audience, error = %e, "Authorization failed");
                Err(AuthorizationError::BackendUnavailable(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Provider;
    use crate::token::TokenMaker;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy(name: &str, authorize: bool, authorize_url: Option<String>) -> AudiencePolicy {
        AudiencePolicy {
            name: name.to_string(),
            authorize,
            authorize_url,
            redirect: None,
        }
    }

    fn router(policies: Vec<AudiencePolicy>, default_base_url: &str) -> AuthorizationRouter {
        let maker = TokenMaker::hs256("0123456789abcdef0123456789abcdef", "https://login").unwrap();
        let membership = MembershipClient::new(reqwest::Client::new(), Arc::new(maker));
        AuthorizationRouter::new(policies, default_base_url, membership)
    }

    fn identity(audience: &str) -> CanonicalIdentity {
        CanonicalIdentity::new("alice@example.com", audience, Provider::Google)
    }

    async fn member_server(expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/alice@example.com/google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "upn": "alice@example.com",
                "roles": ["USER"]
            })))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_skip_makes_no_call() {
        let server = member_server(0).await;
        let router = router(vec![policy("acme", false, None)], &server.uri());

        let outcome = router.authorize(&identity("acme")).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_unknown_audience_uses_default_service() {
        let server = member_server(1).await;
        let router = router(vec![policy("acme", false, None)], &server.uri());

        let record = router.authorize(&identity("other")).await.unwrap().unwrap();
        assert_eq!(record.roles, vec!["USER"]);
    }

    #[tokio::test]
    async fn test_custom_url_used_instead_of_default() {
        let default = member_server(0).await;
        let custom = member_server(1).await;
        let router = router(
            vec![policy("acme", true, Some(custom.uri()))],
            &default.uri(),
        );

        assert!(router.authorize(&identity("acme")).await.unwrap().is_some());
        assert_eq!(router.membership_base_url("acme"), custom.uri());
        assert_eq!(router.membership_base_url("other"), default.uri());
    }

    #[tokio::test]
    async fn test_authorize_without_url_uses_default() {
        let server = member_server(1).await;
        let router = router(vec![policy("acme", true, None)], &server.uri());
        assert!(router.authorize(&identity("acme")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_not_found_is_not_member() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let router = router(Vec::new(), &server.uri());

        let err = router.authorize(&identity("acme")).await.unwrap_err();
        assert!(matches!(err, AuthorizationError::NotMember { ref audience, .. } if audience == "acme"));
    }

    #[tokio::test]
    async fn test_server_error_is_backend_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let router = router(Vec::new(), &server.uri());

        let err = router.authorize(&identity("acme")).await.unwrap_err();
        assert!(matches!(err, AuthorizationError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_audience_placeholder_is_resolved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acme/user/alice@example.com/google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"roles": []})))
            .expect(1)
            .mount(&server)
            .await;
        let template = format!("{}/{{{{ AUDIENCE }}}}", server.uri());
        let router = router(Vec::new(), &template);

        let record = router.authorize(&identity("acme")).await.unwrap().unwrap();
        assert!(record.roles.is_empty());
    }
}
