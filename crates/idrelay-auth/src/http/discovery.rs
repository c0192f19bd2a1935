//! OpenID discovery HTTP handler.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::BrokerState;

/// The subset of the OpenID provider metadata the broker publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub jwks_uri: String,
}

impl OpenIdConfiguration {
    /// Builds the document for `issuer`.
    #[must_use]
    pub fn for_issuer(issuer: &str) -> Self {
        let base = issuer.trim_end_matches('/');
        Self {
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{base}/"),
            jwks_uri: format!("{base}/oauth2/v1/certs"),
        }
    }
}

/// Handler for `GET /.well-known/openid-configuration`.
pub async fn openid_configuration_handler(State(state): State<BrokerState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        Json(OpenIdConfiguration::for_issuer(&state.issuer)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_for_issuer() {
        let doc = OpenIdConfiguration::for_issuer("https://login.example.com/");
        assert_eq!(doc.issuer, "https://login.example.com/");
        assert_eq!(doc.authorization_endpoint, "https://login.example.com/");
        assert_eq!(doc.jwks_uri, "https://login.example.com/oauth2/v1/certs");
    }
}
