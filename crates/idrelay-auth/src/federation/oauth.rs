//! OAuth2 authorization-code client shared by the provider adapters.

use serde::Deserialize;
use url::Url;

use super::error::AdapterError;

/// Endpoints and credentials of one upstream OAuth2 client registration.
#[derive(Clone)]
pub struct OAuthClient {
    http_client: reqwest::Client,
    client_id: String,
    client_secret: String,
    authorization_endpoint: Url,
    token_endpoint: Url,
    redirect_uri: Url,
    scopes: Vec<String>,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("redirect_uri", &self.redirect_uri.as_str())
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    /// Creates a client.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authorization_endpoint: Url,
        token_endpoint: Url,
        redirect_uri: Url,
    ) -> Self {
        Self {
            http_client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorization_endpoint,
            token_endpoint,
            redirect_uri,
            scopes: Vec::new(),
        }
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Returns the registered client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the callback URL sent to the provider.
    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Builds the provider authorization URL carrying `state`.
    ///
    /// The request asks for offline access, forces account selection and
    /// has the provider post the result back as a form.
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorization_endpoint.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", self.redirect_uri.as_str());
            params.append_pair("response_type", "code");
            params.append_pair("scope", &self.scopes.join(" "));
            params.append_pair("state", state);
            params.append_pair("access_type", "offline");
            params.append_pair("prompt", "select_account");
            params.append_pair("response_mode", "form_post");
        }
        url
    }

    /// Exchanges an authorization code at the token endpoint.
    ///
    /// # Errors
    /// Returns `AdapterError::ExchangeFailed` on transport failure, a
    /// non-success status or an unparsable response.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AdapterError> {
        if code.is_empty() {
            return Err(AdapterError::ExchangeFailed(
                "missing authorization code".to_string(),
            ));
        }

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        tracing::debug!(
            "Exchanging authorization code with token endpoint: {}",
            self.token_endpoint
        );

        let response = self
            .http_client
            .post(self.token_endpoint.as_str())
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| AdapterError::ExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                return Err(AdapterError::ExchangeFailed(format!(
                    "{}: {}",
                    oauth_error.error,
                    oauth_error.error_description.unwrap_or_default()
                )));
            }

            return Err(AdapterError::ExchangeFailed(format!("HTTP {status}")));
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            AdapterError::ExchangeFailed(format!("Failed to parse token response: {e}"))
        })
    }
}

/// Token endpoint response. Only `id_token` is used.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}
