//! REST client for the membership service.
//!
//! The membership service owns organisation membership. The broker asks it
//! whether a user belongs to an audience and tells it when a device has been
//! paired:
//!
//! - `GET {base}/user/{upn}/{provider}` returns a [`MembershipRecord`] or 404
//! - `POST {base}/user/{upn}/device/{code}?provider={provider}` returns 200 or 404
//!
//! Every call carries a freshly minted internal token with the `SYSTEM` role.
//! The base URL may contain an `{{AUDIENCE}}` placeholder, replaced with the
//! audience of the request.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use reqwest::StatusCode;
use url::Url;

use crate::identity::{CanonicalIdentity, MembershipRecord};
use crate::token::{TokenError, TokenMaker};

static AUDIENCE_PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*AUDIENCE\s*\}\}").expect("Invalid audience placeholder regex")
});

/// Errors returned by the membership service client.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    /// The service answered 404.
    #[error("User not found")]
    UserNotFound,

    /// The service answered with a status other than 200 or 404.
    #[error("Unexpected response from membership service: HTTP {0}")]
    UnexpectedStatus(u16),

    /// The request failed or the body could not be read.
    #[error("Membership service request failed: {0}")]
    Transport(String),

    /// The resolved base URL is not usable.
    #[error("Invalid membership service URL: {0}")]
    InvalidUrl(String),

    /// The internal token could not be minted.
    #[error("Failed to create internal token: {0}")]
    Token(#[from] TokenError),
}

impl MembershipError {
    /// Returns `true` if the service reported the user as unknown.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound)
    }
}

/// Replaces every `{{AUDIENCE}}` placeholder in `template` with `audience`.
#[must_use]
pub fn substitute_audience(template: &str, audience: &str) -> String {
    AUDIENCE_PLACEHOLDER_RE
        .replace_all(template, regex::NoExpand(audience))
        .into_owned()
}

/// Membership service client.
#[derive(Clone)]
pub struct MembershipClient {
    http_client: reqwest::Client,
    token_maker: Arc<TokenMaker>,
}

impl std::fmt::Debug for MembershipClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipClient")
            .field("issuer", &self.token_maker.issuer())
            .finish_non_exhaustive()
    }
}

impl MembershipClient {
    #[must_use]
    pub fn new(http_client: reqwest::Client, token_maker: Arc<TokenMaker>) -> Self {
        Self {
            http_client,
            token_maker,
        }
    }

    /// Fetches the membership record of `identity` from the service at
    /// `base_url` (before placeholder substitution).
    ///
    /// # Errors
    /// Returns `MembershipError::UserNotFound` on 404,
    /// `MembershipError::UnexpectedStatus` on any other non-200 status and
    /// `MembershipError::Transport` when the call or body decoding fails.
    pub async fn get_user(
        &self,
        base_url: &str,
        identity: &CanonicalIdentity,
    ) -> Result<MembershipRecord, MembershipError> {
        let url = endpoint(
            base_url,
            &identity.audience,
            &["user", &identity.upn, identity.provider.as_str()],
        )?;
        tracing::debug!(
            upn = %identity.upn,
            audience = %identity.audience,
            "Membership lookup at {}",
            url
        );

        let token = self.token_maker.create_internal_token(identity)?;
        let response = self
            .http_client
            .get(url)
            .header("Accept", "application/json")
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(upn = %identity.upn, provider = %identity.provider, "Membership lookup failed: {}", e);
                MembershipError::Transport(e.to_string())
            })?;

        check_status(response.status(), &identity.upn)?;

        response
            .json::<MembershipRecord>()
            .await
            .map_err(|e| MembershipError::Transport(format!("invalid membership record: {e}")))
    }

    /// Tells the service at `base_url` that `identity` completed the login of
    /// the device identified by `code`.
    ///
    /// # Errors
    /// Same as [`MembershipClient::get_user`].
    pub async fn link_device(
        &self,
        base_url: &str,
        identity: &CanonicalIdentity,
        code: &str,
    ) -> Result<(), MembershipError> {
        let mut url = endpoint(
            base_url,
            &identity.audience,
            &["user", &identity.upn, "device", code],
        )?;
        url.query_pairs_mut()
            .append_pair("provider", identity.provider.as_str());
        tracing::debug!(
            upn = %identity.upn,
            audience = %identity.audience,
            "Device pairing at {}",
            url.as_str().split('?').next().unwrap_or("")
        );

        let token = self.token_maker.create_internal_token(identity)?;
        let response = self
            .http_client
            .post(url)
            .header("Accept", "application/json")
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(upn = %identity.upn, "Device pairing failed: {}", e);
                MembershipError::Transport(e.to_string())
            })?;

        check_status(response.status(), &identity.upn)
    }
}

fn endpoint(base_url: &str, audience: &str, segments: &[&str]) -> Result<Url, MembershipError> {
    let resolved = substitute_audience(base_url, audience);
    let mut url = Url::parse(&resolved)
        .map_err(|e| MembershipError::InvalidUrl(format!("{resolved}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| MembershipError::InvalidUrl(resolved.clone()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn check_status(status: StatusCode, upn: &str) -> Result<(), MembershipError> {
    match status {
        StatusCode::OK => Ok(()),
        StatusCode::NOT_FOUND => {
            tracing::warn!(upn, "Membership service does not know the user");
            Err(MembershipError::UserNotFound)
        }
        other => {
            tracing::warn!(upn, status = other.as_u16(), "Unexpected membership service response");
            Err(MembershipError::UnexpectedStatus(other.as_u16()))
        }
    }
}
