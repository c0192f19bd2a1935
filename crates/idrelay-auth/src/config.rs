//! Broker configuration.
//!
//! This module defines the configuration structures for the identity broker:
//! token signing, audience policies, the membership service and the upstream
//! identity providers. Durations are written in humantime form (`"10m"`,
//! `"60s"`).
//!
//! # Example TOML
//!
//! ```toml
//! [broker]
//! issuer = "https://login.example.com"
//! redirect_domain = "example.com"
//! default_audience = "console"
//! token_lifetime = "10m"
//! internal_token_lifetime = "60s"
//!
//! [broker.signing]
//! method = "HS256"
//!
//! [broker.signing.hs256]
//! secret = "a-very-long-shared-secret-of-at-least-32-chars"
//!
//! [broker.membership]
//! base_url = "https://{{AUDIENCE}}.example.com/sysapi"
//!
//! [[broker.audiences]]
//! name = "console"
//! authorize = false
//! redirect = "https://console.example.com/login"
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::is_valid_audience;

/// Minimum length of the shared HS256 secret.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Top-level broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Issuer stamped into every minted token and advertised by discovery.
    pub issuer: String,

    /// Externally reachable base URL of this broker, used to build provider
    /// callback URLs. Falls back to `issuer` when empty.
    pub public_url: String,

    /// Domain appended to the audience when computing the default
    /// post-login redirect (`https://{audience}.{redirect_domain}`).
    pub redirect_domain: String,

    /// Audience used by the login page when none is supplied.
    pub default_audience: String,

    /// Lifetime of end-user tokens.
    #[serde(with = "humantime_serde")]
    pub token_lifetime: Duration,

    /// Lifetime of internal tokens presented to the membership service.
    #[serde(with = "humantime_serde")]
    pub internal_token_lifetime: Duration,

    /// Timeout applied to every outbound HTTP call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Token signing configuration.
    pub signing: SigningConfig,

    /// Default membership service.
    pub membership: MembershipConfig,

    /// Per-audience authorization policies.
    pub audiences: Vec<AudiencePolicy>,

    /// Microsoft (Azure AD) login, disabled when absent.
    pub microsoft: Option<MicrosoftConfig>,

    /// Google login, disabled when absent.
    pub google: Option<GoogleConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            public_url: String::new(),
            redirect_domain: "localhost".to_string(),
            default_audience: String::new(),
            token_lifetime: Duration::from_secs(600),
            internal_token_lifetime: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            signing: SigningConfig::default(),
            membership: MembershipConfig::default(),
            audiences: Vec::new(),
            microsoft: None,
            google: None,
        }
    }
}

impl BrokerConfig {
    /// Returns the base URL callbacks are built from, without a trailing slash.
    #[must_use]
    pub fn public_base_url(&self) -> &str {
        let base = if self.public_url.is_empty() {
            &self.issuer
        } else {
            &self.public_url
        };
        base.trim_end_matches('/')
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the issuer or redirect domain is empty, the
    /// signing material for the selected method is missing or too weak,
    /// lifetimes are zero, or audience policies are duplicated or malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("broker.issuer".to_string()));
        }

        if self.redirect_domain.trim().is_empty() {
            return Err(ConfigError::Missing("broker.redirect_domain".to_string()));
        }

        if !self.default_audience.is_empty() && !is_valid_audience(&self.default_audience) {
            return Err(ConfigError::InvalidValue(format!(
                "default_audience '{}' is not a valid audience name",
                self.default_audience
            )));
        }

        if self.token_lifetime.is_zero() || self.internal_token_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be > 0".to_string(),
            ));
        }

        self.signing.validate()?;

        let mut seen = HashSet::new();
        for policy in &self.audiences {
            if !seen.insert(policy.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "audience '{}' is configured more than once",
                    policy.name
                )));
            }
            if let Some(url) = &policy.authorize_url
                && url.trim().is_empty()
            {
                return Err(ConfigError::InvalidValue(format!(
                    "audience '{}' has an empty authorize_url",
                    policy.name
                )));
            }
        }

        if let Some(ms) = &self.microsoft {
            ms.validate()?;
        }
        if let Some(google) = &self.google {
            google.validate()?;
        }

        Ok(())
    }
}

/// Token signing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningMethod {
    /// Shared-secret HMAC with SHA-256.
    HS256,
    /// RSA key pair with SHA-256.
    RS256,
}

impl fmt::Display for SigningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HS256 => f.write_str("HS256"),
            Self::RS256 => f.write_str("RS256"),
        }
    }
}

/// Token signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Selected signing method.
    pub method: SigningMethod,

    /// Settings for [`SigningMethod::HS256`].
    #[serde(default)]
    pub hs256: Option<Hs256Config>,

    /// Settings for [`SigningMethod::RS256`].
    #[serde(default)]
    pub rs256: Option<Rs256Config>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            method: SigningMethod::HS256,
            hs256: None,
            rs256: None,
        }
    }
}

impl SigningConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.method {
            SigningMethod::HS256 => {
                let secret = self
                    .hs256
                    .as_ref()
                    .map(|c| c.secret.as_str())
                    .ok_or_else(|| ConfigError::Missing("broker.signing.hs256.secret".to_string()))?;
                if secret.chars().count() < MIN_SECRET_LENGTH {
                    return Err(ConfigError::InvalidValue(format!(
                        "HS256 secret must be at least {MIN_SECRET_LENGTH} characters"
                    )));
                }
            }
            SigningMethod::RS256 => {
                let rs = self
                    .rs256
                    .as_ref()
                    .ok_or_else(|| ConfigError::Missing("broker.signing.rs256".to_string()))?;
                if rs.private_key_path.as_os_str().is_empty()
                    || rs.public_key_path.as_os_str().is_empty()
                {
                    return Err(ConfigError::Missing(
                        "broker.signing.rs256 key paths".to_string(),
                    ));
                }
                if rs.key_id.trim().is_empty() {
                    return Err(ConfigError::Missing(
                        "broker.signing.rs256.key_id".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// HS256 settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct Hs256Config {
    /// Shared secret, at least [`MIN_SECRET_LENGTH`] characters.
    pub secret: String,
}

impl fmt::Debug for Hs256Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hs256Config")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// RS256 settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rs256Config {
    /// PEM file holding the private key (PKCS#1 or PKCS#8).
    pub private_key_path: PathBuf,
    /// PEM file holding the public key (SPKI).
    pub public_key_path: PathBuf,
    /// Key id stamped into token headers and published in the JWKS.
    pub key_id: String,
}

/// Default membership service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Base URL; `{{AUDIENCE}}` is replaced by the request audience.
    pub base_url: String,
}

/// Authorization policy for one audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudiencePolicy {
    /// Audience name, matched exactly.
    pub name: String,

    /// Whether membership must be checked for this audience.
    #[serde(default)]
    pub authorize: bool,

    /// Membership service base URL used instead of the default one.
    #[serde(default)]
    pub authorize_url: Option<String>,

    /// Fixed post-login redirect target.
    #[serde(default)]
    pub redirect: Option<String>,
}

/// Microsoft (Azure AD v2) provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct MicrosoftConfig {
    pub client_id: String,
    pub client_secret: String,

    /// Callback path relative to the public base URL.
    #[serde(default = "default_microsoft_callback")]
    pub callback_path: String,

    /// Key set used to verify identity tokens.
    #[serde(default = "default_microsoft_jwks_uri")]
    pub jwks_uri: String,

    /// Accepted issuers: exact values or regular expressions matched
    /// against the whole `iss` claim.
    #[serde(default = "default_microsoft_issuers")]
    pub issuers: Vec<String>,

    #[serde(default = "default_microsoft_authorization_endpoint")]
    pub authorization_endpoint: String,

    #[serde(default = "default_microsoft_token_endpoint")]
    pub token_endpoint: String,
}

impl fmt::Debug for MicrosoftConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrosoftConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("callback_path", &self.callback_path)
            .field("jwks_uri", &self.jwks_uri)
            .field("issuers", &self.issuers)
            .finish_non_exhaustive()
    }
}

impl MicrosoftConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_provider("microsoft", &self.client_id, &self.issuers)?;
        for pattern in &self.issuers {
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::InvalidValue(format!("invalid issuer pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}

/// Google provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,

    #[serde(default = "default_google_callback")]
    pub callback_path: String,

    #[serde(default = "default_google_jwks_uri")]
    pub jwks_uri: String,

    /// Accepted issuers, compared exactly.
    #[serde(default = "default_google_issuers")]
    pub issuers: Vec<String>,

    #[serde(default = "default_google_authorization_endpoint")]
    pub authorization_endpoint: String,

    #[serde(default = "default_google_token_endpoint")]
    pub token_endpoint: String,
}

impl fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("callback_path", &self.callback_path)
            .field("jwks_uri", &self.jwks_uri)
            .field("issuers", &self.issuers)
            .finish_non_exhaustive()
    }
}

impl GoogleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_provider("google", &self.client_id, &self.issuers)
    }
}

fn validate_provider(name: &str, client_id: &str, issuers: &[String]) -> Result<(), ConfigError> {
    if client_id.trim().is_empty() {
        return Err(ConfigError::Missing(format!("broker.{name}.client_id")));
    }
    if issuers.is_empty() {
        return Err(ConfigError::InvalidValue(format!(
            "broker.{name}.issuers cannot be empty"
        )));
    }
    Ok(())
}

fn default_microsoft_callback() -> String {
    "callback/microsoft".to_string()
}

fn default_microsoft_jwks_uri() -> String {
    "https://login.microsoftonline.com/common/discovery/v2.0/keys".to_string()
}

fn default_microsoft_issuers() -> Vec<String> {
    vec![r"https://login\.microsoftonline\.com/[0-9a-fA-F-]{36}/v2\.0".to_string()]
}

fn default_microsoft_authorization_endpoint() -> String {
    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize".to_string()
}

fn default_microsoft_token_endpoint() -> String {
    "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string()
}

fn default_google_callback() -> String {
    "callback/google".to_string()
}

fn default_google_jwks_uri() -> String {
    "https://www.googleapis.com/oauth2/v3/certs".to_string()
}

fn default_google_issuers() -> Vec<String> {
    vec![
        "accounts.google.com".to_string(),
        "https://accounts.google.com".to_string(),
    ]
}

fn default_google_authorization_endpoint() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_google_token_endpoint() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}
