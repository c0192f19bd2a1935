//! Identity types shared by the adapters, the router and the token maker.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Role granted to internal service-to-service tokens.
pub const ROLE_SYSTEM: &str = "SYSTEM";
/// Organisation administrator role as issued by the membership service.
pub const ROLE_ADMINISTRATOR: &str = "ADMINISTRATOR";
/// Regular member role as issued by the membership service.
pub const ROLE_USER: &str = "USER";

static DEVICE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-_:]{32,72}$").expect("Invalid device code regex"));
static AUDIENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9-]{2,63}$").expect("Invalid audience regex"));
static TENANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.\-]{1,64}$").expect("Invalid tenant regex"));

/// Returns `true` if `code` looks like a device pairing code.
#[must_use]
pub fn is_valid_device_code(code: &str) -> bool {
    DEVICE_CODE_RE.is_match(code)
}

/// Returns `true` if `audience` is a valid audience name. Valid names are
/// also valid DNS labels, so they can be used as a redirect subdomain.
#[must_use]
pub fn is_valid_audience(audience: &str) -> bool {
    AUDIENCE_RE.is_match(audience)
}

/// Returns `true` if `tenant` can be spliced into a provider URL path.
#[must_use]
pub fn is_valid_tenant(tenant: &str) -> bool {
    TENANT_RE.is_match(tenant)
}

/// Upstream identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Microsoft,
    Google,
    /// Identity asserted without an upstream provider (internal callers).
    Direct,
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Microsoft => "microsoft",
            Self::Google => "google",
            Self::Direct => "direct",
        }
    }

    /// Returns `true` for providers a user can log in with.
    #[must_use]
    pub fn is_federated(&self) -> bool {
        matches!(self, Self::Microsoft | Self::Google)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown provider name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "microsoft" => Ok(Self::Microsoft),
            "google" => Ok(Self::Google),
            "direct" => Ok(Self::Direct),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Login context carried through the upstream provider in the OAuth2
/// `state` parameter.
///
/// Empty fields are omitted from the encoded form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    /// Device pairing code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub audience: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,

    /// Post-login redirect hint forwarded to the relying application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,

    /// Tenant hint for providers with tenant-specific endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

impl LoginState {
    /// Creates a state for the given audience.
    #[must_use]
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            ..Self::default()
        }
    }

    /// Sets the device pairing code.
    #[must_use]
    pub fn with_device_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the redirect hint.
    #[must_use]
    pub fn with_redirect(mut self, redirect: impl Into<String>) -> Self {
        self.redirect = Some(redirect.into());
        self
    }

    /// Sets the tenant hint.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Encodes the state as the JSON blob passed to the provider.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a state blob returned by the provider.
    ///
    /// # Errors
    /// Returns an error if the blob is not a valid state document.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Normalized identity produced by a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalIdentity {
    /// User principal name, the primary identifier.
    pub upn: String,
    pub name: Option<String>,
    pub tenant: Option<String>,
    pub provider: Provider,
    /// Present when the login pairs a device.
    pub device_code: Option<String>,
    pub audience: String,
    pub redirect: Option<String>,
}

impl CanonicalIdentity {
    /// Creates an identity for `upn` in `audience` with no optional fields.
    #[must_use]
    pub fn new(upn: impl Into<String>, audience: impl Into<String>, provider: Provider) -> Self {
        Self {
            upn: upn.into(),
            name: None,
            tenant: None,
            provider,
            device_code: None,
            audience: audience.into(),
            redirect: None,
        }
    }

    /// Builds an identity from the decoded login state.
    ///
    /// Empty strings in the state are treated as absent.
    #[must_use]
    pub fn from_state(state: LoginState, provider: Provider, upn: impl Into<String>) -> Self {
        Self {
            upn: upn.into(),
            name: None,
            tenant: state.tenant.filter(|t| !t.is_empty()),
            provider,
            device_code: state.code.filter(|c| !c.is_empty()),
            audience: state.audience,
            redirect: state.redirect.filter(|r| !r.is_empty()),
        }
    }
}

/// User record returned by the membership service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipRecord {
    pub upn: String,
    pub origin: String,
    pub name: String,
    pub roles: Vec<String>,
}

impl MembershipRecord {
    /// Record carrying only the given roles.
    #[must_use]
    pub fn with_roles(roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_code_validation() {
        assert!(is_valid_device_code("0123456789abcdef0123456789abcdef"));
        assert!(is_valid_device_code(
            "device:0123456789-abcdef_0123456789abcdef"
        ));
        assert!(!is_valid_device_code("short"));
        assert!(!is_valid_device_code(&"a".repeat(73)));
        assert!(!is_valid_device_code("0123456789abcdef0123456789abcde/"));
    }

    #[test]
    fn test_audience_validation() {
        assert!(is_valid_audience("acme"));
        assert!(is_valid_audience("acme-corp-2"));
        assert!(!is_valid_audience("ac"));
        assert!(!is_valid_audience("1acme"));
        assert!(!is_valid_audience("acme.evil.com"));
        assert!(!is_valid_audience("acme/path"));
        assert!(!is_valid_audience(&format!("a{}", "b".repeat(64))));
    }

    #[test]
    fn test_tenant_validation() {
        assert!(is_valid_tenant("contoso.onmicrosoft.com"));
        assert!(is_valid_tenant("72f988bf-86f1-41af-91ab-2d7cd011db47"));
        assert!(!is_valid_tenant("a/b"));
        assert!(!is_valid_tenant(""));
    }

    #[test]
    fn test_provider_parse_and_display() {
        assert_eq!("google".parse::<Provider>().unwrap(), Provider::Google);
        assert_eq!(Provider::Microsoft.to_string(), "microsoft");
        assert!("github".parse::<Provider>().is_err());
        assert!(!Provider::Direct.is_federated());
    }

    #[test]
    fn test_login_state_omits_empty_fields() {
        let state = LoginState::new("acme");
        assert_eq!(state.encode().unwrap(), r#"{"audience":"acme"}"#);

        let state = LoginState::new("acme")
            .with_device_code("0123456789abcdef0123456789abcdef")
            .with_redirect("/dashboard");
        let decoded = LoginState::decode(&state.encode().unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_login_state_rejects_garbage() {
        assert!(LoginState::decode("not json").is_err());
    }

    #[test]
    fn test_identity_from_state_drops_empty_values() {
        let state = LoginState {
            code: Some(String::new()),
            audience: "acme".to_string(),
            provider: Some(Provider::Google),
            redirect: Some(String::new()),
            tenant: None,
        };
        let identity = CanonicalIdentity::from_state(state, Provider::Google, "a@b.c");
        assert_eq!(identity.device_code, None);
        assert_eq!(identity.redirect, None);
        assert_eq!(identity.audience, "acme");
    }

    #[test]
    fn test_membership_record_defaults() {
        let record: MembershipRecord = serde_json::from_str(r#"{"upn":"a@b.c"}"#).unwrap();
        assert!(record.roles.is_empty());
        assert_eq!(MembershipRecord::with_roles([ROLE_SYSTEM]).roles, vec!["SYSTEM"]);
    }
}
