//! Broker error types.
//!
//! [`BrokerError`] is what the orchestrator and the HTTP layer report. Each
//! variant knows the status code and the message shown to the user; the
//! underlying cause is only logged.

use std::fmt;

use crate::authorization::AuthorizationError;
use crate::config::ConfigError;
use crate::federation::AdapterError;
use crate::identity::Provider;
use crate::membership::MembershipError;
use crate::token::TokenError;

/// Message shown for failures whose details must stay server side.
pub const SERVER_ERROR_MESSAGE: &str = "Server error";

/// Message shown when a provider callback cannot be processed.
pub const PROCESSING_ERROR_MESSAGE: &str = "Error when processing request.";

/// Errors that can occur while brokering a login.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// A request parameter is missing or invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Message shown to the user.
        message: String,
    },

    /// The requested provider is not configured.
    #[error("Provider not available: {0}")]
    ProviderUnavailable(Provider),

    /// The provider callback could not be turned into an identity.
    #[error("Identity provider error: {0}")]
    Adapter(#[from] AdapterError),

    /// The user is not a member of the audience.
    #[error("User {upn} is not a member of {audience}")]
    NotMember {
        /// User principal name.
        upn: String,
        /// Audience the user tried to log in to.
        audience: String,
    },

    /// The membership service could not answer the authorization check.
    #[error("Authorization backend unavailable: {0}")]
    BackendUnavailable(#[source] MembershipError),

    /// The broker token could not be minted.
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// The membership service rejected or failed the device pairing.
    #[error("Device pairing failed: {0}")]
    DeviceLink(#[source] MembershipError),

    /// The post-login redirect target could not be built.
    #[error("Invalid redirect: {message}")]
    InvalidRedirect {
        /// Description of the problem.
        message: String,
    },

    /// The broker is misconfigured.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl BrokerError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRedirect` error.
    #[must_use]
    pub fn invalid_redirect(message: impl Into<String>) -> Self {
        Self::InvalidRedirect {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// HTTP status code reported for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } | Self::ProviderUnavailable(_) => 400,
            Self::Adapter(_) => 401,
            Self::NotMember { .. } => 404,
            Self::BackendUnavailable(_)
            | Self::Token(_)
            | Self::DeviceLink(_)
            | Self::InvalidRedirect { .. }
            | Self::Configuration { .. } => 500,
        }
    }

    /// Message safe to show to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidRequest { message } => message.clone(),
            Self::ProviderUnavailable(_) => "Missing or invalid provider parameter".to_string(),
            Self::Adapter(_) | Self::BackendUnavailable(_) => PROCESSING_ERROR_MESSAGE.to_string(),
            Self::NotMember { upn, audience } => format!(
                "User: {upn} is not member in the organisation {}.",
                audience.to_uppercase()
            ),
            Self::Token(_)
            | Self::DeviceLink(_)
            | Self::InvalidRedirect { .. }
            | Self::Configuration { .. } => SERVER_ERROR_MESSAGE.to_string(),
        }
    }

    /// Returns `true` for failures caused by the caller or the user.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns the error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. } | Self::ProviderUnavailable(_) => ErrorCategory::Validation,
            Self::Adapter(_) => ErrorCategory::Federation,
            Self::NotMember { .. } => ErrorCategory::Authorization,
            Self::BackendUnavailable(_) | Self::DeviceLink(_) => ErrorCategory::Membership,
            Self::Token(_) => ErrorCategory::Token,
            Self::InvalidRedirect { .. } | Self::Configuration { .. } => {
                ErrorCategory::Configuration
            }
        }
    }
}

impl From<AuthorizationError> for BrokerError {
    fn from(err: AuthorizationError) -> Self {
        match err {
            AuthorizationError::NotMember { upn, audience } => Self::NotMember { upn, audience },
            AuthorizationError::BackendUnavailable(e) => Self::BackendUnavailable(e),
        }
    }
}

impl From<ConfigError> for BrokerError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Categories of broker errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    Federation,
    Authorization,
    Membership,
    Token,
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Federation => write!(f, "federation"),
            Self::Authorization => write!(f, "authorization"),
            Self::Membership => write!(f, "membership"),
            Self::Token => write!(f, "token"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(BrokerError::invalid_request("x").status_code(), 400);
        assert_eq!(BrokerError::ProviderUnavailable(Provider::Google).status_code(), 400);
        assert_eq!(
            BrokerError::from(AdapterError::MissingIdentityToken).status_code(),
            401
        );
        assert_eq!(
            BrokerError::DeviceLink(MembershipError::UserNotFound).status_code(),
            500
        );
        assert_eq!(BrokerError::from(TokenError::Expired).status_code(), 500);
    }

    #[test]
    fn test_not_member_message_upper_cases_audience() {
        let err = BrokerError::from(AuthorizationError::NotMember {
            upn: "alice@example.com".to_string(),
            audience: "acme".to_string(),
        });
        assert_eq!(err.status_code(), 404);
        assert_eq!(
            err.user_message(),
            "User: alice@example.com is not member in the organisation ACME."
        );
        assert!(err.is_client_error());
        assert_eq!(err.category(), ErrorCategory::Authorization);
    }

    #[test]
    fn test_backend_errors_hide_details() {
        let err = BrokerError::from(AuthorizationError::BackendUnavailable(
            MembershipError::Transport("connection refused 10.0.0.3".to_string()),
        ));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.user_message(), PROCESSING_ERROR_MESSAGE);
        assert!(!err.user_message().contains("10.0.0.3"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err = BrokerError::from(ConfigError::Missing("broker.issuer".to_string()));
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().contains("broker.issuer"));
    }
}
