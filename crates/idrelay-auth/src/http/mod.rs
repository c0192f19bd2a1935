//! Axum HTTP handlers for the broker endpoints.
//!
//! # Available Handlers
//!
//! - [`login`] - login page and `POST /authorize`
//! - [`callback`] - provider callbacks
//! - [`jwks`] - published verification keys
//! - [`discovery`] - OpenID discovery document

pub mod callback;
pub mod discovery;
pub mod jwks;
pub mod login;
pub mod templates;

use std::sync::Arc;

use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};

pub use callback::{google_callback_handler, microsoft_callback_handler};
pub use discovery::openid_configuration_handler;
pub use jwks::jwks_handler;
pub use login::{authorize_handler, login_page_handler};

use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use templates::render_message_page;

/// Shared state of the broker endpoints.
#[derive(Clone)]
pub struct BrokerState {
    pub broker: Arc<Broker>,
    /// Issuer advertised by discovery.
    pub issuer: String,
    /// Audience used by the login page when the query has none.
    pub default_audience: String,
}

impl BrokerState {
    #[must_use]
    pub fn new(
        broker: Arc<Broker>,
        issuer: impl Into<String>,
        default_audience: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            issuer: issuer.into(),
            default_audience: default_audience.into(),
        }
    }

    /// Builds the broker and the state from configuration.
    ///
    /// # Errors
    /// See [`Broker::from_config`].
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let broker = Broker::from_config(config)?;
        Ok(Self::new(
            Arc::new(broker),
            &config.issuer,
            &config.default_audience,
        ))
    }
}

/// Routes served by the broker.
pub fn router(state: BrokerState) -> Router {
    Router::new()
        .route("/", get(login_page_handler))
        .route("/authorize", post(authorize_handler))
        .route("/callback/microsoft", post(microsoft_callback_handler))
        .route("/callback/google", post(google_callback_handler))
        .route("/oauth2/v1/certs", get(jwks_handler))
        .route(
            "/.well-known/openid-configuration",
            get(openid_configuration_handler),
        )
        .with_state(state)
}

/// `302 Found` to `location`.
///
/// [`axum::response::Redirect`] only offers 303, 307 and 308.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Page showing `message` with `status`.
pub(crate) fn message_page(status: StatusCode, message: &str) -> Response {
    (status, Html(render_message_page(message))).into_response()
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self {
            // provider failures are answered in plain text
            Self::Adapter(_) => (status, self.user_message()).into_response(),
            _ => message_page(status, &self.user_message()),
        }
    }
}
