//! Login page and provider selection.
//!
//! ```text
//! GET /?state={device code}&audience=...&redirect=...
//!     ├─► invalid device code → treated as absent
//!     ├─► no audience + device code → 400
//!     ├─► no audience → default audience
//!     ├─► invalid audience → 400
//!     └─► login page
//!
//! POST /authorize (form: code, audience, provider, redirect, tenant)
//!     ├─► invalid audience or provider → 400
//!     └─► 302 to the provider authorization URL
//! ```

use axum::Form;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;

use super::templates::{LoginForm, render_login_page};
use super::{BrokerState, found, message_page};
use crate::identity::{LoginState, Provider, is_valid_audience, is_valid_device_code, is_valid_tenant};

const MISSING_AUDIENCE_FOR_DEVICE: &str = "Missing audience parameter when device login active.";
const INVALID_AUDIENCE: &str = "Missing or invalid audience parameter";
const INVALID_PROVIDER: &str = "Missing or invalid provider parameter";

/// Query of `GET /`. `state` carries the device pairing code.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub redirect: String,
}

/// Form posted to `/authorize`.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeForm {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub redirect: String,
    #[serde(default)]
    pub tenant: String,
}

fn device_code(raw: &str) -> Option<&str> {
    if raw.is_empty() {
        return None;
    }
    if is_valid_device_code(raw) {
        Some(raw)
    } else {
        tracing::info!("Invalid device code, continuing without device login");
        None
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

/// Handler for `GET /`.
pub async fn login_page_handler(
    State(state): State<BrokerState>,
    Query(query): Query<LoginQuery>,
) -> Response {
    tracing::debug!("Login page requested");

    let code = device_code(&query.state);
    if query.audience.is_empty() && code.is_some() {
        return message_page(StatusCode::BAD_REQUEST, MISSING_AUDIENCE_FOR_DEVICE);
    }

    let audience = if query.audience.is_empty() {
        state.default_audience.as_str()
    } else {
        query.audience.as_str()
    };
    if !is_valid_audience(audience) {
        return message_page(StatusCode::BAD_REQUEST, INVALID_AUDIENCE);
    }

    let form = LoginForm {
        code,
        audience,
        redirect: non_empty(&query.redirect),
    };
    Html(render_login_page(&form, &state.broker.providers())).into_response()
}

/// Handler for `POST /authorize`.
pub async fn authorize_handler(
    State(state): State<BrokerState>,
    Form(form): Form<AuthorizeForm>,
) -> Response {
    let code = device_code(&form.code);

    if !is_valid_audience(&form.audience) {
        return message_page(StatusCode::BAD_REQUEST, INVALID_AUDIENCE);
    }

    let provider = match form.provider.parse::<Provider>() {
        Ok(provider) if provider.is_federated() => provider,
        _ => return message_page(StatusCode::BAD_REQUEST, INVALID_PROVIDER),
    };

    let mut login = LoginState::new(&form.audience);
    if let Some(code) = code {
        login = login.with_device_code(code);
    }
    if let Some(redirect) = non_empty(&form.redirect) {
        login = login.with_redirect(redirect);
    }
    if !form.tenant.is_empty() {
        if is_valid_tenant(&form.tenant) {
            login = login.with_tenant(&form.tenant);
        } else {
            tracing::info!("Ignoring invalid tenant hint");
        }
    }

    match state.broker.begin_login(provider, login) {
        Ok(url) => {
            tracing::debug!(
                provider = %provider,
                audience = %form.audience,
                "Redirecting to {}",
                url.as_str().split('?').next().unwrap_or("")
            );
            found(url.as_str())
        }
        Err(e) => {
            tracing::warn!(provider = %provider, error = %e, "Cannot start login");
            e.into_response()
        }
    }
}
