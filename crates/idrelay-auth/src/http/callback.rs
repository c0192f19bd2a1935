//! Provider callback handlers.

use axum::Form;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::{BrokerState, found, message_page};
use crate::broker::BrokerOutcome;
use crate::federation::CallbackParams;
use crate::identity::Provider;

/// Confirmation shown once a device login is complete.
pub const DEVICE_LINKED_MESSAGE: &str =
    "Now you can close your browser and go back to your application.";

/// Handler for `POST /callback/microsoft`.
pub async fn microsoft_callback_handler(
    State(state): State<BrokerState>,
    Form(params): Form<CallbackParams>,
) -> Response {
    handle_callback(&state, Provider::Microsoft, &params).await
}

/// Handler for `POST /callback/google`.
pub async fn google_callback_handler(
    State(state): State<BrokerState>,
    Form(params): Form<CallbackParams>,
) -> Response {
    handle_callback(&state, Provider::Google, &params).await
}

async fn handle_callback(
    state: &BrokerState,
    provider: Provider,
    params: &CallbackParams,
) -> Response {
    tracing::debug!(provider = %provider, "Provider callback");

    match state.broker.complete_login(provider, params).await {
        Ok(BrokerOutcome::Redirect(url)) => found(url.as_str()),
        Ok(BrokerOutcome::DeviceLinked) => message_page(StatusCode::OK, DEVICE_LINKED_MESSAGE),
        Err(e) => {
            if e.is_client_error() {
                tracing::warn!(
                    provider = %provider,
                    category = %e.category(),
                    status = e.status_code(),
                    error = %e,
                    "Login rejected"
                );
            } else {
                tracing::error!(
                    provider = %provider,
                    category = %e.category(),
                    status = e.status_code(),
                    error = %e,
                    "Login failed"
                );
            }
            e.into_response()
        }
    }
}
