//! JWKS endpoint HTTP handler.
//!
//! Provides `/oauth2/v1/certs`, the public keys downstream services use to
//! verify broker tokens. The set is empty when tokens are signed with HS256.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::BrokerState;

/// Handler for `GET /oauth2/v1/certs`.
///
/// Returns 200 OK with the key set and a `Cache-Control` header allowing
/// caching for one hour.
///
/// ```json
/// {
///   "keys": [
///     { "kty": "RSA", "kid": "key-1", "use": "sig", "alg": "RS256", "n": "...", "e": "AQAB" }
///   ]
/// }
/// ```
pub async fn jwks_handler(State(state): State<BrokerState>) -> impl IntoResponse {
    let jwks = state.broker.token_maker().jwks();
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        Json(jwks),
    )
}
