//! Claims carried by broker-issued tokens.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::identity::{CanonicalIdentity, MembershipRecord, Provider};

/// Payload of a token minted by the broker.
///
/// `aud` is always a single audience name. Optional fields and an empty
/// role list are omitted from the encoded token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub iss: String,
    pub jti: Uuid,
    pub upn: String,
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl TokenPayload {
    /// Builds a payload for `identity` valid for `duration` from now.
    ///
    /// Roles are copied from `membership` when present.
    #[must_use]
    pub fn new(
        identity: &CanonicalIdentity,
        issuer: &str,
        duration: Duration,
        membership: Option<&MembershipRecord>,
    ) -> Self {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let lifetime = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX);
        Self {
            iss: issuer.to_string(),
            jti: Uuid::new_v4(),
            upn: identity.upn.clone(),
            aud: identity.audience.clone(),
            name: identity.name.clone(),
            provider: Some(identity.provider),
            tenant: identity.tenant.clone(),
            iat,
            exp: iat.saturating_add(lifetime),
            roles: membership.map(|m| m.roles.clone()).unwrap_or_default(),
        }
    }

    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// Returns `true` once the expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc().unix_timestamp() > self.exp
    }
}
