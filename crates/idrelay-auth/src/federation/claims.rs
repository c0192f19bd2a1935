//! Typed access to identity token claims.
//!
//! Each provider declares which claims it reads through [`ClaimProfile`];
//! [`IdTokenClaims::extract`] applies a profile and reports a named error
//! for every claim that is missing or has the wrong type.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::error::AdapterError;
use crate::identity::{CanonicalIdentity, LoginState, Provider};

/// Claim names a provider reads from its identity tokens.
pub trait ClaimProfile {
    /// Provider the claims come from.
    const PROVIDER: Provider;

    /// Candidate principal-name claims, in priority order. The first one
    /// present wins.
    const PRINCIPAL_CLAIMS: &'static [&'static str];

    /// Display-name claim; required when set.
    const NAME_CLAIM: Option<&'static str> = None;

    /// Tenant claim; required when set.
    const TENANT_CLAIM: Option<&'static str> = None;
}

/// The validated claim set of an identity token.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct IdTokenClaims(Map<String, Value>);

impl IdTokenClaims {
    /// Wraps a raw claim map.
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Returns the string value of `claim`, `None` if absent.
    ///
    /// # Errors
    /// Returns `AdapterError::MalformedClaim` if the claim is present but not
    /// a string.
    pub fn optional_str(&self, claim: &str) -> Result<Option<&str>, AdapterError> {
        match self.0.get(claim) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(AdapterError::malformed_claim(claim)),
        }
    }

    /// Returns the first present claim among `claims`.
    ///
    /// # Errors
    /// Returns `AdapterError::MalformedClaim` for the first candidate that is
    /// present with a non-string value.
    pub fn first_str(&self, claims: &[&str]) -> Result<Option<&str>, AdapterError> {
        for claim in claims {
            if let Some(value) = self.optional_str(claim)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Builds the canonical identity for `state` according to profile `P`.
    ///
    /// # Errors
    /// Returns `NoPrincipalClaim`, `NoNameClaim` or `NoTenantClaim` when a
    /// required claim is missing, or `MalformedClaim` when a claim has the
    /// wrong type.
    pub fn extract<P: ClaimProfile>(
        &self,
        state: LoginState,
    ) -> Result<CanonicalIdentity, AdapterError> {
        let upn = self
            .first_str(P::PRINCIPAL_CLAIMS)?
            .ok_or(AdapterError::NoPrincipalClaim)?;

        let name = match P::NAME_CLAIM {
            Some(claim) => Some(
                self.optional_str(claim)?
                    .ok_or(AdapterError::NoNameClaim)?
                    .to_string(),
            ),
            None => None,
        };

        let tenant = match P::TENANT_CLAIM {
            Some(claim) => Some(
                self.optional_str(claim)?
                    .ok_or(AdapterError::NoTenantClaim)?
                    .to_string(),
            ),
            None => None,
        };

        let mut identity = CanonicalIdentity::from_state(state, P::PROVIDER, upn);
        identity.name = name;
        if tenant.is_some() {
            identity.tenant = tenant;
        }
        Ok(identity)
    }
}
