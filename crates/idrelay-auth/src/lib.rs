//! # idrelay-auth
//!
//! Identity federation broker core.
//!
//! This crate provides:
//! - Microsoft and Google login adapters producing a canonical identity
//! - A single-slot cache of upstream signing keys
//! - HS256/RS256 issuance and verification of broker tokens
//! - Audience-scoped membership checks against an external service
//! - Orchestration of the callback flow and the Axum handlers serving it
//!
//! ## Modules
//!
//! - [`config`] - Broker configuration
//! - [`identity`] - Canonical identity, login state and input validation
//! - [`federation`] - Upstream identity provider adapters
//! - [`token`] - Broker token payload, signing and verification
//! - [`membership`] - Membership service client
//! - [`authorization`] - Audience-scoped authorization router
//! - [`broker`] - Login orchestration
//! - [`http`] - Axum HTTP handlers

pub mod authorization;
pub mod broker;
pub mod config;
pub mod error;
pub mod federation;
pub mod http;
pub mod identity;
pub mod membership;
pub mod token;

#[cfg(test)]
mod test_support;

pub use authorization::{AuthorizationError, AuthorizationRouter};
pub use broker::{Broker, BrokerOutcome};
pub use config::{AudiencePolicy, BrokerConfig, ConfigError, SigningMethod};
pub use error::{BrokerError, ErrorCategory};
pub use federation::{AdapterError, CallbackParams, FetchError, IdentityProviderAdapter};
pub use http::{BrokerState, router};
pub use identity::{CanonicalIdentity, LoginState, MembershipRecord, Provider};
pub use membership::{MembershipClient, MembershipError};
pub use token::{IssuedToken, TokenError, TokenMaker, TokenPayload};

/// Type alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;
