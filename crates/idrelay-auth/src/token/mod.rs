//! Broker-issued tokens.
//!
//! - [`payload`]: the claims carried by every token
//! - [`jwt`]: HS256/RS256 signing, verification and key publication

pub mod jwt;
pub mod payload;

pub use jwt::{IssuedToken, Jwk, Jwks, SigningKeyPair, TokenError, TokenMaker};
pub use payload::TokenPayload;
