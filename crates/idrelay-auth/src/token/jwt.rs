//! Broker token signing and verification.
//!
//! [`TokenMaker`] mints and verifies the broker's own tokens with one of two
//! strategies, selected once at startup:
//!
//! - **HS256**: a shared secret of at least 32 characters. Tokens carry no
//!   `kid` header and the published key set is empty.
//! - **RS256**: an RSA key pair loaded from PEM files. Tokens carry the
//!   configured `kid`, and the public key is published as a JWK.
//!
//! Verification only accepts the algorithm of the active strategy, so a
//! token signed under the other scheme is rejected as invalid.
//!
//! ## Example
//!
//! ```ignore
//! use idrelay_auth::token::jwt::TokenMaker;
//!
//! let maker = TokenMaker::hs256(&secret, "https://login.example.com")?;
//! let issued = maker.issue(&identity, None)?;
//! let payload = maker.verify_token(&issued.token)?;
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::payload::TokenPayload;
use crate::config::{BrokerConfig, MIN_SECRET_LENGTH, SigningMethod};
use crate::identity::{CanonicalIdentity, MembershipRecord, ROLE_SYSTEM};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while minting or verifying tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token could not be signed.
    #[error("Failed to sign token: {0}")]
    Signing(String),

    /// The token is malformed, has a bad signature or wrong claims.
    #[error("Token is invalid: {0}")]
    Invalid(String),

    /// The token is well signed but past its expiry.
    #[error("Token has expired")]
    Expired,

    /// Key material could not be loaded.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The signing configuration is unusable.
    #[error("Signing configuration error: {0}")]
    Configuration(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid(err.to_string()),
        }
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// Public RSA signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    pub kty: String,
    /// RSA modulus (base64url encoded).
    pub n: String,
    /// RSA exponent (base64url encoded).
    pub e: String,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// An RSA key pair used for RS256.
pub struct SigningKeyPair {
    /// Key ID.
    pub kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    n: Vec<u8>,
    e: Vec<u8>,
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKeyPair {
    /// Loads a key pair from PEM strings.
    ///
    /// The private key may be PKCS#1 or PKCS#8, the public key must be SPKI.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKey` if either PEM cannot be parsed.
    pub fn from_pem(
        kid: impl Into<String>,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, TokenError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| TokenError::InvalidKey(format!("private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| TokenError::InvalidKey(format!("public key: {e}")))?;

        // Parse public key to extract n and e
        let public_key = RsaPublicKey::from_public_key_pem(public_pem)
            .map_err(|e| TokenError::InvalidKey(format!("public key: {e}")))?;

        Ok(Self {
            kid: kid.into(),
            encoding_key,
            decoding_key,
            n: public_key.n().to_bytes_be(),
            e: public_key.e().to_bytes_be(),
        })
    }

    /// Loads a key pair from PEM files.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKey` if a file cannot be read or parsed.
    pub fn from_pem_files(
        kid: impl Into<String>,
        private_key_path: &Path,
        public_key_path: &Path,
    ) -> Result<Self, TokenError> {
        let private_pem = std::fs::read_to_string(private_key_path).map_err(|e| {
            TokenError::InvalidKey(format!("{}: {e}", private_key_path.display()))
        })?;
        let public_pem = std::fs::read_to_string(public_key_path).map_err(|e| {
            TokenError::InvalidKey(format!("{}: {e}", public_key_path.display()))
        })?;
        Self::from_pem(kid, &private_pem, &public_pem)
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: "RS256".to_string(),
            kty: "RSA".to_string(),
            n: URL_SAFE_NO_PAD.encode(&self.n),
            e: URL_SAFE_NO_PAD.encode(&self.e),
        }
    }
}

// ============================================================================
// Token Maker
// ============================================================================

enum SigningStrategy {
    Symmetric {
        encoding_key: EncodingKey,
        decoding_key: DecodingKey,
    },
    Asymmetric(SigningKeyPair),
}

/// A freshly minted token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact JWS form.
    pub token: String,
    pub payload: TokenPayload,
    pub expires_at: OffsetDateTime,
}

/// Mints and verifies broker tokens.
///
/// The maker is immutable and can be shared across tasks behind an `Arc`.
pub struct TokenMaker {
    issuer: String,
    strategy: SigningStrategy,
    token_lifetime: Duration,
    internal_lifetime: Duration,
}

impl fmt::Debug for TokenMaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenMaker")
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm())
            .field("key_id", &self.key_id())
            .field("token_lifetime", &self.token_lifetime)
            .field("internal_lifetime", &self.internal_lifetime)
            .finish()
    }
}

impl TokenMaker {
    const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(600);
    const DEFAULT_INTERNAL_LIFETIME: Duration = Duration::from_secs(60);

    /// Creates an HS256 maker.
    ///
    /// # Errors
    /// Returns `TokenError::Configuration` if the secret is shorter than 32
    /// characters.
    pub fn hs256(secret: &str, issuer: impl Into<String>) -> Result<Self, TokenError> {
        if secret.chars().count() < MIN_SECRET_LENGTH {
            return Err(TokenError::Configuration(format!(
                "HS256 secret must be at least {MIN_SECRET_LENGTH} characters"
            )));
        }
        Ok(Self::with_strategy(
            issuer,
            SigningStrategy::Symmetric {
                encoding_key: EncodingKey::from_secret(secret.as_bytes()),
                decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            },
        ))
    }

    /// Creates an RS256 maker.
    #[must_use]
    pub fn rs256(key_pair: SigningKeyPair, issuer: impl Into<String>) -> Self {
        Self::with_strategy(issuer, SigningStrategy::Asymmetric(key_pair))
    }

    /// Creates the maker described by the broker configuration, loading key
    /// files for RS256.
    ///
    /// # Errors
    /// Returns `TokenError::Configuration` if the settings for the selected
    /// method are missing, and `TokenError::InvalidKey` if key files cannot be
    /// loaded.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, TokenError> {
        let maker = match config.signing.method {
            SigningMethod::HS256 => {
                let hs = config.signing.hs256.as_ref().ok_or_else(|| {
                    TokenError::Configuration("missing hs256 settings".to_string())
                })?;
                Self::hs256(&hs.secret, &config.issuer)?
            }
            SigningMethod::RS256 => {
                let rs = config.signing.rs256.as_ref().ok_or_else(|| {
                    TokenError::Configuration("missing rs256 settings".to_string())
                })?;
                let key_pair = SigningKeyPair::from_pem_files(
                    &rs.key_id,
                    &rs.private_key_path,
                    &rs.public_key_path,
                )?;
                tracing::info!(kid = %rs.key_id, "Loaded RS256 signing key");
                Self::rs256(key_pair, &config.issuer)
            }
        };
        Ok(maker.with_lifetimes(config.token_lifetime, config.internal_token_lifetime))
    }

    fn with_strategy(issuer: impl Into<String>, strategy: SigningStrategy) -> Self {
        Self {
            issuer: issuer.into(),
            strategy,
            token_lifetime: Self::DEFAULT_TOKEN_LIFETIME,
            internal_lifetime: Self::DEFAULT_INTERNAL_LIFETIME,
        }
    }

    /// Sets the end-user and internal token lifetimes.
    #[must_use]
    pub fn with_lifetimes(mut self, token_lifetime: Duration, internal_lifetime: Duration) -> Self {
        self.token_lifetime = token_lifetime;
        self.internal_lifetime = internal_lifetime;
        self
    }

    /// Returns the issuer URL.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the algorithm of the active strategy.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        match self.strategy {
            SigningStrategy::Symmetric { .. } => Algorithm::HS256,
            SigningStrategy::Asymmetric(_) => Algorithm::RS256,
        }
    }

    /// Returns the key id stamped into headers, if any.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        match &self.strategy {
            SigningStrategy::Symmetric { .. } => None,
            SigningStrategy::Asymmetric(pair) => Some(&pair.kid),
        }
    }

    /// Returns the end-user token lifetime.
    #[must_use]
    pub fn token_lifetime(&self) -> Duration {
        self.token_lifetime
    }

    /// Mints a token for `identity` valid for `duration`.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if signing fails.
    pub fn create_token(
        &self,
        identity: &CanonicalIdentity,
        duration: Duration,
        membership: Option<&MembershipRecord>,
    ) -> Result<IssuedToken, TokenError> {
        let payload = TokenPayload::new(identity, &self.issuer, duration, membership);
        let token = self.sign(&payload)?;
        Ok(IssuedToken {
            token,
            expires_at: payload.expires_at(),
            payload,
        })
    }

    /// Mints an end-user token with the configured lifetime.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if signing fails.
    pub fn issue(
        &self,
        identity: &CanonicalIdentity,
        membership: Option<&MembershipRecord>,
    ) -> Result<IssuedToken, TokenError> {
        self.create_token(identity, self.token_lifetime, membership)
    }

    /// Mints a short-lived token with the `SYSTEM` role for calls to the
    /// membership service.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if signing fails.
    pub fn create_internal_token(&self, identity: &CanonicalIdentity) -> Result<String, TokenError> {
        let system = MembershipRecord::with_roles([ROLE_SYSTEM]);
        self.create_token(identity, self.internal_lifetime, Some(&system))
            .map(|issued| issued.token)
    }

    /// Signs an arbitrary payload.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if signing fails.
    pub fn sign(&self, payload: &TokenPayload) -> Result<String, TokenError> {
        let mut header = Header::new(self.algorithm());
        let key = match &self.strategy {
            SigningStrategy::Symmetric { encoding_key, .. } => encoding_key,
            SigningStrategy::Asymmetric(pair) => {
                header.kid = Some(pair.kid.clone());
                &pair.encoding_key
            }
        };
        encode(&header, payload, key).map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verifies a token minted by this maker.
    ///
    /// # Errors
    /// Returns `TokenError::Expired` for a well-signed token past its expiry
    /// and `TokenError::Invalid` for everything else, including tokens signed
    /// with another algorithm or issued by another issuer.
    pub fn verify_token(&self, token: &str) -> Result<TokenPayload, TokenError> {
        let mut validation = Validation::new(self.algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.validate_exp = true;
        validation.validate_aud = false; // aud is a plain audience name
        validation.leeway = 0;

        let key = match &self.strategy {
            SigningStrategy::Symmetric { decoding_key, .. } => decoding_key,
            SigningStrategy::Asymmetric(pair) => &pair.decoding_key,
        };

        let payload = decode::<TokenPayload>(token, key, &validation)?.claims;
        if payload.is_expired() {
            return Err(TokenError::Expired);
        }
        Ok(payload)
    }

    /// Returns the published key set; empty for HS256.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        match &self.strategy {
            SigningStrategy::Symmetric { .. } => Jwks::default(),
            SigningStrategy::Asymmetric(pair) => Jwks {
                keys: vec![pair.to_jwk()],
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
