//! Shared fixtures for unit tests.

use std::sync::OnceLock;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{Value, json};

/// An RSA key pair in the encodings the tests need.
pub struct TestRsaKey {
    pub private_pem: String,
    pub public_pem: String,
    pub n: String,
    pub e: String,
}

/// Returns a process-wide 2048-bit RSA key; generation is slow, so it is
/// done once.
pub fn rsa_key() -> &'static TestRsaKey {
    static KEY: OnceLock<TestRsaKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("generate RSA key");
        let public_key = private_key.to_public_key();
        TestRsaKey {
            private_pem: private_key
                .to_pkcs8_pem(LineEnding::LF)
                .expect("encode private key")
                .to_string(),
            public_pem: public_key
                .to_public_key_pem(LineEnding::LF)
                .expect("encode public key"),
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }
    })
}

/// A JWKS document publishing the test key under each of `kids`.
pub fn jwks_document(kids: &[&str]) -> Value {
    let key = rsa_key();
    let keys: Vec<Value> = kids
        .iter()
        .map(|kid| {
            json!({
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": kid,
                "n": key.n,
                "e": key.e,
            })
        })
        .collect();
    json!({ "keys": keys })
}

/// Signs `claims` with the test key as an upstream provider would.
pub fn sign_id_token(kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(rsa_key().private_pem.as_bytes()).expect("encoding key");
    jsonwebtoken::encode(&header, claims, &key).expect("sign id token")
}

/// Current Unix time in seconds.
pub fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
