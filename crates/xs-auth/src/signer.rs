use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use chrono::Utc;
use p256::ecdsa::{Signature, SigningKey, signature::Signer};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{Result, XsAuthError};

/// Seconds between 1601-01-01 and the Unix epoch
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;
const SIGNATURE_POLICY_VERSION: i32 = 1;

/// P-256 key in JWK form
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

impl std::fmt::Debug for Jwk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("d", &self.d.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Persisted signing key set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtKeys {
    pub jwt: Jwk,
}

/// Proof-of-possession key used to sign Xbox Live requests
#[derive(Clone)]
pub struct RequestSigner {
    key: SigningKey,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestSigner([REDACTED])")
    }
}

impl RequestSigner {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Restore the key from a persisted key set
    pub fn from_jwt_keys(keys: &JwtKeys) -> Result<Self> {
        let d = keys
            .jwt
            .d
            .as_deref()
            .ok_or_else(|| XsAuthError::Crypto("JWK has no private component".to_string()))?;
        let mut bytes = URL_SAFE_NO_PAD
            .decode(d)
            .map_err(|e| XsAuthError::Crypto(e.to_string()))?;
        let key = SigningKey::from_slice(&bytes).map_err(|e| XsAuthError::Crypto(e.to_string()));
        bytes.zeroize();

        Ok(Self { key: key? })
    }

    /// Public part of the key as sent in `ProofKey` fields
    pub fn proof_key(&self) -> Jwk {
        let point = p256::PublicKey::from(self.key.verifying_key()).to_encoded_point(false);
        let coordinate = |bytes: Option<&p256::FieldBytes>| {
            bytes.map(|b| URL_SAFE_NO_PAD.encode(b)).unwrap_or_default()
        };

        Jwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: coordinate(point.x()),
            y: coordinate(point.y()),
            d: None,
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
        }
    }

    /// Full key set including the private scalar, for persistence
    pub fn jwt_keys(&self) -> JwtKeys {
        let mut jwt = self.proof_key();
        jwt.d = Some(URL_SAFE_NO_PAD.encode(self.key.to_bytes()));
        JwtKeys { jwt }
    }

    /// `Signature` header value for a POST to `path`
    pub fn sign(&self, path: &str, authorization: &str, body: &[u8]) -> String {
        self.sign_at(windows_timestamp(Utc::now().timestamp()), path, authorization, body)
    }

    pub(crate) fn sign_at(
        &self,
        timestamp: u64,
        path: &str,
        authorization: &str,
        body: &[u8],
    ) -> String {
        let message = signing_message(timestamp, path, authorization, body);
        let signature: Signature = self.key.sign(&message);

        let mut header = Vec::with_capacity(12 + 64);
        header.extend_from_slice(&SIGNATURE_POLICY_VERSION.to_be_bytes());
        header.extend_from_slice(&timestamp.to_be_bytes());
        header.extend_from_slice(&signature.to_bytes());
        STANDARD.encode(header)
    }

    #[cfg(test)]
    pub(crate) fn verifying_key(&self) -> &p256::ecdsa::VerifyingKey {
        self.key.verifying_key()
    }
}

/// Unix seconds to a Windows FILETIME (100ns ticks since 1601)
pub(crate) fn windows_timestamp(unix_secs: i64) -> u64 {
    (unix_secs.max(0) as u64 + FILETIME_EPOCH_OFFSET) * 10_000_000
}

/// Policy version 1 buffer: every field is followed by a NUL byte
pub(crate) fn signing_message(
    timestamp: u64,
    path: &str,
    authorization: &str,
    body: &[u8],
) -> Vec<u8> {
    let mut buf =
        Vec::with_capacity(5 + 9 + 5 + path.len() + 1 + authorization.len() + 1 + body.len() + 1);
    buf.extend_from_slice(&SIGNATURE_POLICY_VERSION.to_be_bytes());
    buf.push(0);
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.push(0);
    buf.extend_from_slice(b"POST");
    buf.push(0);
    buf.extend_from_slice(path.as_bytes());
    buf.push(0);
    buf.extend_from_slice(authorization.as_bytes());
    buf.push(0);
    buf.extend_from_slice(body);
    buf.push(0);
    buf
}
