use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// PKCE S256 code challenge
#[derive(Clone)]
pub struct CodeChallenge {
    /// base64url(sha256(verifier))
    pub value: String,
    pub method: &'static str,
    pub verifier: String,
}

impl CodeChallenge {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        Self {
            value: URL_SAFE_NO_PAD.encode(digest),
            method: "S256",
            verifier,
        }
    }
}

impl std::fmt::Debug for CodeChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeChallenge")
            .field("value", &self.value)
            .field("method", &self.method)
            .field("verifier", &"[REDACTED]")
            .finish()
    }
}

/// Random base64url OAuth `state` from `bytes` random bytes
pub fn random_state(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
