use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use xs_core::KeyValueStore;

use crate::config::REFRESH_MARGIN_SECS;
use crate::errors::Result;
use crate::signer::JwtKeys;
use crate::tokens::{Expiring, SisuToken, UserToken};

/// Key under which the token document is persisted
pub const TOKEN_STORE_KEY: &str = "user.tokenstore";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_token: Option<UserToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sisu_token: Option<SisuToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jwt_keys: Option<JwtKeys>,
}

/// User and SISU tokens plus the proof key, persisted as one document
///
/// A new user token obtained from an authorization code invalidates the SISU token
/// derived from the previous one, so the store never pairs tokens of different logins.
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    user_token: Option<UserToken>,
    sisu_token: Option<SisuToken>,
    jwt_keys: Option<JwtKeys>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_user_token", &self.user_token.is_some())
            .field("has_sisu_token", &self.sisu_token.is_some())
            .field("has_jwt_keys", &self.jwt_keys.is_some())
            .finish()
    }
}

impl TokenStore {
    /// Empty store over `backend`; call [`TokenStore::load`] to read persisted state
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            user_token: None,
            sisu_token: None,
            jwt_keys: None,
        }
    }

    /// Replace the in-memory state with the persisted document
    ///
    /// Returns whether a document was found. Malformed data leaves the store empty.
    pub async fn load(&mut self) -> bool {
        let document = match self.backend.get(TOKEN_STORE_KEY).await {
            Some(value) => parse_document(value),
            None => {
                debug!("No persisted tokens");
                None
            }
        };

        let found = document.is_some();
        let document = document.unwrap_or_default();
        self.user_token = document.user_token;
        self.sisu_token = document.sisu_token;
        self.jwt_keys = document.jwt_keys;
        found
    }

    pub async fn save(&self) -> Result<()> {
        let document = TokenDocument {
            user_token: self.user_token.clone(),
            sisu_token: self.sisu_token.clone(),
            jwt_keys: self.jwt_keys.clone(),
        };
        self.backend
            .set(TOKEN_STORE_KEY, serde_json::to_value(&document)?)
            .await?;
        Ok(())
    }

    /// Drop every token and remove the persisted document
    pub async fn clear(&mut self) -> Result<()> {
        self.user_token = None;
        self.sisu_token = None;
        self.jwt_keys = None;
        self.backend.delete(TOKEN_STORE_KEY).await?;
        Ok(())
    }

    /// Store a freshly issued user token, stamping its absolute expiry
    pub fn set_user_token(&mut self, mut token: UserToken) {
        token.expires_on = Some(Utc::now() + Duration::seconds(token.expires_in));
        self.user_token = Some(token);
    }

    /// Store a user token from a new login, discarding the SISU token of the previous one
    pub fn replace_login(&mut self, token: UserToken) {
        self.set_user_token(token);
        self.sisu_token = None;
    }

    pub fn user_token(&self) -> Option<&UserToken> {
        self.user_token.as_ref()
    }

    pub fn set_sisu_token(&mut self, token: SisuToken) {
        self.sisu_token = Some(token);
    }

    pub fn sisu_token(&self) -> Option<&SisuToken> {
        self.sisu_token.as_ref()
    }

    pub fn set_jwt_keys(&mut self, keys: JwtKeys) {
        self.jwt_keys = Some(keys);
    }

    pub fn jwt_keys(&self) -> Option<&JwtKeys> {
        self.jwt_keys.as_ref()
    }

    /// Both base tokens present with more than the refresh margin left
    pub fn has_valid_auth_tokens(&self) -> bool {
        let usable = |seconds: i64| seconds > REFRESH_MARGIN_SECS;
        match (&self.user_token, &self.sisu_token) {
            (Some(user), Some(sisu)) => usable(user.seconds_valid()) && usable(sisu.seconds_valid()),
            _ => false,
        }
    }
}

/// Accepts the document as a JSON object or as a JSON string holding one
fn parse_document(value: Value) -> Option<TokenDocument> {
    let parsed = match value {
        Value::String(raw) => serde_json::from_str(&raw),
        other => serde_json::from_value(other),
    };

    match parsed {
        Ok(document) => Some(document),
        Err(e) => {
            warn!("Ignoring malformed token document: {}", e);
            None
        }
    }
}
