use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};
use xs_auth::{AuthObserver, StreamingTokens, XboxProfile, XsAuthError, XstsToken};
use xs_core::Capabilities;

/// Profile keys written after every completed authentication
pub const GAMERTAG_KEY: &str = "user.gamertag";
pub const GAMERPIC_KEY: &str = "user.gamerpic";
pub const GAMERSCORE_KEY: &str = "user.gamerscore";

/// Host side of authentication notifications
///
/// Publishes the latest streaming tokens and caches the profile of the signed-in user
/// in the key-value store, where it outlives the process.
pub struct AuthSink {
    caps: Capabilities,
    tokens: watch::Sender<Option<StreamingTokens>>,
}

impl AuthSink {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            tokens: watch::Sender::new(None),
        }
    }

    /// Receiver of the streaming tokens, `None` until a flow completed
    pub fn subscribe(&self) -> watch::Receiver<Option<StreamingTokens>> {
        self.tokens.subscribe()
    }

    async fn store_profile(&self, profile: XboxProfile) {
        let values = [
            (GAMERTAG_KEY, profile.gamertag),
            (GAMERPIC_KEY, profile.gamerpic),
            (GAMERSCORE_KEY, profile.gamerscore),
        ];

        for (key, value) in values {
            let Some(value) = value else { continue };
            if let Err(e) = self.caps.store.set(key, Value::String(value)).await {
                warn!("Failed to store {}: {}", key, e);
            }
        }
    }
}

#[async_trait]
impl AuthObserver for AuthSink {
    async fn authentication_completed(
        &self,
        tokens: StreamingTokens,
        _web_token: XstsToken,
        profile: Option<XboxProfile>,
    ) {
        info!(
            market = tokens.xhome_token.market(),
            xcloud = tokens.xcloud_token.is_some(),
            "Authentication completed"
        );
        self.tokens.send_replace(Some(tokens));

        if let Some(profile) = profile {
            self.store_profile(profile).await;
        }
    }

    async fn authentication_failed(&self, error: &XsAuthError) {
        error!("Authentication failed: {}", error);
        self.tokens.send_replace(None);
    }
}
