use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;
use xs_auth::{AuthFlowOutcome, AuthState, Authenticator, StreamingToken};
use xs_core::Capabilities;
use xs_stream::{
    AchievementsClient, CatalogClient, Console, ErrorDetails, IceCandidate, SdpAnswer,
    ServiceHosts, StreamClient, StreamConfig, StreamKind, XccsClient,
};

use crate::events::{GAMERPIC_KEY, GAMERSCORE_KEY, GAMERTAG_KEY};

/// How long a console list is served from memory
const CONSOLE_LIST_TTL: Duration = Duration::from_secs(60);

/// Session state as reported to the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Pending,
    Started,
    Failed,
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub session_id: String,
    pub player_state: PlayerStatus,
    /// Raw gssv state name
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

struct Session {
    client: Arc<StreamClient>,
    msal_connected: bool,
}

/// Entry point for the player: authentication, catalog and session negotiation
///
/// Streaming clients are bound to the region and token current when a session
/// starts; every later call for that session goes through the same client.
pub struct Coordinator {
    caps: Capabilities,
    auth: Arc<Authenticator>,
    stream_config: StreamConfig,
    hosts: ServiceHosts,
    sessions: Mutex<HashMap<String, Session>>,
    consoles: Mutex<Option<(Instant, Vec<Console>)>>,
}

impl Coordinator {
    pub fn new(
        caps: Capabilities,
        auth: Arc<Authenticator>,
        stream_config: StreamConfig,
        hosts: ServiceHosts,
    ) -> Self {
        Self {
            caps,
            auth,
            stream_config,
            hosts,
            sessions: Mutex::new(HashMap::new()),
            consoles: Mutex::new(None),
        }
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// True when tokens exist; a silent refresh is then running in the background
    pub async fn check_authentication(&self) -> bool {
        self.auth.check_authentication().await
    }

    pub async fn login(&self) -> Result<AuthFlowOutcome> {
        self.auth
            .start_auth_flow()
            .await
            .context("Interactive login failed")
    }

    /// Authentication state; profile fields not loaded yet come from the last session
    pub async fn get_auth_state(&self) -> AuthState {
        let mut state = self.auth.auth_state().await;
        if let Some(user) = state.user.as_mut() {
            for (field, key) in [
                (&mut user.gamertag, GAMERTAG_KEY),
                (&mut user.gamerpic, GAMERPIC_KEY),
                (&mut user.gamerscore, GAMERSCORE_KEY),
            ] {
                if field.is_none() {
                    *field = self
                        .caps
                        .store
                        .get(key)
                        .await
                        .and_then(|value| value.as_str().map(str::to_string));
                }
            }
        }
        state
    }

    /// Sign out: stop tracking sessions and forget every token and cached profile value
    #[instrument(skip(self))]
    pub async fn clear_data(&self) -> Result<()> {
        for (_, session) in self.sessions.lock().await.drain() {
            session.client.cancel();
        }
        *self.consoles.lock().await = None;
        self.auth
            .clear()
            .await
            .context("Failed to clear tokens")?;
        self.caps
            .store
            .delete("user")
            .await
            .context("Failed to clear user data")?;
        info!("Cleared user data");
        Ok(())
    }

    pub async fn get_titles(&self) -> Result<Value> {
        let client = self.client_for(StreamKind::Cloud).await?;
        client.get_titles().await.context("Failed to load titles")
    }

    pub async fn get_recent_titles(&self) -> Result<Value> {
        let client = self.client_for(StreamKind::Cloud).await?;
        client
            .get_recent_titles()
            .await
            .context("Failed to load recent titles")
    }

    pub async fn get_new_titles(&self) -> Result<Value> {
        let catalog = self.catalog().await?;
        catalog
            .get_new_titles()
            .await
            .context("Failed to load new titles")
    }

    pub async fn get_game_pass_products(&self, titles: &Value) -> Result<Vec<Value>> {
        let catalog = self.catalog().await?;
        catalog
            .get_game_pass_products(titles)
            .await
            .context("Failed to load Game Pass products")
    }

    /// Consoles of the account; the list is reused for a minute
    #[instrument(skip(self))]
    pub async fn get_consoles(&self) -> Result<Vec<Console>> {
        let mut cached = self.consoles.lock().await;
        if let Some((fetched_at, consoles)) = cached.as_ref() {
            if fetched_at.elapsed() < CONSOLE_LIST_TTL {
                return Ok(consoles.clone());
            }
        }

        let consoles = self
            .xccs()
            .await?
            .get_consoles()
            .await
            .context("Failed to list consoles")?;
        *cached = Some((Instant::now(), consoles.clone()));
        Ok(consoles)
    }

    pub async fn power_on(&self, console_id: &str) -> Result<Value> {
        let result = self
            .xccs()
            .await?
            .power_on(console_id)
            .await
            .with_context(|| format!("Failed to power on {console_id}"))?;
        self.forget_consoles().await;
        Ok(result)
    }

    pub async fn power_off(&self, console_id: &str) -> Result<Value> {
        let result = self
            .xccs()
            .await?
            .power_off(console_id)
            .await
            .with_context(|| format!("Failed to power off {console_id}"))?;
        self.forget_consoles().await;
        Ok(result)
    }

    pub async fn send_text(&self, console_id: &str, text: &str) -> Result<Value> {
        self.xccs()
            .await?
            .send_text(console_id, text)
            .await
            .with_context(|| format!("Failed to send text to {console_id}"))
    }

    pub async fn get_achievement_history(&self) -> Result<Value> {
        self.achievements()
            .await?
            .get_history()
            .await
            .context("Failed to load achievement history")
    }

    pub async fn get_achievement_detail(&self, title_id: &str) -> Result<Value> {
        self.achievements()
            .await?
            .get_detail(title_id)
            .await
            .with_context(|| format!("Failed to load achievements of {title_id}"))
    }

    /// Request a session and return its id
    #[instrument(skip(self))]
    pub async fn start_stream(&self, kind: StreamKind, target: &str) -> Result<String> {
        let client = self.client_for(kind).await?;
        let play = client
            .start_stream(target)
            .await
            .with_context(|| format!("Failed to start {kind} stream for {target}"))?;
        let session_id = play.session_id()?.to_string();

        info!(%session_id, "Started {} session", kind);
        self.sessions.lock().await.insert(
            session_id.clone(),
            Session {
                client,
                msal_connected: false,
            },
        );
        Ok(session_id)
    }

    /// Poll the session state; cloud sessions are MSAL-connected once they ask for it
    #[instrument(skip(self))]
    pub async fn get_player_state(&self, session_id: &str) -> Result<PlayerState> {
        let (client, msal_connected) = self.session(session_id).await?;
        let state = client
            .get_stream_state(session_id)
            .await
            .context("Failed to read session state")?;

        let player_state = match state.state.as_str() {
            "WaitingForResources" => PlayerStatus::Queued,
            "Provisioning" => PlayerStatus::Pending,
            "Provisioned" => PlayerStatus::Started,
            "Failed" => PlayerStatus::Failed,
            "ReadyToConnect" => {
                if client.kind() == StreamKind::Cloud && !msal_connected {
                    self.msal_connect(session_id, &client).await?;
                }
                PlayerStatus::Pending
            }
            other => {
                warn!("Unknown session state {}", other);
                PlayerStatus::Pending
            }
        };

        if player_state == PlayerStatus::Failed {
            warn!(?state.error_details, "Session failed");
        }

        Ok(PlayerState {
            session_id: session_id.to_string(),
            player_state,
            state: state.state,
            error_details: state.error_details,
        })
    }

    pub async fn send_sdp(&self, session_id: &str, sdp: &str) -> Result<SdpAnswer> {
        let (client, _) = self.session(session_id).await?;
        client
            .send_sdp(session_id, sdp)
            .await
            .context("SDP exchange failed")
    }

    pub async fn send_chat_sdp(&self, session_id: &str, sdp: &str) -> Result<SdpAnswer> {
        let (client, _) = self.session(session_id).await?;
        client
            .send_chat_sdp(session_id, sdp)
            .await
            .context("Chat SDP exchange failed")
    }

    pub async fn send_ice(&self, session_id: &str, ice: Value) -> Result<Vec<IceCandidate>> {
        let (client, _) = self.session(session_id).await?;
        client
            .send_ice(session_id, ice)
            .await
            .context("ICE exchange failed")
    }

    pub async fn send_keepalive(&self, session_id: &str) -> Result<Value> {
        let (client, _) = self.session(session_id).await?;
        client
            .send_keepalive(session_id)
            .await
            .context("Keepalive failed")
    }

    /// Tear the session down and abort anything still polling it
    #[instrument(skip(self))]
    pub async fn stop_stream(&self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| anyhow!("Unknown session {session_id}"))?;

        let result = session.client.stop_stream(session_id).await;
        session.client.cancel();
        result.context("Failed to stop stream")?;
        info!(%session_id, "Stopped session");
        Ok(())
    }

    async fn session(&self, session_id: &str) -> Result<(Arc<StreamClient>, bool)> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|session| (session.client.clone(), session.msal_connected))
            .ok_or_else(|| anyhow!("Unknown session {session_id}"))
    }

    async fn msal_connect(&self, session_id: &str, client: &StreamClient) -> Result<()> {
        debug!("Sending MSAL transfer token");
        let msal = self
            .auth
            .get_msal_token()
            .await
            .context("Failed to get MSAL transfer token")?;
        let transfer_token = msal
            .transfer_token()
            .ok_or_else(|| anyhow!("MSAL response carried no transfer token"))?;

        client
            .send_msal_auth(session_id, transfer_token)
            .await
            .context("MSAL connect failed")?;

        if let Some(session) = self.sessions.lock().await.get_mut(session_id) {
            session.msal_connected = true;
        }
        Ok(())
    }

    async fn streaming_token(&self, kind: StreamKind) -> Result<StreamingToken> {
        let tokens = self
            .auth
            .get_streaming_token()
            .await
            .context("Failed to get streaming tokens")?;

        match kind {
            StreamKind::Home => Ok(tokens.xhome_token),
            StreamKind::Cloud => tokens
                .xcloud_token
                .ok_or_else(|| anyhow!("Account has no xCloud access")),
        }
    }

    async fn client_for(&self, kind: StreamKind) -> Result<Arc<StreamClient>> {
        let token = self.streaming_token(kind).await?;
        let region = token
            .default_region()
            .or_else(|| token.regions().first())
            .ok_or_else(|| anyhow!("No {kind} region offered"))?;
        let base = Url::parse(&region.base_uri)
            .with_context(|| format!("Invalid region URI {}", region.base_uri))?;

        debug!(region = %region.name, "Using {} region", kind);
        let client = StreamClient::new(
            &self.caps,
            base,
            token.gs_token(),
            kind,
            self.stream_config.clone(),
        )?;
        Ok(Arc::new(client))
    }

    async fn forget_consoles(&self) {
        *self.consoles.lock().await = None;
    }

    /// `XBL3.0` authorization and user id of the xboxlive.com web token
    async fn web_identity(&self) -> Result<(String, Option<String>)> {
        let web_token = self
            .auth
            .get_web_token()
            .await
            .context("Failed to get web token")?;
        let authorization = web_token
            .authorization_header()
            .ok_or_else(|| anyhow!("Web token carries no user hash"))?;
        let xuid = web_token
            .display_claims
            .xui
            .first()
            .and_then(|claim| claim.xid.clone());
        Ok((authorization, xuid))
    }

    async fn xccs(&self) -> Result<XccsClient> {
        let (authorization, _) = self.web_identity().await?;
        Ok(XccsClient::new(
            self.hosts.xccs.clone(),
            authorization,
            &self.stream_config,
        )?)
    }

    async fn achievements(&self) -> Result<AchievementsClient> {
        let (authorization, xuid) = self.web_identity().await?;
        let xuid = xuid.ok_or_else(|| anyhow!("Web token carries no xuid"))?;
        let language = self.caps.settings().locale().to_string();
        Ok(AchievementsClient::new(
            self.hosts.achievements.clone(),
            authorization,
            xuid,
            language,
            &self.stream_config,
        )?)
    }

    async fn catalog(&self) -> Result<CatalogClient> {
        let token = self.streaming_token(StreamKind::Cloud).await?;
        let market = token.market();
        if market.is_empty() {
            bail!("xCloud token carries no market");
        }

        let language = self.caps.settings().locale().to_string();
        Ok(CatalogClient::new(
            self.hosts.catalog.clone(),
            market,
            language,
            &self.stream_config,
        )?)
    }
}
