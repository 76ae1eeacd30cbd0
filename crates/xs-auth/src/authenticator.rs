use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, instrument, warn};
use xs_core::Capabilities;

use crate::client::XalClient;
use crate::config::{Offering, RP_GSSV, RP_XBOXLIVE, XalConfig};
use crate::errors::{Result, XsAuthError};
use crate::models::XboxProfile;
use crate::store::TokenStore;
use crate::streaming::{StreamingToken, StreamingTokenSlot, StreamingTokens};
use crate::tokens::{Expiring, MsalToken, XstsToken};

/// Services the account can stream from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthLevel {
    #[default]
    None = 0,
    /// Console streaming only
    XHome = 1,
    /// Console and cloud streaming
    XCloud = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    Authenticating,
    Authenticated(AuthLevel),
}

/// Streaming service a token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingService {
    XHome,
    XCloud,
}

/// Signed-in user as seen by the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthUser {
    pub gamertag: Option<String>,
    pub xuid: Option<String>,
    pub user_hash: Option<String>,
    /// Profile picture URL, known once the profile was loaded
    pub gamerpic: Option<String>,
    pub gamerscore: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub is_authenticating: bool,
    pub is_authenticated: bool,
    /// `None` unless authenticated
    pub level: AuthLevel,
    pub user: Option<AuthUser>,
}

/// How an interactive login ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlowOutcome {
    Completed(AuthLevel),
    /// The surface was closed before the redirect was observed
    Cancelled,
}

/// Host notification sink
#[async_trait]
pub trait AuthObserver: Send + Sync {
    /// `profile` is `None` when the profile service could not be reached
    async fn authentication_completed(
        &self,
        tokens: StreamingTokens,
        web_token: XstsToken,
        profile: Option<XboxProfile>,
    );

    async fn authentication_failed(&self, _error: &XsAuthError) {}
}

/// Modal web view used for the interactive login
///
/// The host forwards every redirect it sees to [`Authenticator::observe_redirect`] and
/// reports a user-initiated close through [`Authenticator::surface_closed`].
#[async_trait]
pub trait WebAuthSurface: Send + Sync {
    async fn open(&self, url: &str) -> Result<()>;

    fn close(&self);
}

#[derive(Debug, Default)]
struct TokenCache {
    xhome: Option<StreamingToken>,
    xcloud: StreamingTokenSlot,
    web: Option<XstsToken>,
    profile: Option<XboxProfile>,
}

type FlightOutcome = std::result::Result<AuthLevel, String>;

/// Authentication state machine on top of [`XalClient`]
pub struct Authenticator {
    caps: Capabilities,
    xal: XalClient,
    store: Mutex<TokenStore>,
    cache: Mutex<TokenCache>,
    phase: std::sync::RwLock<AuthPhase>,
    observer: Arc<dyn AuthObserver>,
    surface: Arc<dyn WebAuthSurface>,
    pending_redirect: std::sync::Mutex<Option<oneshot::Sender<String>>>,
    flight: Mutex<Option<FlightOutcome>>,
    flight_generation: AtomicU64,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("phase", &self.phase())
            .field("xal", &self.xal)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Load persisted tokens and build the orchestrator
    pub async fn new(
        caps: Capabilities,
        config: XalConfig,
        observer: Arc<dyn AuthObserver>,
        surface: Arc<dyn WebAuthSurface>,
    ) -> Result<Self> {
        let mut store = TokenStore::new(caps.store.clone());
        if store.load().await {
            debug!("Loaded persisted tokens");
        }
        let xal = XalClient::new(config, store.jwt_keys())?;

        Ok(Self {
            caps,
            xal,
            store: Mutex::new(store),
            cache: Mutex::new(TokenCache::default()),
            phase: std::sync::RwLock::new(AuthPhase::Unauthenticated),
            observer,
            surface,
            pending_redirect: std::sync::Mutex::new(None),
            flight: Mutex::new(None),
            flight_generation: AtomicU64::new(0),
        })
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase
            .read()
            .map(|phase| *phase)
            .unwrap_or(AuthPhase::Unauthenticated)
    }

    fn set_phase(&self, phase: AuthPhase) {
        if let Ok(mut current) = self.phase.write() {
            debug!("Auth phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }

    /// Start a silent refresh when there is anything to refresh
    ///
    /// Returns false only when no user token exists. The flow runs in the background.
    #[instrument(skip(self))]
    pub async fn check_authentication(self: &Arc<Self>) -> bool {
        {
            let store = self.store.lock().await;
            if store.has_valid_auth_tokens() {
                info!("Tokens are valid");
            } else if store.user_token().is_some() {
                info!("Tokens are expired but a user token is present, refreshing");
            } else {
                info!("No tokens are present");
                return false;
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.start_silent_flow().await {
                warn!("Silent flow failed: {}", e);
            }
        });
        true
    }

    /// Refresh tokens, fetch streaming and web tokens, then notify the observer
    ///
    /// Concurrent callers share one run: whoever waits on a run in progress gets its
    /// outcome instead of starting another.
    pub async fn start_silent_flow(&self) -> Result<AuthLevel> {
        let observed = self.flight_generation.load(Ordering::SeqCst);
        let mut flight = self.flight.lock().await;

        if self.flight_generation.load(Ordering::SeqCst) != observed {
            if let Some(outcome) = flight.as_ref() {
                debug!("Joining the outcome of a concurrent silent flow");
                return outcome.clone().map_err(XsAuthError::SilentFlow);
            }
        }

        let outcome = self.run_silent_flow().await;
        *flight = Some(match &outcome {
            Ok(level) => Ok(*level),
            Err(e) => Err(e.to_string()),
        });
        self.flight_generation.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    #[instrument(skip(self))]
    async fn run_silent_flow(&self) -> Result<AuthLevel> {
        info!("Starting silent flow");
        self.set_phase(AuthPhase::Authenticating);

        {
            let mut store = self.store.lock().await;
            if let Err(e) = self.xal.refresh_tokens(&mut store).await {
                error!("Error refreshing tokens: {}", e);
                if let Err(clear_error) = store.clear().await {
                    warn!("Failed to clear token store: {}", clear_error);
                }
                drop(store);

                *self.cache.lock().await = TokenCache::default();
                self.set_phase(AuthPhase::Unauthenticated);
                self.observer.authentication_failed(&e).await;
                return Err(e);
            }
        }
        debug!("Tokens have been refreshed");

        {
            let mut cache = self.cache.lock().await;
            if cache.xcloud == StreamingTokenSlot::Unavailable {
                cache.xcloud = StreamingTokenSlot::NotFetched;
            }
        }

        let result = async {
            let tokens = self.get_streaming_token().await?;
            let level = if tokens.xcloud_token.is_some() {
                info!("Retrieved both xHome and xCloud tokens");
                AuthLevel::XCloud
            } else {
                info!("Retrieved xHome token only");
                AuthLevel::XHome
            };
            let web_token = self.get_web_token().await?;
            Ok::<_, XsAuthError>((level, tokens, web_token))
        }
        .await;

        match result {
            Ok((level, tokens, web_token)) => {
                let profile = match self.load_profile(&web_token).await {
                    Ok(profile) => Some(profile),
                    Err(e) => {
                        warn!("Failed to load profile: {}", e);
                        None
                    }
                };

                self.set_phase(AuthPhase::Authenticated(level));
                self.observer
                    .authentication_completed(tokens, web_token, profile)
                    .await;
                Ok(level)
            }
            Err(e) => {
                error!("Failed to retrieve service tokens: {}", e);
                self.set_phase(AuthPhase::Unauthenticated);
                self.observer.authentication_failed(&e).await;
                Err(e)
            }
        }
    }

    /// Run the interactive login through the web surface
    #[instrument(skip(self))]
    pub async fn start_auth_flow(&self) -> Result<AuthFlowOutcome> {
        info!("Starting authentication flow");
        let context = self.xal.get_redirect_uri().await?;

        let (sender, receiver) = oneshot::channel();
        self.replace_pending_redirect(Some(sender));

        if let Err(e) = self.surface.open(context.authorize_url()).await {
            self.replace_pending_redirect(None);
            return Err(e);
        }

        let redirect_uri = match receiver.await {
            Ok(uri) => uri,
            Err(_) => {
                info!("Authentication surface closed before the redirect");
                return Ok(AuthFlowOutcome::Cancelled);
            }
        };

        self.set_phase(AuthPhase::Authenticating);
        let authenticated = {
            let mut store = self.store.lock().await;
            self.xal
                .authenticate_user(&mut store, &context, &redirect_uri)
                .await
        };
        if let Err(e) = authenticated {
            error!("Error authenticating user: {}", e);
            self.set_phase(AuthPhase::Unauthenticated);
            self.observer.authentication_failed(&e).await;
            return Err(e);
        }

        *self.cache.lock().await = TokenCache::default();
        let level = self.start_silent_flow().await?;
        Ok(AuthFlowOutcome::Completed(level))
    }

    /// Feed a redirect `Location` seen by the surface
    ///
    /// Returns true when it matched the login redirect URI; the host must then stop
    /// the navigation.
    pub fn observe_redirect(&self, location: &str) -> bool {
        if !location.contains(&self.xal.config().redirect_uri) {
            return false;
        }

        debug!("Observed login redirect");
        self.surface.close();
        match self.replace_pending_redirect(None) {
            Some(sender) => {
                if sender.send(location.to_string()).is_err() {
                    warn!("Authentication flow is no longer waiting for the redirect");
                }
            }
            None => warn!("Redirect observed without a pending authentication flow"),
        }
        true
    }

    /// The user closed the surface; an unmatched pending flow resolves as cancelled
    pub fn surface_closed(&self) {
        if self.replace_pending_redirect(None).is_some() {
            debug!("Pending authentication flow abandoned");
        }
    }

    fn replace_pending_redirect(
        &self,
        sender: Option<oneshot::Sender<String>>,
    ) -> Option<oneshot::Sender<String>> {
        match self.pending_redirect.lock() {
            Ok(mut pending) => std::mem::replace(&mut *pending, sender),
            Err(_) => None,
        }
    }

    /// xHome and xCloud streaming tokens, refreshed when inside the refresh margin
    ///
    /// The cloud token falls back to the free-to-play offering and ends up unavailable
    /// when both offerings refuse; that is not an error. An unavailable cloud slot is
    /// requested again together with the next xHome fetch or after a token refresh.
    #[instrument(skip(self))]
    pub async fn get_streaming_token(&self) -> Result<StreamingTokens> {
        let sisu_token = self
            .store
            .lock()
            .await
            .sisu_token()
            .cloned()
            .ok_or(XsAuthError::MissingSisuToken)?;
        let xsts_token = self
            .xal
            .do_xsts_authorization(&sisu_token, RP_GSSV)
            .await?;

        let settings = self.caps.settings();
        let forwarded_for = settings.force_region_ip.as_deref();

        let mut cache = self.cache.lock().await;
        let xhome_needed = cache.xhome.as_ref().is_none_or(|token| token.needs_refresh());
        let xcloud_needed = cache.xcloud.needs_fetch()
            || (xhome_needed && cache.xcloud == StreamingTokenSlot::Unavailable);

        let (xhome, xcloud) = tokio::join!(
            async {
                if xhome_needed {
                    Some(
                        self.xal
                            .get_stream_token(&xsts_token, Offering::XHome, None)
                            .await,
                    )
                } else {
                    None
                }
            },
            async {
                if xcloud_needed {
                    Some(self.fetch_cloud_token(&xsts_token, forwarded_for).await)
                } else {
                    None
                }
            }
        );

        if let Some(mut slot) = xcloud {
            if let StreamingTokenSlot::Available(token) = &mut slot {
                apply_region_preference(token, settings.xcloud_region.as_deref());
            }
            cache.xcloud = slot;
        }
        if let Some(result) = xhome {
            let mut token = result?;
            apply_region_preference(&mut token, settings.xhome_region.as_deref());
            cache.xhome = Some(token);
        }

        let xhome_token = cache
            .xhome
            .clone()
            .ok_or(XsAuthError::StreamingUnavailable("xhome"))?;
        Ok(StreamingTokens {
            xhome_token,
            xcloud_token: cache.xcloud.token().cloned(),
        })
    }

    async fn fetch_cloud_token(
        &self,
        xsts_token: &XstsToken,
        forwarded_for: Option<&str>,
    ) -> StreamingTokenSlot {
        for offering in [Offering::XgpuWeb, Offering::XgpuWebF2p] {
            match self
                .xal
                .get_stream_token(xsts_token, offering, forwarded_for)
                .await
            {
                Ok(token) => return StreamingTokenSlot::Available(token),
                Err(e) => warn!("No {} streaming token: {}", offering, e),
            }
        }
        info!("Account has no cloud gaming capability");
        StreamingTokenSlot::Unavailable
    }

    /// XSTS token for xboxlive.com, cached until inside the refresh margin
    #[instrument(skip(self))]
    pub async fn get_web_token(&self) -> Result<XstsToken> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.web.as_ref().filter(|token| !token.needs_refresh()) {
            return Ok(token.clone());
        }

        let sisu_token = self
            .store
            .lock()
            .await
            .sisu_token()
            .cloned()
            .ok_or(XsAuthError::MissingSisuToken)?;
        let token = self
            .xal
            .do_xsts_authorization(&sisu_token, RP_XBOXLIVE)
            .await?;
        cache.web = Some(token.clone());
        Ok(token)
    }

    /// Profile of the signed-in user, cached until the next login or sign-out
    pub async fn get_profile(&self) -> Result<XboxProfile> {
        if let Some(profile) = self.cache.lock().await.profile.clone() {
            return Ok(profile);
        }
        let web_token = self.get_web_token().await?;
        self.load_profile(&web_token).await
    }

    async fn load_profile(&self, web_token: &XstsToken) -> Result<XboxProfile> {
        let profile = self.xal.get_profile(web_token).await?;
        self.cache.lock().await.profile = Some(profile.clone());
        Ok(profile)
    }

    /// Transfer token used for MSAL connect on cloud sessions
    pub async fn get_msal_token(&self) -> Result<MsalToken> {
        let store = self.store.lock().await;
        self.xal.get_msal_token(&store).await
    }

    /// Make `name` the default region of a cached streaming token
    pub async fn set_default_region(&self, service: StreamingService, name: &str) -> bool {
        let mut cache = self.cache.lock().await;
        let token = match service {
            StreamingService::XHome => cache.xhome.as_mut(),
            StreamingService::XCloud => match &mut cache.xcloud {
                StreamingTokenSlot::Available(token) => Some(token),
                _ => None,
            },
        };
        token.is_some_and(|token| token.set_default_region(name))
    }

    /// Phase, level and identity of the current user
    ///
    /// Identity comes from the SISU claims; picture and score from the cached profile.
    pub async fn auth_state(&self) -> AuthState {
        let phase = self.phase();
        let profile = self.cache.lock().await.profile.clone().unwrap_or_default();
        let user = self.store.lock().await.sisu_token().map(|sisu| AuthUser {
            gamertag: profile
                .gamertag
                .clone()
                .or_else(|| sisu.gamertag().map(str::to_string)),
            xuid: sisu.xuid().map(str::to_string),
            user_hash: sisu.user_hash().map(str::to_string),
            gamerpic: profile.gamerpic.clone(),
            gamerscore: profile.gamerscore.clone(),
        });

        let level = match phase {
            AuthPhase::Authenticated(level) => level,
            _ => AuthLevel::None,
        };
        AuthState {
            is_authenticating: phase == AuthPhase::Authenticating,
            is_authenticated: level != AuthLevel::None,
            level,
            user,
        }
    }

    /// Forget every token, persisted or cached
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        self.store.lock().await.clear().await?;
        *self.cache.lock().await = TokenCache::default();
        self.set_phase(AuthPhase::Unauthenticated);
        info!("Cleared authentication data");
        Ok(())
    }
}

fn apply_region_preference(token: &mut StreamingToken, preferred: Option<&str>) {
    if let Some(name) = preferred.filter(|name| !name.is_empty()) {
        if !token.set_default_region(name) {
            warn!("Preferred region {} is not offered", name);
        }
    }
}
