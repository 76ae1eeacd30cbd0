//! # xs-auth
//!
//! Xbox Live authentication for game streaming.
//!
//! ## Token chain
//!
//! 1. Device token, signed with a P-256 proof key
//! 2. SISU authentication yields the Microsoft login URL (PKCE + state)
//! 3. The authorization code is exchanged for a Microsoft user token
//! 4. SISU authorization turns user + device token into user, title and authorization tokens
//! 5. XSTS tokens for `http://gssv.xboxlive.com/` and `http://xboxlive.com`
//! 6. gssv streaming tokens for `xhome` and `xgpuweb` (falling back to `xgpuwebf2p`)
//!
//! [`Authenticator`] drives the chain: silent refresh from persisted tokens, the
//! interactive login through a host-provided [`WebAuthSurface`], and token caching with
//! a 60 second refresh margin.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use xs_auth::{
//!     AuthObserver, Authenticator, StreamingTokens, WebAuthSurface, XalConfig, XboxProfile, XstsToken,
//! };
//! use xs_core::{Capabilities, Settings};
//!
//! struct Host;
//!
//! #[async_trait::async_trait]
//! impl AuthObserver for Host {
//!     async fn authentication_completed(
//!         &self,
//!         tokens: StreamingTokens,
//!         _web_token: XstsToken,
//!         _profile: Option<XboxProfile>,
//!     ) {
//!         println!("xHome token for market {}", tokens.xhome_token.market());
//!     }
//! }
//!
//! #[async_trait::async_trait]
//! impl WebAuthSurface for Host {
//!     async fn open(&self, url: &str) -> xs_auth::Result<()> {
//!         println!("Open {url}");
//!         Ok(())
//!     }
//!
//!     fn close(&self) {}
//! }
//!
//! # async fn example() -> xs_auth::Result<()> {
//! let host = Arc::new(Host);
//! let auth = Arc::new(
//!     Authenticator::new(
//!         Capabilities::in_memory(Settings::default()),
//!         XalConfig::default(),
//!         host.clone(),
//!         host,
//!     )
//!     .await?,
//! );
//!
//! if !auth.check_authentication().await {
//!     auth.start_auth_flow().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod authenticator;
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod pkce;
pub mod signer;
pub mod store;
pub mod streaming;
pub mod tokens;

pub use authenticator::{
    AuthFlowOutcome, AuthLevel, AuthObserver, AuthPhase, AuthState, AuthUser, Authenticator,
    StreamingService, WebAuthSurface,
};
pub use client::{RedirectContext, RefreshedTokens, XalClient};
pub use config::{Endpoints, HttpTimeouts, Offering, XalConfig};
pub use errors::{Result, XsAuthError, XstsError};
pub use models::XboxProfile;
pub use signer::{JwtKeys, RequestSigner};
pub use store::{TOKEN_STORE_KEY, TokenStore};
pub use streaming::{Region, StreamingToken, StreamingTokenSlot, StreamingTokens};
pub use tokens::{DeviceToken, Expiring, MsalToken, SisuToken, UserToken, XboxToken, XstsToken};
