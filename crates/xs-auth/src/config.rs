use std::time::Duration;
use url::Url;

/// Microsoft / Xbox Live authentication endpoints
pub mod endpoints {
    pub const MS_TOKEN: &str = "https://login.live.com/oauth20_token.srf";
    pub const DEVICE_AUTHENTICATE: &str = "https://device.auth.xboxlive.com/device/authenticate";
    pub const SISU_AUTHENTICATE: &str = "https://sisu.xboxlive.com/authenticate";
    pub const SISU_AUTHORIZE: &str = "https://sisu.xboxlive.com/authorize";
    pub const XSTS_AUTHORIZE: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
    /// `{offering}` is replaced by the offering id
    pub const GSSV_LOGIN: &str = "https://{offering}.gssv-play-prod.xboxlive.com/v2/login/user";
    pub const PROFILE_SETTINGS: &str = "https://profile.xboxlive.com/users/me/profile/settings";
}

/// Xbox app identity used for the SISU flow
pub mod app {
    pub const APP_ID: &str = "000000004c20a908";
    pub const TITLE_ID: &str = "328178078";
    pub const REDIRECT_URI: &str = "ms-xal-000000004c20a908://auth";
}

/// Scope requested for the Microsoft user token
pub const USER_AUTH_SCOPE: &str = "service::user.auth.xboxlive.com::MBI_SSL";

/// Scope of the xCloud console transfer token used for MSAL connect
pub const TRANSFER_TOKEN_SCOPE: &str =
    "service::http://Passport.NET/purpose::PURPOSE_XBOX_CLOUD_CONSOLE_TRANSFER_TOKEN";

/// Relying parties
pub const RP_GSSV: &str = "http://gssv.xboxlive.com/";
pub const RP_XBOXLIVE: &str = "http://xboxlive.com";
pub const RP_AUTH_XBOXLIVE: &str = "http://auth.xboxlive.com";

pub const SANDBOX: &str = "RETAIL";

/// Tokens with this many seconds or fewer left are refreshed before use
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Streaming offerings a gssv token can be requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offering {
    /// Remote play from the user's console
    XHome,
    /// Cloud gaming, Game Pass tier
    XgpuWeb,
    /// Cloud gaming, free-to-play tier
    XgpuWebF2p,
}

impl Offering {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::XHome => "xhome",
            Self::XgpuWeb => "xgpuweb",
            Self::XgpuWebF2p => "xgpuwebf2p",
        }
    }
}

impl std::fmt::Display for Offering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Endpoint set, overridable so the flow can run against a local mock server
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub ms_token: Url,
    pub device_authenticate: Url,
    pub sisu_authenticate: Url,
    pub sisu_authorize: Url,
    pub xsts_authorize: Url,
    /// Template containing `{offering}`
    pub gssv_login: String,
    pub profile_settings: Url,
}

impl Endpoints {
    /// Resolve the gssv login URL for an offering
    pub fn gssv_login_url(&self, offering: Offering) -> Result<Url, url::ParseError> {
        Url::parse(&self.gssv_login.replace("{offering}", offering.as_str()))
    }

    /// Point every endpoint at `base`, keeping the production paths
    ///
    /// The gssv login moves to `{base}/{offering}/v2/login/user`.
    pub fn with_base(base: &Url) -> Result<Self, url::ParseError> {
        let base = base.as_str().trim_end_matches('/');
        Ok(Self {
            ms_token: Url::parse(&format!("{base}/oauth20_token.srf"))?,
            device_authenticate: Url::parse(&format!("{base}/device/authenticate"))?,
            sisu_authenticate: Url::parse(&format!("{base}/authenticate"))?,
            sisu_authorize: Url::parse(&format!("{base}/authorize"))?,
            xsts_authorize: Url::parse(&format!("{base}/xsts/authorize"))?,
            gssv_login: format!("{base}/{{offering}}/v2/login/user"),
            profile_settings: Url::parse(&format!("{base}/users/me/profile/settings"))?,
        })
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            ms_token: Url::parse(endpoints::MS_TOKEN).expect("valid token endpoint"),
            device_authenticate: Url::parse(endpoints::DEVICE_AUTHENTICATE)
                .expect("valid device endpoint"),
            sisu_authenticate: Url::parse(endpoints::SISU_AUTHENTICATE)
                .expect("valid sisu endpoint"),
            sisu_authorize: Url::parse(endpoints::SISU_AUTHORIZE).expect("valid sisu endpoint"),
            xsts_authorize: Url::parse(endpoints::XSTS_AUTHORIZE).expect("valid xsts endpoint"),
            gssv_login: endpoints::GSSV_LOGIN.to_string(),
            profile_settings: Url::parse(endpoints::PROFILE_SETTINGS)
                .expect("valid profile endpoint"),
        }
    }
}

/// Configuration for [`crate::XalClient`]
#[derive(Debug, Clone)]
pub struct XalConfig {
    pub app_id: String,
    pub title_id: String,
    /// Redirect URI the interactive flow ends on
    pub redirect_uri: String,
    pub endpoints: Endpoints,
    pub http_timeouts: HttpTimeouts,
    pub user_agent: Option<String>,
}

impl Default for XalConfig {
    fn default() -> Self {
        Self {
            app_id: app::APP_ID.to_string(),
            title_id: app::TITLE_ID.to_string(),
            redirect_uri: app::REDIRECT_URI.to_string(),
            endpoints: Endpoints::default(),
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some("xstream".to_string()),
        }
    }
}
