use thiserror::Error;

/// Xbox Live authentication error types
#[derive(Error, Debug)]
pub enum XsAuthError {
    #[error("User cancelled the authentication flow")]
    UserCancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status} from {url}: {body_snippet}")]
    Http {
        url: String,
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("OAuth invalid_grant - refresh token may be expired")]
    OAuthInvalidGrant,

    #[error("XSTS authorization denied: {0}")]
    XstsDenied(#[from] XstsError),

    #[error("Authorization redirect returned an error: {0}")]
    RedirectError(String),

    #[error("Invalid redirect URI or missing code")]
    InvalidRedirect,

    #[error("OAuth state mismatch - possible CSRF attack")]
    StateMismatch,

    #[error("User token is missing. Please authenticate first")]
    MissingUserToken,

    #[error("Missing SISU token, reauthenticate")]
    MissingSisuToken,

    #[error("Missing refresh token - cannot refresh session")]
    MissingRefreshToken,

    #[error("Failed to refresh tokens: {0}")]
    TokenRefresh(Box<XsAuthError>),

    #[error("No streaming token available for {0}")]
    StreamingUnavailable(&'static str),

    #[error("Silent flow failed: {0}")]
    SilentFlow(String),

    #[error("Signing key error: {0}")]
    Crypto(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Store error: {0}")]
    Store(#[from] xs_core::CoreError),

    #[error("Web authentication surface error: {0}")]
    Surface(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// XSTS-specific error codes from XErr field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XstsError {
    #[error("Account doesn't have an Xbox account (XErr: 2148916233)")]
    NoXboxAccount,

    #[error("Xbox Live not available in this country (XErr: 2148916235)")]
    RegionNotSupported,

    #[error("Adult verification required on Xbox page (XErr: 2148916236/2148916237)")]
    AdultVerificationRequired,

    #[error("Child account requires Family (XErr: 2148916238)")]
    ChildAccountRequiresFamily,

    #[error("Unknown XSTS error code: {0}")]
    Unknown(u64),
}

impl XstsError {
    /// Parse XErr code from XSTS response
    pub fn from_xerr(code: u64) -> Self {
        match code {
            2148916233 => Self::NoXboxAccount,
            2148916235 => Self::RegionNotSupported,
            2148916236 | 2148916237 => Self::AdultVerificationRequired,
            2148916238 => Self::ChildAccountRequiresFamily,
            code => Self::Unknown(code),
        }
    }
}

pub type Result<T> = std::result::Result<T, XsAuthError>;
