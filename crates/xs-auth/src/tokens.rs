use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::REFRESH_MARGIN_SECS;

/// Anything with an expiry instant
pub trait Expiring {
    /// Expiry instant, `None` when unknown
    fn expires_at(&self) -> Option<DateTime<Utc>>;

    /// Whole seconds left before expiry (negative once expired, 0 when unknown)
    fn seconds_valid(&self) -> i64 {
        self.expires_at()
            .map(|at| (at - Utc::now()).num_seconds())
            .unwrap_or(0)
    }

    fn is_valid(&self) -> bool {
        self.seconds_valid() > 0
    }

    /// True when the token is inside the refresh margin and must be re-derived before use
    fn needs_refresh(&self) -> bool {
        self.seconds_valid() <= REFRESH_MARGIN_SECS
    }
}

/// Microsoft OAuth user token (code and refresh_token grants)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserToken {
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Absolute expiry, stamped when the token enters the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<DateTime<Utc>>,
}

impl Expiring for UserToken {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_on
    }
}

/// Xbox Live user identity claim
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct XuiClaim {
    pub uhs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayClaims {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xui: Vec<XuiClaim>,
    /// Other claim groups (`xti` on title tokens, `xdi` on device tokens)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Xbox Live token as returned by the device, SISU and XSTS endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct XboxToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_instant: Option<DateTime<Utc>>,
    pub not_after: DateTime<Utc>,
    pub token: String,
    #[serde(default)]
    pub display_claims: DisplayClaims,
}

/// Device proof token
pub type DeviceToken = XboxToken;
/// XSTS token scoped to one relying party
pub type XstsToken = XboxToken;

impl XboxToken {
    /// User hash of the first identity claim
    pub fn user_hash(&self) -> Option<&str> {
        self.display_claims.xui.first().map(|xui| xui.uhs.as_str())
    }

    /// `XBL3.0 x=<uhs>;<token>` authorization header value
    pub fn authorization_header(&self) -> Option<String> {
        self.user_hash()
            .map(|uhs| format!("XBL3.0 x={};{}", uhs, self.token))
    }
}

impl Expiring for XboxToken {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        Some(self.not_after)
    }
}

/// Result of SISU authorization: user, title and authorization tokens bound to one device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SisuToken {
    pub device_token: String,
    pub title_token: XboxToken,
    pub user_token: XboxToken,
    pub authorization_token: XboxToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_modern_gamertag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

impl SisuToken {
    pub fn user_hash(&self) -> Option<&str> {
        self.user_token.user_hash()
    }

    fn identity(&self) -> Option<&XuiClaim> {
        self.authorization_token.display_claims.xui.first()
    }

    pub fn gamertag(&self) -> Option<&str> {
        self.identity().and_then(|xui| xui.gtg.as_deref())
    }

    pub fn xuid(&self) -> Option<&str> {
        self.identity().and_then(|xui| xui.xid.as_deref())
    }
}

impl Expiring for SisuToken {
    /// Earliest expiry of the title, user and authorization tokens
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        [
            self.title_token.not_after,
            self.user_token.not_after,
            self.authorization_token.not_after,
        ]
        .into_iter()
        .min()
    }
}

/// xCloud console transfer token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MsalToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl MsalToken {
    /// Value sent to the streaming service on MSAL connect
    pub fn transfer_token(&self) -> Option<&str> {
        self.lpt.as_deref().or(self.access_token.as_deref())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_user_token_without_stamp_is_not_valid() {
        let token = user_token(3600);
        assert_eq!(token.seconds_valid(), 0);
        assert!(!token.is_valid());
        assert!(token.needs_refresh());
    }

    #[test]
    fn test_refresh_margin() {
        let fresh = xbox_token("t", Duration::seconds(3600));
        assert!(!fresh.needs_refresh());

        let nearly_expired = xbox_token("t", Duration::seconds(45));
        assert!(nearly_expired.is_valid());
        assert!(nearly_expired.needs_refresh());
    }

    #[test]
    fn test_sisu_expiry_is_earliest_component() {
        let mut sisu = sisu_token(Duration::hours(8));
        sisu.title_token.not_after = Utc::now() + Duration::seconds(30);

        assert!(sisu.seconds_valid() <= 30);
        assert!(sisu.needs_refresh());
    }

    #[test]
    fn test_sisu_identity_claims() {
        let sisu = sisu_token(Duration::hours(1));
        assert_eq!(sisu.user_hash(), Some("1234567890"));
        assert_eq!(sisu.gamertag(), Some("Player One"));
        assert_eq!(sisu.xuid(), Some("2535400000000000"));
    }

    #[test]
    fn test_xbox_token_wire_format() {
        let token: XboxToken = serde_json::from_value(json!({
            "IssueInstant": "2024-05-01T10:00:00.1234567Z",
            "NotAfter": "2024-05-15T10:00:00.1234567Z",
            "Token": "eyJ...",
            "DisplayClaims": { "xdi": { "did": "F000", "dcs": "0" } }
        }))
        .unwrap();

        assert_eq!(token.token, "eyJ...");
        assert!(token.display_claims.xui.is_empty());
        assert!(token.display_claims.extra.contains_key("xdi"));
        assert!(token.authorization_header().is_none());
    }

    #[test]
    fn test_authorization_header() {
        let token = xbox_token("web-token", Duration::hours(1));
        assert_eq!(
            token.authorization_header().as_deref(),
            Some("XBL3.0 x=1234567890;web-token")
        );
    }
}
