use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::signer::Jwk;

/// device.auth.xboxlive.com request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceAuthRequest {
    pub properties: DeviceAuthProperties,
    pub relying_party: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceAuthProperties {
    pub auth_method: String,
    pub id: String,
    pub device_type: String,
    pub serial_number: String,
    pub version: String,
    pub proof_key: Jwk,
}

/// sisu.xboxlive.com/authenticate request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SisuAuthenticateRequest {
    pub app_id: String,
    pub title_id: String,
    pub redirect_uri: String,
    pub device_token: String,
    pub sandbox: String,
    pub token_type: String,
    pub offers: Vec<String>,
    pub query: SisuQuery,
}

#[derive(Debug, Clone, Serialize)]
pub struct SisuQuery {
    pub display: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub state: String,
}

/// sisu.xboxlive.com/authenticate response, with the `X-SessionId` header folded in
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SisuAuthentication {
    pub msa_oauth_redirect: String,
    #[serde(default)]
    pub msa_request_parameters: Value,
    #[serde(skip)]
    pub session_id: Option<String>,
}

/// sisu.xboxlive.com/authorize request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SisuAuthorizeRequest {
    pub access_token: String,
    pub app_id: String,
    pub device_token: String,
    pub sandbox: String,
    pub site_name: String,
    pub use_modern_gamertag: bool,
    pub proof_key: Jwk,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// XSTS authorize request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsAuthRequest {
    pub properties: XstsAuthProperties,
    pub relying_party: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsAuthProperties {
    pub sandbox_id: String,
    pub device_token: String,
    pub title_token: String,
    pub user_tokens: Vec<String>,
}

/// XSTS error response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsErrorResponse {
    #[serde(rename = "XErr")]
    pub xerr: u64,
    #[serde(default)]
    pub message: Option<String>,
}

/// gssv `/v2/login/user` request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamLoginRequest {
    pub token: String,
    pub offering_id: String,
}

/// profile.xboxlive.com settings response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub profile_users: Vec<ProfileUser>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUser {
    pub id: String,
    #[serde(default)]
    pub settings: Vec<ProfileSetting>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSetting {
    pub id: String,
    pub value: String,
}

/// Xbox profile of the signed-in user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XboxProfile {
    pub xuid: String,
    pub gamertag: Option<String>,
    pub display_name: Option<String>,
    pub gamerpic: Option<String>,
    pub gamerscore: Option<String>,
}

impl From<ProfileUser> for XboxProfile {
    fn from(user: ProfileUser) -> Self {
        let mut profile = XboxProfile {
            xuid: user.id,
            ..Default::default()
        };

        for setting in user.settings {
            match setting.id.as_str() {
                "Gamertag" => profile.gamertag = Some(setting.value),
                "GameDisplayName" => profile.display_name = Some(setting.value),
                "GameDisplayPicRaw" => profile.gamerpic = Some(setting.value),
                "Gamerscore" => profile.gamerscore = Some(setting.value),
                _ => {}
            }
        }
        profile
    }
}
