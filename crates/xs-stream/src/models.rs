use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::{Result, StreamError};

/// Which gssv backend a client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// xHome, streaming from the user's console
    Home,
    /// xCloud, streaming from a cloud blade
    Cloud,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Cloud => "cloud",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `X-MS-Device-Info` payload describing the client
pub fn device_info(os_name: &str) -> Value {
    json!({
        "appInfo": {
            "env": {
                "clientAppId": "www.xbox.com",
                "clientAppType": "browser",
                "clientAppVersion": "26.1.91",
                "clientSdkVersion": "10.3.7",
                "httpEnvironment": "prod",
                "sdkInstallId": ""
            }
        },
        "dev": {
            "hw": {
                "make": "Microsoft",
                "model": "unknown",
                "sdktype": "web"
            },
            "os": {
                "name": os_name,
                "ver": "22631.2715",
                "platform": "desktop"
            },
            "displayInfo": {
                "dimensions": {
                    "widthInPixels": 1920,
                    "heightInPixels": 1080
                },
                "pixelDensity": {
                    "dpiX": 1,
                    "dpiY": 1
                }
            },
            "browser": {
                "browserName": "chrome",
                "browserVersion": "130.0"
            }
        }
    })
}

/// `/v5/sessions/{kind}/play` request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    /// Cloud title; empty for console sessions
    pub title_id: String,
    pub system_update_group: String,
    pub client_session_id: String,
    pub settings: PlaySettings,
    /// Console id; empty for cloud sessions
    pub server_id: String,
    pub fallback_region_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaySettings {
    pub nano_version: String,
    pub enable_text_to_speech: bool,
    pub high_contrast: u8,
    pub locale: String,
    pub use_ice_connection: bool,
    pub timezone_offset_minutes: i32,
    pub sdk_type: String,
    pub os_name: String,
}

impl PlayRequest {
    pub fn new(kind: StreamKind, target: &str, locale: &str, os_name: &str) -> Self {
        let (title_id, server_id) = match kind {
            StreamKind::Cloud => (target.to_string(), String::new()),
            StreamKind::Home => (String::new(), target.to_string()),
        };

        Self {
            title_id,
            system_update_group: String::new(),
            client_session_id: String::new(),
            settings: PlaySettings {
                nano_version: "V3;WebrtcTransport.dll".to_string(),
                enable_text_to_speech: false,
                high_contrast: 0,
                locale: locale.to_string(),
                use_ice_connection: false,
                timezone_offset_minutes: 120,
                sdk_type: "web".to_string(),
                os_name: os_name.to_string(),
            },
            server_id,
            fallback_region_names: Vec::new(),
        }
    }
}

/// `/play` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayResult {
    pub session_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl PlayResult {
    /// Session id, the last segment of `v5/sessions/{kind}/{id}`
    pub fn session_id(&self) -> Result<&str> {
        self.session_path
            .trim_start_matches('/')
            .split('/')
            .nth(3)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StreamError::InvalidSessionPath(self.session_path.clone()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetails {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `/state` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Double-encoded exchange envelope used by `/sdp` and `/ice`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResult {
    pub exchange_response: String,
    #[serde(default)]
    pub error_details: Option<Value>,
}

impl ExchangeResult {
    /// Parse the inner JSON document
    pub fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
        let envelope: ExchangeResult = serde_json::from_value(value)
            .map_err(|e| StreamError::MalformedExchange(e.to_string()))?;
        serde_json::from_str(&envelope.exchange_response)
            .map_err(|e| StreamError::MalformedExchange(e.to_string()))
    }
}

/// Data channel version range
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelVersion {
    pub min_version: u32,
    pub max_version: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfiguration {
    pub bytes_per_sample: u32,
    pub expected_clip_duration_ms: u32,
    pub format: ChatFormat,
    pub num_channels: u32,
    pub sample_frequency_hz: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatFormat {
    pub codec: String,
    pub container: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SdpConfiguration {
    #[serde(rename_all = "camelCase")]
    Channels {
        chat_configuration: ChatConfiguration,
        chat: ChannelVersion,
        control: ChannelVersion,
        input: ChannelVersion,
        message: ChannelVersion,
    },
    #[serde(rename_all = "camelCase")]
    ChatRenegotiation {
        is_media_streams_chat_renegotiation: bool,
    },
}

impl SdpConfiguration {
    pub fn channels() -> Self {
        Self::Channels {
            chat_configuration: ChatConfiguration {
                bytes_per_sample: 2,
                expected_clip_duration_ms: 20,
                format: ChatFormat {
                    codec: "opus".to_string(),
                    container: "webm".to_string(),
                },
                num_channels: 1,
                sample_frequency_hz: 24000,
            },
            chat: ChannelVersion {
                min_version: 1,
                max_version: 1,
            },
            control: ChannelVersion {
                min_version: 1,
                max_version: 3,
            },
            input: ChannelVersion {
                min_version: 1,
                max_version: 8,
            },
            message: ChannelVersion {
                min_version: 1,
                max_version: 1,
            },
        }
    }

    pub fn chat_renegotiation() -> Self {
        Self::ChatRenegotiation {
            is_media_streams_chat_renegotiation: true,
        }
    }
}

/// `/sdp` offer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpOffer {
    pub message_type: String,
    pub sdp: String,
    pub configuration: SdpConfiguration,
}

/// Decoded SDP answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SdpAnswer {
    pub sdp: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `/ice` request carrying the local candidates as produced by the player
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceOffer {
    pub message_type: String,
    pub candidate: Value,
}

/// ICE candidate message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default = "ice_message_type")]
    pub message_type: String,
    /// Sent as a string; the service also answers with numbers
    #[serde(default, deserialize_with = "string_or_number")]
    pub sdp_m_line_index: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub sdp_mid: String,
}

impl IceCandidate {
    /// Candidate on the first media line
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            message_type: ice_message_type(),
            sdp_m_line_index: "0".to_string(),
            sdp_mid: "0".to_string(),
        }
    }
}

fn ice_message_type() -> String {
    "iceCandidate".to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
        Missing(Option<()>),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
        Raw::Missing(_) => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_path() {
        let result = PlayResult {
            session_path: "v5/sessions/home/F2C3A7B1-0000".to_string(),
            session_id: None,
            state: None,
        };
        assert_eq!(result.session_id().unwrap(), "F2C3A7B1-0000");

        let broken = PlayResult {
            session_path: "v5/sessions".to_string(),
            ..result
        };
        assert!(matches!(
            broken.session_id(),
            Err(StreamError::InvalidSessionPath(_))
        ));
    }

    #[test]
    fn test_play_request_targets() {
        let home = serde_json::to_value(PlayRequest::new(StreamKind::Home, "F400", "en-US", "android")).unwrap();
        assert_eq!(home["serverId"], "F400");
        assert_eq!(home["titleId"], "");
        assert_eq!(home["settings"]["nanoVersion"], "V3;WebrtcTransport.dll");
        assert_eq!(home["fallbackRegionNames"], json!([]));

        let cloud = serde_json::to_value(PlayRequest::new(StreamKind::Cloud, "FORZA", "nl-NL", "tizen")).unwrap();
        assert_eq!(cloud["titleId"], "FORZA");
        assert_eq!(cloud["serverId"], "");
        assert_eq!(cloud["settings"]["osName"], "tizen");
        assert_eq!(cloud["settings"]["locale"], "nl-NL");
    }

    #[test]
    fn test_sdp_configurations() {
        let channels = serde_json::to_value(SdpConfiguration::channels()).unwrap();
        assert_eq!(channels["chatConfiguration"]["sampleFrequencyHz"], 24000);
        assert_eq!(channels["chatConfiguration"]["format"]["codec"], "opus");
        assert_eq!(channels["input"], json!({ "minVersion": 1, "maxVersion": 8 }));
        assert_eq!(channels["control"]["maxVersion"], 3);

        let chat = serde_json::to_value(SdpConfiguration::chat_renegotiation()).unwrap();
        assert_eq!(chat, json!({ "isMediaStreamsChatRenegotiation": true }));
    }

    #[test]
    fn test_ice_candidate_accepts_numeric_index() {
        let candidate: IceCandidate = serde_json::from_value(json!({
            "candidate": "a=candidate:1 1 UDP 100 10.0.0.2 9002 typ host",
            "messageType": "iceCandidate",
            "sdpMLineIndex": 0,
            "sdpMid": "0"
        }))
        .unwrap();
        assert_eq!(candidate.sdp_m_line_index, "0");

        let output = serde_json::to_value(IceCandidate::new("a=end-of-candidates")).unwrap();
        assert_eq!(output["sdpMLineIndex"], "0");
        assert_eq!(output["messageType"], "iceCandidate");
    }

    #[test]
    fn test_exchange_decode() {
        let answer: SdpAnswer = ExchangeResult::decode(json!({
            "exchangeResponse": "{\"sdp\":\"v=0...\",\"sdpType\":\"answer\"}",
            "errorDetails": null
        }))
        .unwrap();
        assert_eq!(answer.sdp, "v=0...");

        let broken = ExchangeResult::decode::<SdpAnswer>(json!({ "exchangeResponse": "not json" }));
        assert!(matches!(broken, Err(StreamError::MalformedExchange(_))));
    }
}
