use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tokens::Expiring;

/// Regional streaming host offered by the gssv service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub name: String,
    pub base_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_test_hostname: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_update_groups: Option<Value>,
    #[serde(default)]
    pub fallback_priority: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OfferingSettings {
    #[serde(default)]
    pub allow_region_selection: bool,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// gssv `/v2/login/user` response body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamingTokenData {
    #[serde(default)]
    pub offering_settings: OfferingSettings,
    #[serde(default)]
    pub market: String,
    pub gs_token: String,
    #[serde(default)]
    pub token_type: String,
    pub duration_in_seconds: i64,
}

/// Bearer token for one streaming offering plus its region list
///
/// Validity is counted from the moment the token was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingToken {
    pub data: StreamingTokenData,
    received_at: DateTime<Utc>,
}

impl StreamingToken {
    pub fn new(data: StreamingTokenData) -> Self {
        Self::received_at(data, Utc::now())
    }

    pub fn received_at(data: StreamingTokenData, received_at: DateTime<Utc>) -> Self {
        Self { data, received_at }
    }

    pub fn gs_token(&self) -> &str {
        &self.data.gs_token
    }

    pub fn market(&self) -> &str {
        &self.data.market
    }

    pub fn regions(&self) -> &[Region] {
        &self.data.offering_settings.regions
    }

    /// The region flagged default, if any
    pub fn default_region(&self) -> Option<&Region> {
        self.regions().iter().find(|region| region.is_default)
    }

    /// Make `name` the single default region
    ///
    /// Returns false and leaves the flags untouched when no region has that name.
    pub fn set_default_region(&mut self, name: &str) -> bool {
        let regions = &mut self.data.offering_settings.regions;
        if !regions.iter().any(|region| region.name == name) {
            return false;
        }

        for region in regions.iter_mut() {
            region.is_default = region.name == name;
        }
        true
    }
}

impl Expiring for StreamingToken {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        Some(self.received_at + Duration::seconds(self.data.duration_in_seconds))
    }
}

/// Cached xCloud token state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamingTokenSlot {
    #[default]
    NotFetched,
    /// Neither cloud offering granted a token; kept until the next xHome fetch or refresh
    Unavailable,
    Available(StreamingToken),
}

impl StreamingTokenSlot {
    pub fn token(&self) -> Option<&StreamingToken> {
        match self {
            Self::Available(token) => Some(token),
            _ => None,
        }
    }

    /// True when the slot must be (re)fetched before use
    pub fn needs_fetch(&self) -> bool {
        match self {
            Self::Available(token) => token.needs_refresh(),
            Self::NotFetched => true,
            Self::Unavailable => false,
        }
    }
}

/// Streaming tokens handed to the host once authentication completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingTokens {
    pub xhome_token: StreamingToken,
    /// `None` when the account has no cloud gaming capability
    pub xcloud_token: Option<StreamingToken>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub fn streaming_token_data(gs_token: &str, duration_in_seconds: i64) -> StreamingTokenData {
        serde_json::from_value(json!({
            "offeringSettings": {
                "allowRegionSelection": true,
                "regions": [
                    {
                        "name": "WestEurope",
                        "baseUri": "https://weu.core.gssv-play-prod.xboxlive.com",
                        "networkTestHostname": "weu.network.test",
                        "isDefault": true,
                        "systemUpdateGroups": null,
                        "fallbackPriority": -1
                    },
                    {
                        "name": "EastUS",
                        "baseUri": "https://eus.core.gssv-play-prod.xboxlive.com",
                        "networkTestHostname": "eus.network.test",
                        "isDefault": false,
                        "fallbackPriority": 2
                    }
                ],
                "selectableServerTypes": null,
                "clientCloudSettings": { "Environments": [] }
            },
            "market": "NL",
            "gsToken": gs_token,
            "tokenType": "bearer",
            "durationInSeconds": duration_in_seconds
        }))
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_default_region() {
        let token = StreamingToken::new(streaming_token_data("gs", 14400));
        assert_eq!(token.default_region().unwrap().name, "WestEurope");
        assert_eq!(token.market(), "NL");
        assert!(token.data.offering_settings.extra.contains_key("clientCloudSettings"));
    }

    #[test]
    fn test_set_default_region_keeps_single_default() {
        let mut token = StreamingToken::new(streaming_token_data("gs", 14400));

        assert!(token.set_default_region("EastUS"));
        let defaults: Vec<_> = token
            .regions()
            .iter()
            .filter(|region| region.is_default)
            .map(|region| region.name.as_str())
            .collect();
        assert_eq!(defaults, vec!["EastUS"]);

        assert!(!token.set_default_region("Mars"));
        assert_eq!(token.default_region().unwrap().name, "EastUS");
    }

    #[test]
    fn test_validity_counts_from_receipt() {
        let data = streaming_token_data("gs", 3600);
        let old = StreamingToken::received_at(data.clone(), Utc::now() - Duration::seconds(3570));
        assert!(old.needs_refresh());

        let fresh = StreamingToken::new(data);
        assert!(!fresh.needs_refresh());
    }

    #[test]
    fn test_slot_needs_fetch() {
        assert!(StreamingTokenSlot::NotFetched.needs_fetch());
        assert!(!StreamingTokenSlot::Unavailable.needs_fetch());

        let slot =
            StreamingTokenSlot::Available(StreamingToken::new(streaming_token_data("gs", 3600)));
        assert!(!slot.needs_fetch());
        assert_eq!(slot.token().unwrap().gs_token(), "gs");
    }
}
