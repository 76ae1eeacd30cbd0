use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xs_auth::{
    AuthObserver, Authenticator, Endpoints, StreamingTokens, WebAuthSurface, XalConfig, XboxProfile,
    XstsToken,
};
use xs_core::{Capabilities, Settings};
use xs_stream::{ServiceHosts, StreamConfig};

use crate::coordinator::Coordinator;

pub struct NullHost;

#[async_trait]
impl AuthObserver for NullHost {
    async fn authentication_completed(
        &self,
        _tokens: StreamingTokens,
        _web_token: XstsToken,
        _profile: Option<XboxProfile>,
    ) {
    }
}

#[async_trait]
impl WebAuthSurface for NullHost {
    async fn open(&self, _url: &str) -> xs_auth::Result<()> {
        Ok(())
    }

    fn close(&self) {}
}

pub fn xbox_token(token: &str) -> Value {
    json!({
        "IssueInstant": Utc::now(),
        "NotAfter": Utc::now() + chrono::Duration::hours(8),
        "Token": token,
        "DisplayClaims": {
            "xui": [{ "uhs": "1234567890", "gtg": "Player One", "xid": "2535400000000000" }]
        }
    })
}

pub fn token_document() -> Value {
    json!({
        "userToken": {
            "token_type": "bearer",
            "expires_in": 3600,
            "scope": "service::user.auth.xboxlive.com::MBI_SSL",
            "access_token": "access-token",
            "refresh_token": "refresh-token",
            "user_id": "user-id",
            "expires_on": Utc::now() + chrono::Duration::hours(1)
        },
        "sisuToken": {
            "DeviceToken": "device-token",
            "TitleToken": xbox_token("title-token"),
            "UserToken": xbox_token("user-token"),
            "AuthorizationToken": xbox_token("authorization-token")
        }
    })
}

pub fn streaming_token(server: &MockServer, gs_token: &str) -> Value {
    json!({
        "offeringSettings": {
            "allowRegionSelection": true,
            "regions": [
                { "name": "WestEurope", "baseUri": server.uri(), "isDefault": true, "fallbackPriority": 0 }
            ]
        },
        "market": "NL",
        "gsToken": gs_token,
        "tokenType": "bearer",
        "durationInSeconds": 14400
    })
}

/// Authenticator and coordinator wired against one mock server hosting every endpoint
pub struct Harness {
    pub caps: Capabilities,
    pub auth: Arc<Authenticator>,
    base: Url,
}

impl Harness {
    /// Seed a signed-in user; `cloud` decides whether an xCloud offering is granted
    pub async fn start(server: &MockServer, cloud: bool) -> Self {
        Mock::given(method("POST"))
            .and(path("/xsts/authorize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(xbox_token("xsts-token")))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/xhome/v2/login/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(streaming_token(server, "home-gs")))
            .mount(server)
            .await;

        let cloud_response = if cloud {
            ResponseTemplate::new(200).set_body_json(streaming_token(server, "cloud-gs"))
        } else {
            ResponseTemplate::new(403).set_body_string("not entitled")
        };
        Mock::given(method("POST"))
            .and(path("/xgpuweb/v2/login/user"))
            .respond_with(cloud_response)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/xgpuwebf2p/v2/login/user"))
            .respond_with(ResponseTemplate::new(403).set_body_string("not entitled"))
            .mount(server)
            .await;

        let caps = Capabilities::in_memory(Settings::default());
        caps.store
            .set(xs_auth::TOKEN_STORE_KEY, token_document())
            .await
            .unwrap();

        let base = Url::parse(&server.uri()).unwrap();
        let config = XalConfig {
            endpoints: Endpoints::with_base(&base).unwrap(),
            ..Default::default()
        };
        let host = Arc::new(NullHost);
        let auth = Authenticator::new(caps.clone(), config, host.clone(), host)
            .await
            .unwrap();

        Self {
            caps,
            auth: Arc::new(auth),
            base,
        }
    }

    pub fn coordinator(&self) -> Coordinator {
        let config = StreamConfig {
            retry_delay: Duration::from_millis(20),
            ice_poll_interval: Duration::from_millis(20),
            deadline: Duration::from_secs(5),
            ..Default::default()
        };
        Coordinator::new(
            self.caps.clone(),
            self.auth.clone(),
            config,
            ServiceHosts::with_base(&self.base),
        )
    }
}
