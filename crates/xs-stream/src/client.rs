use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;
use xs_core::{Capabilities, SettingsReader};

use crate::config::StreamConfig;
use crate::errors::{Result, StreamError};
use crate::ice::rewrite_candidates;
use crate::models::{
    ExchangeResult, IceCandidate, IceOffer, PlayRequest, PlayResult, SdpAnswer,
    SdpConfiguration, SdpOffer, SessionState, StreamKind, device_info,
};

/// Client for one gssv streaming host
///
/// Every request carries the streaming token as bearer. GETs answered with 204
/// are repeated after [`StreamConfig::retry_delay`] and ICE polling waits
/// [`StreamConfig::ice_poll_interval`] between attempts; both loops give up at
/// [`StreamConfig::deadline`] or when the client's cancellation token fires.
pub struct StreamClient {
    http: Client,
    base: Url,
    token: String,
    kind: StreamKind,
    settings: Arc<dyn SettingsReader>,
    config: StreamConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("base", &self.base.as_str())
            .field("kind", &self.kind)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl StreamClient {
    pub fn new(
        caps: &Capabilities,
        base: Url,
        token: impl Into<String>,
        kind: StreamKind,
        config: StreamConfig,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }

        Ok(Self {
            http: builder.build()?,
            base,
            token: token.into(),
            kind,
            settings: caps.settings.clone(),
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Token aborting every pending and future poll of this client
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn get_waiting_times(&self, title_id: &str) -> Result<Value> {
        self.get(&format!("/v1/waittime/{title_id}")).await
    }

    pub async fn get_titles(&self) -> Result<Value> {
        self.get("/v2/titles").await
    }

    pub async fn get_recent_titles(&self) -> Result<Value> {
        self.get("/v2/titles/mru?mr=25").await
    }

    pub async fn get_active_sessions(&self) -> Result<Value> {
        self.get(&self.sessions_path("active")).await
    }

    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn stop_stream(&self, session_id: &str) -> Result<()> {
        self.send(Method::DELETE, &self.sessions_path(session_id), None)
            .await?;
        Ok(())
    }

    /// Request a new session for `target`, a console id for home or a title id for cloud
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn start_stream(&self, target: &str) -> Result<PlayResult> {
        let settings = self.settings.settings();
        let os_name = settings.os_name();
        let request = PlayRequest::new(self.kind, target, settings.locale(), os_name);
        let device_info = serde_json::to_string(&device_info(os_name))?;

        let url = self.url(&self.sessions_path("play"))?;
        let builder = self
            .http
            .post(url.clone())
            .header("X-MS-Device-Info", device_info)
            .json(&request);
        let value = self.execute(&url, builder).await?;

        let result: PlayResult = serde_json::from_value(value)?;
        debug!(session_path = %result.session_path, "Session requested");
        Ok(result)
    }

    pub async fn get_stream_state(&self, session_id: &str) -> Result<SessionState> {
        let value = self
            .get(&self.sessions_path(&format!("{session_id}/state")))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Offer the local SDP and wait for the console's answer
    #[instrument(skip(self, sdp), fields(kind = %self.kind))]
    pub async fn send_sdp(&self, session_id: &str, sdp: &str) -> Result<SdpAnswer> {
        self.exchange_sdp(session_id, sdp, SdpConfiguration::channels())
            .await
    }

    /// Renegotiate the media streams to add the chat channel
    #[instrument(skip(self, sdp), fields(kind = %self.kind))]
    pub async fn send_chat_sdp(&self, session_id: &str, sdp: &str) -> Result<SdpAnswer> {
        self.exchange_sdp(session_id, sdp, SdpConfiguration::chat_renegotiation())
            .await
    }

    /// Send the local candidates and return the rewritten remote ones
    #[instrument(skip(self, candidates), fields(kind = %self.kind))]
    pub async fn send_ice(&self, session_id: &str, candidates: Value) -> Result<Vec<IceCandidate>> {
        let offer = IceOffer {
            message_type: "iceCandidate".to_string(),
            candidate: candidates,
        };
        self.post(
            &self.sessions_path(&format!("{session_id}/ice")),
            &serde_json::to_value(offer)?,
        )
        .await?;

        self.check_ice(session_id).await
    }

    /// Poll for the remote candidates until the service has them
    pub async fn check_ice(&self, session_id: &str) -> Result<Vec<IceCandidate>> {
        let path = self.sessions_path(&format!("{session_id}/ice"));
        let started = Instant::now();

        loop {
            let value = self.get(&path).await?;
            if value.as_str() == Some("") {
                debug!("Remote candidates not ready yet");
                let url = self.url(&path)?;
                self.pause(&url, started, self.config.ice_poll_interval)
                    .await?;
                continue;
            }

            let remote: Vec<IceCandidate> = ExchangeResult::decode(value)?;
            debug!(count = remote.len(), "Received remote candidates");
            return rewrite_candidates(remote, self.settings.settings().ipv6);
        }
    }

    /// Hand the MSAL transfer token to a cloud session waiting in `ReadyToConnect`
    #[instrument(skip(self, user_token), fields(kind = %self.kind))]
    pub async fn send_msal_auth(&self, session_id: &str, user_token: &str) -> Result<Value> {
        self.post(
            &self.sessions_path(&format!("{session_id}/connect")),
            &json!({ "userToken": user_token }),
        )
        .await
    }

    pub async fn send_keepalive(&self, session_id: &str) -> Result<Value> {
        self.post(
            &self.sessions_path(&format!("{session_id}/keepalive")),
            &json!({}),
        )
        .await
    }

    async fn exchange_sdp(
        &self,
        session_id: &str,
        sdp: &str,
        configuration: SdpConfiguration,
    ) -> Result<SdpAnswer> {
        let path = self.sessions_path(&format!("{session_id}/sdp"));
        let offer = SdpOffer {
            message_type: "offer".to_string(),
            sdp: sdp.to_string(),
            configuration,
        };

        self.post(&path, &serde_json::to_value(offer)?).await?;
        let value = self.get(&path).await?;
        ExchangeResult::decode(value)
    }

    fn sessions_path(&self, rest: &str) -> String {
        format!("/v5/sessions/{}/{}", self.kind, rest)
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    /// GET, repeating while the service answers 204
    async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path)?;
        let started = Instant::now();

        loop {
            let response = self
                .dispatch(self.http.get(url.clone()).bearer_auth(&self.token))
                .await?;

            if response.status() == StatusCode::NO_CONTENT {
                debug!(url = %url, "No content yet, retrying");
                self.pause(&url, started, self.config.retry_delay).await?;
                continue;
            }

            return read_value(&url, response).await;
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.url(path)?;
        let mut builder = self.http.request(method, url.clone());
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.execute(&url, builder).await
    }

    async fn execute(&self, url: &Url, builder: RequestBuilder) -> Result<Value> {
        let response = self.dispatch(builder.bearer_auth(&self.token)).await?;
        read_value(url, response).await
    }

    async fn dispatch(&self, builder: RequestBuilder) -> Result<Response> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            response = builder.send() => Ok(response?),
        }
    }

    async fn pause(&self, url: &Url, started: Instant, delay: Duration) -> Result<()> {
        let waited = started.elapsed();
        if waited + delay > self.config.deadline {
            warn!(url = %url, ?waited, "Polling deadline reached");
            return Err(StreamError::Timeout {
                url: url.to_string(),
                waited,
            });
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Body of a successful response: JSON when it parses, the raw text otherwise
async fn read_value(url: &Url, response: Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        warn!(url = %url, %status, "Streaming request failed");
        return Err(StreamError::Http {
            url: url.to_string(),
            status,
            body,
        });
    }

    Ok(parse_body(body))
}

pub(crate) fn parse_body(body: String) -> Value {
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_json, body_partial_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};
    use xs_core::Settings;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            retry_delay: Duration::from_millis(20),
            ice_poll_interval: Duration::from_millis(20),
            deadline: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn client(server: &MockServer, kind: StreamKind, settings: Settings, config: StreamConfig) -> StreamClient {
        let caps = Capabilities::in_memory(settings);
        StreamClient::new(&caps, Url::parse(&server.uri()).unwrap(), "gs-token", kind, config).unwrap()
    }

    fn exchange(inner: Value) -> Value {
        json!({ "exchangeResponse": inner.to_string(), "errorDetails": null })
    }

    #[tokio::test]
    async fn test_start_stream_home_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/sessions/home/play"))
            .and(header("authorization", "Bearer gs-token"))
            .and(header_exists("x-ms-device-info"))
            .and(body_partial_json(json!({
                "titleId": "",
                "serverId": "F4001234",
                "settings": { "osName": "windows", "locale": "nl-NL" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sessionPath": "v5/sessions/home/ABCDEF",
                "state": "Provisioning"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let settings = Settings {
            resolution: 1080,
            preferred_game_language: "nl-NL".to_string(),
            ..Default::default()
        };
        let client = client(&server, StreamKind::Home, settings, fast_config());
        let result = client.start_stream("F4001234").await.unwrap();
        assert_eq!(result.session_id().unwrap(), "ABCDEF");
    }

    #[tokio::test]
    async fn test_start_stream_cloud_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/sessions/cloud/play"))
            .and(body_partial_json(json!({ "titleId": "FORZA5", "serverId": "" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sessionPath": "/v5/sessions/cloud/XYZ"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Cloud, Settings::default(), fast_config());
        let result = client.start_stream("FORZA5").await.unwrap();
        assert_eq!(result.session_id().unwrap(), "XYZ");
    }

    #[tokio::test]
    async fn test_get_retries_on_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/sessions/home/ABC/state"))
            .respond_with(ResponseTemplate::new(204))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/sessions/home/ABC/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "Provisioned" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Home, Settings::default(), fast_config());
        let state = client.get_stream_state("ABC").await.unwrap();
        assert_eq!(state.state, "Provisioned");
    }

    #[tokio::test]
    async fn test_delete_no_content_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v5/sessions/cloud/ABC"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Cloud, Settings::default(), fast_config());
        client.stop_stream("ABC").await.unwrap();
    }

    #[tokio::test]
    async fn test_http_error_carries_url_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/titles"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Cloud, Settings::default(), fast_config());
        match client.get_titles().await {
            Err(StreamError::Http { url, status, body }) => {
                assert!(url.ends_with("/v2/titles"));
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recent_titles_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/titles/mru"))
            .and(query_param("mr", "25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Cloud, Settings::default(), fast_config());
        assert_eq!(client.get_recent_titles().await.unwrap()["results"], json!([]));
    }

    #[tokio::test]
    async fn test_sdp_exchange_is_decoded_twice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/sessions/home/ABC/sdp"))
            .and(body_partial_json(json!({
                "messageType": "offer",
                "sdp": "v=0 local",
                "configuration": { "input": { "minVersion": 1, "maxVersion": 8 } }
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/sessions/home/ABC/sdp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(exchange(json!({ "sdp": "v=0..." }))))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Home, Settings::default(), fast_config());
        let answer = client.send_sdp("ABC", "v=0 local").await.unwrap();
        assert_eq!(answer.sdp, "v=0...");
    }

    #[tokio::test]
    async fn test_chat_sdp_sends_renegotiation_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/sessions/cloud/ABC/sdp"))
            .and(body_json(json!({
                "messageType": "offer",
                "sdp": "v=0 chat",
                "configuration": { "isMediaStreamsChatRenegotiation": true }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/sessions/cloud/ABC/sdp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(exchange(json!({ "sdp": "v=0 answer" }))))
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Cloud, Settings::default(), fast_config());
        assert_eq!(client.send_chat_sdp("ABC", "v=0 chat").await.unwrap().sdp, "v=0 answer");
    }

    #[tokio::test]
    async fn test_sdp_malformed_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/sessions/home/ABC/sdp"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/sessions/home/ABC/sdp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "exchangeResponse": "{oops" })))
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Home, Settings::default(), fast_config());
        assert!(matches!(
            client.send_sdp("ABC", "v=0").await,
            Err(StreamError::MalformedExchange(_))
        ));
    }

    #[tokio::test]
    async fn test_ice_polls_until_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/sessions/home/ABC/ice"))
            .and(body_partial_json(json!({ "messageType": "iceCandidate" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/sessions/home/ABC/ice"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(3)
            .with_priority(1)
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/sessions/home/ABC/ice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(exchange(json!([
                { "candidate": "a=candidate:1 1 UDP 100 10.0.0.2 9002 typ host ", "sdpMLineIndex": 0, "sdpMid": "0" },
                { "candidate": "a=end-of-candidates", "sdpMLineIndex": 0, "sdpMid": "0" }
            ]))))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Home, Settings::default(), StreamConfig::default());
        let started = std::time::Instant::now();
        let candidates = client
            .send_ice("ABC", json!([{ "candidate": "a=candidate:1 1 UDP 1 192.168.1.2 50000 typ host" }]))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[0].candidate,
            "a=candidate:1 1 UDP 2130706431 10.0.0.2 9002 typ host "
        );
        assert_eq!(candidates[1].candidate, "a=end-of-candidates");
    }

    #[tokio::test]
    async fn test_ice_prefers_ipv6_from_settings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/sessions/cloud/ABC/ice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(exchange(json!([
                { "candidate": "a=candidate:1 1 UDP 100 10.0.0.2 9002 typ host ", "sdpMLineIndex": "0", "sdpMid": "0" },
                { "candidate": "a=candidate:2 1 UDP 100 2a01:4f8::1 9002 typ host ", "sdpMLineIndex": "0", "sdpMid": "0" }
            ]))))
            .mount(&server)
            .await;

        let settings = Settings {
            ipv6: true,
            ..Default::default()
        };
        let client = client(&server, StreamKind::Cloud, settings, fast_config());
        let candidates = client.check_ice("ABC").await.unwrap();
        assert!(candidates[0].candidate.contains("2a01:4f8::1"));
    }

    #[tokio::test]
    async fn test_ice_polling_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/sessions/home/ABC/ice"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = StreamConfig {
            deadline: Duration::from_millis(200),
            ..fast_config()
        };
        let client = client(&server, StreamKind::Home, Settings::default(), config);
        match client.check_ice("ABC").await {
            Err(StreamError::Timeout { url, waited }) => {
                assert!(url.ends_with("/v5/sessions/home/ABC/ice"));
                assert!(waited > Duration::from_millis(180));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_polling_stops_on_cancel() {
        let server = MockServer::start().await;
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        Mock::given(method("GET"))
            .and(path("/v5/sessions/home/ABC/state"))
            .respond_with(move |_: &Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(204)
            })
            .mount(&server)
            .await;

        let client = Arc::new(client(&server, StreamKind::Home, Settings::default(), fast_config()));
        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.get_stream_state("ABC").await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        client.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(StreamError::Cancelled)));
        assert!(polls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_msal_auth_and_keepalive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/sessions/cloud/ABC/connect"))
            .and(body_json(json!({ "userToken": "transfer" })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v5/sessions/cloud/ABC/keepalive"))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "alertSeconds": 90 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, StreamKind::Cloud, Settings::default(), fast_config());
        assert_eq!(client.send_msal_auth("ABC", "transfer").await.unwrap(), json!(""));
        assert_eq!(client.send_keepalive("ABC").await.unwrap()["alertSeconds"], 90);
    }

    #[test]
    fn test_parse_body_falls_back_to_text() {
        assert_eq!(parse_body(String::new()), json!(""));
        assert_eq!(parse_body("plain".to_string()), json!("plain"));
        assert_eq!(parse_body("{\"a\":1}".to_string()), json!({ "a": 1 }));
    }
}
