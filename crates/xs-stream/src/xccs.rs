use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::StreamConfig;
use crate::errors::Result;
use crate::http::{XBOX_APP_HEADERS, read_json};

pub const XCCS_HOST: &str = "https://xccs.xboxlive.com";

/// Console registered to the signed-in account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Console {
    /// Server id to start an xHome session with
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub locale: String,
    /// `On`, `ConnectedStandby` or `Off`
    #[serde(default)]
    pub power_state: String,
    #[serde(default)]
    pub console_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListStatus {
    error_code: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConsoleList {
    status: ListStatus,
    #[serde(default)]
    result: Vec<Console>,
}

/// Console management through the xccs SmartGlass service
///
/// Every request carries the `XBL3.0` authorization of the xboxlive.com web token.
#[derive(Clone)]
pub struct XccsClient {
    http: Client,
    base: Url,
    authorization: String,
}

impl std::fmt::Debug for XccsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XccsClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl XccsClient {
    pub fn new(base: Url, authorization: impl Into<String>, config: &StreamConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base,
            authorization: authorization.into(),
        })
    }

    fn request(&self, builder: RequestBuilder, contract_version: &str) -> RequestBuilder {
        XBOX_APP_HEADERS
            .iter()
            .fold(builder, |builder, (name, value)| builder.header(*name, *value))
            .header("Authorization", &self.authorization)
            .header("Accept-Language", "en-US")
            .header("x-xbl-contract-version", contract_version)
    }

    /// Consoles of the account, including their power state
    #[instrument(skip(self))]
    pub async fn get_consoles(&self) -> Result<Vec<Console>> {
        let mut url = self.base.join("/lists/devices")?;
        url.query_pairs_mut()
            .append_pair("queryCurrentDevice", "false")
            .append_pair("includeStorageDevices", "true");

        let response = self.request(self.http.get(url.clone()), "2").send().await?;
        let list: ConsoleList = serde_json::from_value(read_json(&url, response).await?)?;

        if list.status.error_code != "OK" {
            warn!(
                code = %list.status.error_code,
                message = ?list.status.error_message,
                "Console list reported an error"
            );
        }
        debug!(count = list.result.len(), "Listed consoles");
        Ok(list.result)
    }

    /// Send a SmartGlass command; returns the `result` of the response, `[]` when absent
    #[instrument(skip(self, parameters))]
    pub async fn send_command(
        &self,
        console_id: &str,
        command_type: &str,
        command: &str,
        parameters: Vec<Value>,
    ) -> Result<Value> {
        let url = self.base.join("/commands")?;
        let body = json!({
            "destination": "Xbox",
            "type": command_type,
            "command": command,
            "sessionId": uuid::Uuid::new_v4().to_string(),
            "sourceId": "com.microsoft.smartglass",
            "parameters": parameters,
            "linkedXboxId": console_id,
        });

        let response = self
            .request(self.http.post(url.clone()), "4")
            .header("skillplatform", "RemoteManagement")
            .json(&body)
            .send()
            .await?;
        let mut body = read_json(&url, response).await?;

        Ok(match body.get_mut("result") {
            Some(result) if !result.is_null() => result.take(),
            _ => Value::Array(Vec::new()),
        })
    }

    pub async fn power_on(&self, console_id: &str) -> Result<Value> {
        self.send_command(console_id, "Power", "WakeUp", Vec::new()).await
    }

    pub async fn power_off(&self, console_id: &str) -> Result<Value> {
        self.send_command(console_id, "Power", "TurnOff", Vec::new()).await
    }

    /// Type `text` into the focused text field of the console
    pub async fn send_text(&self, console_id: &str, text: &str) -> Result<Value> {
        let parameters = vec![json!({ "replacementString": text })];
        self.send_command(console_id, "Shell", "InjectString", parameters)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StreamError;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const AUTHORIZATION: &str = "XBL3.0 x=1234567890;web-token";

    fn xccs(server: &MockServer) -> XccsClient {
        XccsClient::new(Url::parse(&server.uri()).unwrap(), AUTHORIZATION, &StreamConfig::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_consoles_are_listed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lists/devices"))
            .and(query_param("queryCurrentDevice", "false"))
            .and(query_param("includeStorageDevices", "true"))
            .and(header("Authorization", AUTHORIZATION))
            .and(header("x-xbl-contract-version", "2"))
            .and(header("x-xbl-client-name", "XboxApp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": { "errorCode": "OK", "errorMessage": null },
                "result": [{
                    "id": "F4001234ABCD",
                    "name": "Living room",
                    "locale": "en-US",
                    "powerState": "ConnectedStandby",
                    "consoleType": "XboxSeriesX",
                    "remoteManagementEnabled": true
                }],
                "agentUserId": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let consoles = xccs(&server).get_consoles().await.unwrap();
        assert_eq!(consoles.len(), 1);
        assert_eq!(consoles[0].id, "F4001234ABCD");
        assert_eq!(consoles[0].power_state, "ConnectedStandby");
        assert_eq!(consoles[0].extra["remoteManagementEnabled"], true);
    }

    #[tokio::test]
    async fn test_power_commands() {
        let server = MockServer::start().await;
        for (command, response) in [("WakeUp", json!({ "result": "OK", "uiText": null })), ("TurnOff", json!({}))] {
            Mock::given(method("POST"))
                .and(path("/commands"))
                .and(header("x-xbl-contract-version", "4"))
                .and(header("skillplatform", "RemoteManagement"))
                .and(body_partial_json(json!({
                    "destination": "Xbox",
                    "type": "Power",
                    "command": command,
                    "sourceId": "com.microsoft.smartglass",
                    "parameters": [],
                    "linkedXboxId": "F400"
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(response))
                .expect(1)
                .mount(&server)
                .await;
        }

        let client = xccs(&server);
        assert_eq!(client.power_on("F400").await.unwrap(), json!("OK"));
        assert_eq!(client.power_off("F400").await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_send_text_injects_string() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/commands"))
            .and(body_partial_json(json!({
                "type": "Shell",
                "command": "InjectString",
                "parameters": [{ "replacementString": "hello" }]
            })))
            .respond_with(|request: &Request| {
                let body: Value = serde_json::from_slice(&request.body).unwrap();
                ResponseTemplate::new(200).set_body_json(json!({ "result": body["sessionId"] }))
            })
            .expect(1)
            .mount(&server)
            .await;

        let result = xccs(&server).send_text("F400", "hello").await.unwrap();
        assert!(uuid::Uuid::parse_str(result.as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_rejected_command_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/commands"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        match xccs(&server).power_on("F400").await {
            Err(StreamError::Http { status, body, .. }) => {
                assert_eq!(status.as_u16(), 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
