use reqwest::Client;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::config::StreamConfig;
use crate::errors::Result;
use crate::http::{XBOX_APP_HEADERS, read_json};

pub const ACHIEVEMENTS_HOST: &str = "https://achievements.xboxlive.com";

/// Achievement history of one user
#[derive(Clone)]
pub struct AchievementsClient {
    http: Client,
    base: Url,
    authorization: String,
    xuid: String,
    language: String,
}

impl std::fmt::Debug for AchievementsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AchievementsClient")
            .field("base", &self.base.as_str())
            .field("xuid", &self.xuid)
            .finish_non_exhaustive()
    }
}

impl AchievementsClient {
    pub fn new(
        base: Url,
        authorization: impl Into<String>,
        xuid: impl Into<String>,
        language: impl Into<String>,
        config: &StreamConfig,
    ) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base,
            authorization: authorization.into(),
            xuid: xuid.into(),
            language: language.into(),
        })
    }

    /// Titles with achievements, most recent unlock first
    #[instrument(skip(self))]
    pub async fn get_history(&self) -> Result<Value> {
        let mut url = self
            .base
            .join(&format!("/users/xuid({})/history/titles", self.xuid))?;
        url.query_pairs_mut().append_pair("orderBy", "unlockTime");

        self.get_list(url, "titles").await
    }

    /// Every achievement of `title_id`
    #[instrument(skip(self))]
    pub async fn get_detail(&self, title_id: &str) -> Result<Value> {
        let mut url = self
            .base
            .join(&format!("/users/xuid({})/achievements", self.xuid))?;
        url.query_pairs_mut()
            .append_pair("titleId", title_id)
            .append_pair("maxItems", "1000");

        self.get_list(url, "achievements").await
    }

    /// `field` of the response body, `[]` when the service leaves it out
    async fn get_list(&self, url: Url, field: &str) -> Result<Value> {
        let response = XBOX_APP_HEADERS
            .iter()
            .fold(self.http.get(url.clone()), |builder, (name, value)| {
                builder.header(*name, *value)
            })
            .header("Authorization", &self.authorization)
            .header("Accept-Language", &self.language)
            .header("x-xbl-contract-version", "2")
            .send()
            .await?;

        let mut body = read_json(&url, response).await?;
        Ok(match body.get_mut(field) {
            Some(list) if list.is_array() => list.take(),
            _ => Value::Array(Vec::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn achievements(server: &MockServer) -> AchievementsClient {
        AchievementsClient::new(
            Url::parse(&server.uri()).unwrap(),
            "XBL3.0 x=1234567890;web-token",
            "2535400000000000",
            "nl-NL",
            &StreamConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_history_titles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/xuid(2535400000000000)/history/titles"))
            .and(query_param("orderBy", "unlockTime"))
            .and(header("Accept-Language", "nl-NL"))
            .and(header("x-xbl-contract-version", "2"))
            .and(header("Authorization", "XBL3.0 x=1234567890;web-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "titles": [{ "titleId": 219630713, "name": "Forza Horizon 5", "currentAchievements": 12 }],
                "pagingInfo": { "continuationToken": null, "totalRecords": 1 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let titles = achievements(&server).get_history().await.unwrap();
        assert_eq!(titles[0]["name"], "Forza Horizon 5");
    }

    #[tokio::test]
    async fn test_detail_without_achievements_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/xuid(2535400000000000)/achievements"))
            .and(query_param("titleId", "219630713"))
            .and(query_param("maxItems", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pagingInfo": { "continuationToken": null, "totalRecords": 0 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let detail = achievements(&server).get_detail("219630713").await.unwrap();
        assert_eq!(detail, json!([]));
    }
}
