use std::collections::HashMap;

use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};
use url::Url;

use crate::config::StreamConfig;
use crate::errors::Result;
use crate::http::read_json;

pub const CATALOG_HOST: &str = "https://catalog.gamepass.com";

/// Game Pass list of recently added cloud titles
const NEW_TITLES_SIGL: &str = "f13cf6b4-57e6-4459-89df-6aec18cf0538";
const PRODUCT_HYDRATION: &str = "RemoteLowJade0";

/// Game Pass catalog lookups
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: Client,
    base: Url,
    market: String,
    language: String,
}

impl CatalogClient {
    pub fn new(base: Url, market: impl Into<String>, language: impl Into<String>, config: &StreamConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }

        Ok(Self {
            http: builder.build()?,
            base,
            market: market.into(),
            language: language.into(),
        })
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    /// Product ids of the newest cloud titles
    #[instrument(skip(self), fields(market = %self.market))]
    pub async fn get_new_titles(&self) -> Result<Value> {
        let mut url = self.base.join("/sigls/v2")?;
        url.query_pairs_mut()
            .append_pair("id", NEW_TITLES_SIGL)
            .append_pair("market", &self.market)
            .append_pair("language", &self.language);

        let response = self.http.get(url.clone()).send().await?;
        read_json(&url, response).await
    }

    /// Hydrate titles from `/v2/titles` with their store products.
    ///
    /// Each product is merged with its title (title fields win) and the result
    /// is sorted by `ProductTitle`. Titles without a product id are skipped.
    #[instrument(skip(self, titles), fields(market = %self.market))]
    pub async fn get_game_pass_products(&self, titles: &Value) -> Result<Vec<Value>> {
        let Some(titles) = titles.as_array() else {
            return Ok(Vec::new());
        };

        let mut by_product: HashMap<String, &Map<String, Value>> = HashMap::new();
        let mut product_ids = Vec::new();
        for title in titles.iter().filter_map(Value::as_object) {
            let product_id = title
                .get("details")
                .and_then(|details| details.get("productId"))
                .and_then(Value::as_str);
            if let Some(product_id) = product_id {
                if by_product.insert(product_id.to_string(), title).is_none() {
                    product_ids.push(product_id.to_string());
                }
            }
        }

        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = product_ids.len(), "Looking up products");

        let mut url = self.base.join("/v3/products")?;
        url.query_pairs_mut()
            .append_pair("market", &self.market)
            .append_pair("language", &self.language)
            .append_pair("hydration", PRODUCT_HYDRATION);

        let response = self
            .http
            .post(url.clone())
            .header("ms-cv", "0")
            .header("calling-app-name", "Xbox Cloud Gaming Web")
            .header("calling-app-version", "24.17.63")
            .json(&json!({ "Products": product_ids }))
            .send()
            .await?;
        let body = read_json(&url, response).await?;

        let Some(products) = body.get("Products").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        let mut merged: Vec<Value> = products
            .iter()
            .map(|(product_id, product)| {
                let mut entry = Map::new();
                entry.insert("productId".to_string(), Value::String(product_id.clone()));
                if let Some(product) = product.as_object() {
                    entry.extend(product.clone());
                }
                if let Some(title) = by_product.get(product_id) {
                    entry.extend((*title).clone());
                }
                Value::Object(entry)
            })
            .collect();

        merged.sort_by(|a, b| product_title(a).cmp(product_title(b)));
        Ok(merged)
    }
}

fn product_title(entry: &Value) -> &str {
    entry.get("ProductTitle").and_then(Value::as_str).unwrap_or_default()
}
