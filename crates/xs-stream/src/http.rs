use reqwest::Response;
use serde_json::Value;
use url::Url;

use crate::errors::{Result, StreamError};

/// Client identification expected by the Xbox Live web services
pub(crate) const XBOX_APP_HEADERS: [(&str, &str); 3] = [
    ("x-xbl-client-name", "XboxApp"),
    ("x-xbl-client-type", "UWA"),
    ("x-xbl-client-version", "39.39.22001.0"),
];

/// JSON body of a successful response, [`StreamError::Http`] otherwise
pub(crate) async fn read_json(url: &Url, response: Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(StreamError::Http {
            url: url.to_string(),
            status,
            body,
        });
    }
    Ok(serde_json::from_str(&body)?)
}
