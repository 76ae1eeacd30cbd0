use std::time::Duration;

use url::Url;

use crate::achievements::ACHIEVEMENTS_HOST;
use crate::catalog::CATALOG_HOST;
use crate::errors::Result;
use crate::xccs::XCCS_HOST;

/// Polling and HTTP behaviour of [`crate::StreamClient`]
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Delay before repeating a GET answered with 204
    pub retry_delay: Duration,
    /// Delay between ICE polls while the remote candidates are not ready
    pub ice_poll_interval: Duration,
    /// Upper bound for any polling loop
    pub deadline: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(750),
            ice_poll_interval: Duration::from_millis(1000),
            deadline: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            user_agent: Some("xstream".to_string()),
        }
    }
}

/// Base URLs of the Xbox services used next to the gssv hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHosts {
    pub catalog: Url,
    pub xccs: Url,
    pub achievements: Url,
}

impl ServiceHosts {
    pub fn production() -> Result<Self> {
        Ok(Self {
            catalog: Url::parse(CATALOG_HOST)?,
            xccs: Url::parse(XCCS_HOST)?,
            achievements: Url::parse(ACHIEVEMENTS_HOST)?,
        })
    }

    /// Every service on one host, for local testing
    pub fn with_base(base: &Url) -> Self {
        Self {
            catalog: base.clone(),
            xccs: base.clone(),
            achievements: base.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_hosts() {
        let hosts = ServiceHosts::production().unwrap();
        assert_eq!(hosts.xccs.host_str(), Some("xccs.xboxlive.com"));
        assert_eq!(hosts.achievements.host_str(), Some("achievements.xboxlive.com"));
        assert_eq!(hosts.catalog.host_str(), Some("catalog.gamepass.com"));
    }
}
