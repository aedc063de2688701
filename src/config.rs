//! Relay configuration loaded from YAML.
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Account service used by the original Molotov desktop client.
pub const DEFAULT_ACCOUNT_URL: &str = "https://fapi.molotov.tv";
/// DRMtoday Widevine license proxy.
pub const DEFAULT_LICENSE_URL: &str = "https://lic.drmtoday.com/license-proxy-widevine/cenc/";

/// Relay configuration.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the account service (login and asset endpoints).
    pub account_url: String,
    /// License server the DRM challenge is forwarded to.
    pub license_url: String,
    /// Seconds between two credential renewals.
    pub renew_interval_secs: u64,
    /// Adaptation set content types removed from served manifests.
    pub excluded_content_types: Vec<String>,
    /// `User-Agent` sent upstream.
    pub user_agent: String,
    /// `X-Molotov-Agent` descriptor sent to the account service.
    pub client_agent: String,
    /// Address the HTTP API binds to.
    pub host: String,
    /// Port the HTTP API binds to.
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            account_url: DEFAULT_ACCOUNT_URL.to_string(),
            license_url: DEFAULT_LICENSE_URL.to_string(),
            renew_interval_secs: 3600,
            excluded_content_types: vec!["text".to_string()],
            user_agent: crate::account::DEFAULT_USER_AGENT.to_string(),
            client_agent: crate::account::DEFAULT_CLIENT_AGENT.to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl RelayConfig {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Other(format!("Invalid config: {}", e)))
    }

    /// Read and parse a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Renewal period as a [`Duration`].
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs.max(1))
    }
}
