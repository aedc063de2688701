//! DRM license relay.
//!
//! The client's license challenge is forwarded as-is, authenticated with the
//! asset's DRM token.
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::account::read_json;
use crate::error::{Error, Result};

/// Header DRMtoday reads the per-asset token from.
pub const DRM_TOKEN_HEADER: &str = "x-dt-auth-token";

/// Forwards license challenges to a license server.
#[async_trait]
pub trait LicenseRelay: Send + Sync {
    /// Send `challenge` upstream with `drm_token` and return the license.
    async fn relay(&self, drm_token: &str, challenge: Bytes) -> Result<Bytes>;
}

/// DRMtoday Widevine license proxy.
///
/// Answers with `{"license": "<base64>"}`; the decoded bytes are returned.
#[derive(Debug, Clone)]
pub struct DrmTodayRelay {
    client: Client,
    license_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct LicenseResponse {
    #[serde(default)]
    license: String,
}

impl DrmTodayRelay {
    pub fn new(license_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, license_url))
    }

    pub fn with_client(client: Client, license_url: impl Into<String>) -> Self {
        Self {
            client,
            license_url: license_url.into(),
        }
    }
}

#[async_trait]
impl LicenseRelay for DrmTodayRelay {
    async fn relay(&self, drm_token: &str, challenge: Bytes) -> Result<Bytes> {
        if drm_token.is_empty() {
            return Err(Error::Auth("no drm token available".to_string()));
        }

        debug!("Relaying {} byte license challenge", challenge.len());
        let response = self
            .client
            .post(&self.license_url)
            .header(DRM_TOKEN_HEADER, drm_token)
            .body(challenge)
            .send()
            .await
            .map_err(|e| Error::network("post drm payload", e))?;

        let data: LicenseResponse = read_json(response, "license").await?;
        if data.license.is_empty() {
            return Err(Error::Protocol("no license payload received".to_string()));
        }

        let license = base64::engine::general_purpose::STANDARD
            .decode(data.license.as_bytes())
            .map_err(|e| Error::Protocol(format!("base64 decode license: {}", e)))?;
        Ok(Bytes::from(license))
    }
}
