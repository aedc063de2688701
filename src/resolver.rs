//! Per-asset DRM token and stream URL lookup.
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::account::{read_json, AccountClient};
use crate::error::{Error, Result};

const ASSETS_PATH: &str = "/v2/me/assets";

/// Positive numeric asset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetId(NonZeroU64);

impl AssetId {
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl FromStr for AssetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidAssetId(s.to_string()));
        }
        s.parse::<u64>()
            .ok()
            .and_then(AssetId::new)
            .ok_or_else(|| Error::InvalidAssetId(s.to_string()))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// DRM token and stream location of one asset.
///
/// Both fields are non-empty; anything less is an [`Error::IncompleteAsset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub drm_token: String,
    pub stream_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct AssetResponse {
    #[serde(default)]
    drm: DrmInfo,
    #[serde(default)]
    stream: StreamInfo,
}

#[derive(Debug, Default, Deserialize)]
struct DrmInfo {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Default, Deserialize)]
struct StreamInfo {
    #[serde(default)]
    url: String,
}

/// Resolves assets through the account service. Holds no per-call state.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    client: AccountClient,
}

impl AssetResolver {
    pub fn new(client: AccountClient) -> Self {
        Self { client }
    }

    /// Look up `asset_id` with the bearer `token`.
    ///
    /// Every call hits the account service; nothing is cached.
    pub async fn resolve(&self, asset_id: AssetId, token: &str) -> Result<AssetRecord> {
        if token.is_empty() {
            return Err(Error::Auth("no account access token available".to_string()));
        }

        let id = asset_id.to_string();
        let response = self
            .client
            .request(reqwest::Method::GET, ASSETS_PATH)
            .query(&[
                ("cwatch", "true"),
                ("id", id.as_str()),
                ("trkCp", "season"),
                ("trkCs", "vod"),
                ("trkOp", "home"),
                ("trkOs", "on-tv-77"),
                ("type", "vod"),
                ("access_token", token),
            ])
            .send()
            .await
            .map_err(|e| Error::network(format!("get asset {}", asset_id), e))?;

        let asset: AssetResponse = read_json(response, "asset").await?;

        let missing = match (asset.drm.token.is_empty(), asset.stream.url.is_empty()) {
            (false, false) => None,
            (true, false) => Some("no drm token received"),
            (false, true) => Some("no stream url received"),
            (true, true) => Some("no drm token or stream url received"),
        };
        if let Some(reason) = missing {
            return Err(Error::IncompleteAsset {
                asset_id: asset_id.get(),
                reason: reason.to_string(),
            });
        }

        debug!("Resolved asset {} to {}", asset_id, asset.stream.url);
        Ok(AssetRecord {
            drm_token: asset.drm.token,
            stream_url: asset.stream.url,
        })
    }
}
