//! Relay service: license and manifest requests for one asset.
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, info};

use crate::account::AccountClient;
use crate::config::RelayConfig;
use crate::credentials::{CredentialState, CredentialStore};
use crate::error::{Error, Result};
use crate::license::{DrmTodayRelay, LicenseRelay};
use crate::manifest::Manifest;
use crate::resolver::{AssetId, AssetRecord, AssetResolver};
use crate::rewrite::ManifestRewriter;
use crate::utils::body_excerpt;

/// Downloads raw manifests.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, stream_url: &str) -> Result<Bytes>;
}

/// Plain HTTP GET against the CDN.
#[derive(Debug, Clone, Default)]
pub struct HttpManifestFetcher {
    client: Client,
}

impl HttpManifestFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, stream_url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(stream_url)
            .send()
            .await
            .map_err(|e| Error::ManifestFetch(format!("get {}: {}", stream_url, e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::ManifestFetch(format!("read {}: {}", stream_url, e)))?;
        if !status.is_success() {
            return Err(Error::ManifestFetch(format!(
                "bad http code for {}: {}: {}",
                stream_url,
                status,
                body_excerpt(&body)
            )));
        }
        Ok(body)
    }
}

/// Answers license and manifest requests.
///
/// Cloning is cheap; all clones share the credential store.
#[derive(Clone)]
pub struct RelayService {
    credentials: CredentialStore,
    resolver: AssetResolver,
    license: Arc<dyn LicenseRelay>,
    fetcher: Arc<dyn ManifestFetcher>,
    rewriter: ManifestRewriter,
}

impl std::fmt::Debug for RelayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayService")
            .field("credentials", &self.credentials)
            .field("rewriter", &self.rewriter)
            .finish_non_exhaustive()
    }
}

impl RelayService {
    pub fn new(
        credentials: CredentialStore,
        resolver: AssetResolver,
        license: Arc<dyn LicenseRelay>,
        fetcher: Arc<dyn ManifestFetcher>,
        rewriter: ManifestRewriter,
    ) -> Self {
        Self {
            credentials,
            resolver,
            license,
            fetcher,
            rewriter,
        }
    }

    /// Wire the HTTP collaborators described by `config` around `credentials`.
    pub fn from_config(
        config: &RelayConfig,
        account: AccountClient,
        credentials: CredentialStore,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::new(
            credentials,
            AssetResolver::new(account),
            Arc::new(DrmTodayRelay::with_client(
                client.clone(),
                config.license_url.clone(),
            )),
            Arc::new(HttpManifestFetcher::new(client)),
            ManifestRewriter::new(config.excluded_content_types.clone()),
        ))
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Resolve `asset_id` with the token current at this instant.
    pub async fn resolve(&self, asset_id: AssetId) -> Result<AssetRecord> {
        let snapshot = self.credentials.snapshot();
        if snapshot.state == CredentialState::Terminated {
            return Err(Error::Terminated);
        }
        self.resolver
            .resolve(asset_id, &snapshot.credential.access_token)
            .await
    }

    /// Forward a license challenge for `asset_id` and return the license.
    pub async fn get_license(&self, asset_id: AssetId, challenge: Bytes) -> Result<Bytes> {
        let asset = self.resolve(asset_id).await?;
        let license = self.license.relay(&asset.drm_token, challenge).await?;
        info!("Relayed license for asset {} ({} bytes)", asset_id, license.len());
        Ok(license)
    }

    /// Fetch the manifest of `asset_id` and rewrite it for the player.
    pub async fn get_manifest(&self, asset_id: AssetId) -> Result<Vec<u8>> {
        let asset = self.resolve(asset_id).await?;
        let raw = self.fetcher.fetch(&asset.stream_url).await?;
        debug!("Fetched {} byte manifest for asset {}", raw.len(), asset_id);

        let mut manifest = Manifest::parse(&raw)?;
        self.rewriter.rewrite(&mut manifest, &asset.stream_url)?;
        let bytes = manifest.to_bytes()?;
        info!("Served manifest for asset {}", asset_id);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;
    use mockito::{Matcher, Mock, Server};
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::{HttpManifestFetcher, ManifestFetcher, RelayService};
    use crate::account::AccountClient;
    use crate::credentials::{Account, CredentialStore};
    use crate::error::{Error, Result};
    use crate::license::LicenseRelay;
    use crate::resolver::{AssetId, AssetResolver};
    use crate::rewrite::ManifestRewriter;

    #[derive(Default)]
    struct RecordingRelay {
        calls: Mutex<Vec<(String, Bytes)>>,
    }

    #[async_trait]
    impl LicenseRelay for RecordingRelay {
        async fn relay(&self, drm_token: &str, challenge: Bytes) -> Result<Bytes> {
            self.calls
                .lock()
                .expect("lock")
                .push((drm_token.to_string(), challenge));
            Ok(Bytes::from_static(b"license"))
        }
    }

    struct StaticFetcher(&'static str);

    #[async_trait]
    impl ManifestFetcher for StaticFetcher {
        async fn fetch(&self, _stream_url: &str) -> Result<Bytes> {
            Ok(Bytes::from_static(self.0.as_bytes()))
        }
    }

    async fn logged_in_service(
        server: &mut Server,
        stream_url: &str,
        license: Arc<RecordingRelay>,
        fetcher: Arc<dyn ManifestFetcher>,
    ) -> (RelayService, Vec<Mock>) {
        let login = server
            .mock("POST", "/v3.1/auth/login")
            .with_status(200)
            .with_body(r#"{"auth":{"access_token":"bearer"}}"#)
            .create_async()
            .await;
        let asset = server
            .mock("GET", "/v2/me/assets")
            .match_query(Matcher::UrlEncoded("id".into(), "5".into()))
            .with_status(200)
            .with_body(
                json!({"drm": {"token": "drm-5"}, "stream": {"url": stream_url}}).to_string(),
            )
            .create_async()
            .await;

        let account = AccountClient::with_base_url(server.url()).expect("client");
        let store = CredentialStore::new(account.clone(), Account::new("user", "pass"));
        store.login_account().await.expect("login");
        let service = RelayService::new(
            store,
            AssetResolver::new(account),
            license,
            fetcher,
            ManifestRewriter::default(),
        );
        (service, vec![login, asset])
    }

    fn id(value: u64) -> AssetId {
        AssetId::new(value).expect("positive id")
    }

    #[tokio::test]
    async fn license_uses_resolved_drm_token() {
        let mut server = Server::new_async().await;
        let relay = Arc::new(RecordingRelay::default());
        let (service, _mocks) = logged_in_service(
            &mut server,
            "https://cdn.example.com/v/stream.mpd",
            relay.clone(),
            Arc::new(StaticFetcher("")),
        )
        .await;

        let license = service
            .get_license(id(5), Bytes::from_static(b"challenge"))
            .await
            .expect("license");
        assert_eq!(license.as_ref(), b"license");

        let calls = relay.calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "drm-5");
        assert_eq!(calls[0].1.as_ref(), b"challenge");
    }

    #[tokio::test]
    async fn unauthenticated_store_fails_before_relay() {
        let server = Server::new_async().await;
        let account = AccountClient::with_base_url(server.url()).expect("client");
        let relay = Arc::new(RecordingRelay::default());
        let service = RelayService::new(
            CredentialStore::new(account.clone(), Account::new("user", "pass")),
            AssetResolver::new(account),
            relay.clone(),
            Arc::new(StaticFetcher("")),
            ManifestRewriter::default(),
        );

        let err = service
            .get_license(id(5), Bytes::new())
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::Auth(_)));
        assert!(relay.calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn terminated_store_stops_serving() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/v3.1/auth/login")
            .with_status(200)
            .with_body(r#"{"auth":{"access_token":"bearer"}}"#)
            .create_async()
            .await;
        let assets = server
            .mock("GET", "/v2/me/assets")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let account = AccountClient::with_base_url(server.url()).expect("client");
        let store = CredentialStore::new(account.clone(), Account::new("user", "pass"));
        store.login_account().await.expect("login");
        login.remove_async().await;
        let _expired = server
            .mock("POST", "/v3.1/auth/login")
            .with_status(401)
            .create_async()
            .await;

        let (tick, clock) = mpsc::channel(1);
        let renewal = store.start_renewal(clock);
        tick.send(()).await.expect("tick");
        renewal.wait().await.expect_err("renewal should fail");

        let relay = Arc::new(RecordingRelay::default());
        let service = RelayService::new(
            store,
            AssetResolver::new(account),
            relay.clone(),
            Arc::new(StaticFetcher("<MPD/>")),
            ManifestRewriter::default(),
        );

        let err = service
            .get_license(id(5), Bytes::from_static(b"challenge"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::Terminated));
        assert_eq!(err.status_code().as_u16(), 503);

        let err = service.get_manifest(id(5)).await.expect_err("should fail");
        assert!(matches!(err, Error::Terminated));

        assert!(relay.calls.lock().expect("lock").is_empty());
        assets.assert_async().await;
    }

    #[tokio::test]
    async fn unparsable_manifest_is_parse_error() {
        let mut server = Server::new_async().await;
        let (service, _mocks) = logged_in_service(
            &mut server,
            "https://cdn.example.com/v/stream.mpd",
            Arc::new(RecordingRelay::default()),
            Arc::new(StaticFetcher("{\"not\": \"xml\"}")),
        )
        .await;

        let err = service.get_manifest(id(5)).await.expect_err("should fail");
        assert!(matches!(err, Error::ManifestParse(_)));
    }

    #[tokio::test]
    async fn invalid_stream_url_is_reported() {
        let mut server = Server::new_async().await;
        let (service, _mocks) = logged_in_service(
            &mut server,
            "stream.mpd",
            Arc::new(RecordingRelay::default()),
            Arc::new(StaticFetcher("<MPD><Period/></MPD>")),
        )
        .await;

        let err = service.get_manifest(id(5)).await.expect_err("should fail");
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn http_fetcher_reports_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/p1/stream.mpd")
            .with_status(404)
            .create_async()
            .await;

        let err = HttpManifestFetcher::default()
            .fetch(&format!("{}/p1/stream.mpd", server.url()))
            .await
            .expect_err("should fail");
        match err {
            Error::ManifestFetch(msg) => assert!(msg.contains("404")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
