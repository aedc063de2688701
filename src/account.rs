//! Account service client.
//!
//! Speaks the Molotov desktop API: password login for a bearer token, and
//! per-asset lookups returning the DRM token and stream location.
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::utils::body_excerpt;

/// Header carrying the client descriptor expected by the account service.
pub const CLIENT_AGENT_HEADER: &str = "X-Molotov-Agent";

/// Browser-like user agent of the desktop client.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_4) AppleWebKit/537.36 (KHTML, like Gecko) Molotov/4.2.1 Chrome/69.0.3497.128 Electron/4.1.5 Safari/537.36";

/// Client descriptor of the desktop client.
pub const DEFAULT_CLIENT_AGENT: &str = r#"{"app_id":"electron_app","app_build":3,"app_version_name":"4.2.1","type":"desktop","os_version":"macOs new version","electron_version":"4.1.5","os":"macOS","manufacturer":"Apple","serial":"7B819232-2DCB-5BD4-8D4F-A27CDB4F90FA","model":"MacBook Pro","hasTouchbar":false,"brand":"Apple","api_version":8,"features_supported":["social","download_to_go","new_button_conversion","paywall","channel_separator","download_to_go_lot_2","empty_view_v2"],"inner_app_version_name":"3.55.0","qa":false}"#;

const LOGIN_PATH: &str = "/v3.1/auth/login";

/// HTTP client bound to one account service.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct AccountClient {
    client: Client,
    base_url: String,
    client_agent: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    grant_type: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    auth: LoginAuth,
}

#[derive(Debug, Default, Deserialize)]
struct LoginAuth {
    #[serde(default)]
    access_token: String,
}

impl AccountClient {
    /// Build a client from the relay configuration.
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.account_url.trim_end_matches('/').to_string(),
            client_agent: config.client_agent.clone(),
        })
    }

    /// Build a client against `base_url` with default headers.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let config = RelayConfig {
            account_url: base_url.into(),
            ..RelayConfig::default()
        };
        Self::new(&config)
    }

    /// Base URL requests are issued against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange user credentials for a bearer token.
    ///
    /// Performs exactly one request. The caller validates the inputs.
    pub async fn login(&self, user: &str, pass: &str) -> Result<String> {
        let response = self
            .request(reqwest::Method::POST, LOGIN_PATH)
            .json(&LoginRequest {
                grant_type: "password",
                email: user,
                password: pass,
            })
            .send()
            .await
            .map_err(|e| Error::network("post login", e))?;

        let data: LoginResponse = read_json(response, "login").await?;
        if data.auth.access_token.is_empty() {
            return Err(Error::Protocol(
                "no access token received from login".to_string(),
            ));
        }
        Ok(data.auth.access_token)
    }

    /// Start a request to `path` with the account service headers set.
    pub(crate) fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(CLIENT_AGENT_HEADER, &self.client_agent)
    }
}

/// Read a response body, failing with [`Error::Protocol`] on non-2xx status.
pub(crate) async fn read_success_body(response: Response, what: &str) -> Result<Bytes> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::network(format!("read {} response", what), e))?;

    if !status.is_success() {
        return Err(Error::Protocol(format!(
            "bad http code for {}: {}: {}",
            what,
            status,
            body_excerpt(&body)
        )));
    }
    Ok(body)
}

/// Read a successful response body as JSON.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let body = read_success_body(response, what).await?;
    serde_json::from_slice(&body).map_err(|e| {
        Error::Protocol(format!(
            "json parse {} response: {}: {}",
            what,
            e,
            body_excerpt(&body)
        ))
    })
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::{AccountClient, CLIENT_AGENT_HEADER};
    use crate::error::Error;

    #[tokio::test]
    async fn login_posts_password_grant() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v3.1/auth/login")
            .match_header(CLIENT_AGENT_HEADER, Matcher::Any)
            .match_body(Matcher::Json(json!({
                "grant_type": "password",
                "email": "user@example.com",
                "password": "hunter2",
            })))
            .with_status(200)
            .with_body(r#"{"auth":{"access_token":"abc"}}"#)
            .create_async()
            .await;

        let client = AccountClient::with_base_url(server.url()).expect("client");
        let token = client
            .login("user@example.com", "hunter2")
            .await
            .expect("login");

        assert_eq!(token, "abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn login_non_success_is_protocol_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v3.1/auth/login")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = AccountClient::with_base_url(server.url()).expect("client");
        let err = client.login("a", "b").await.expect_err("should fail");
        match err {
            Error::Protocol(msg) => assert!(msg.contains("403")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn login_without_token_is_protocol_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v3.1/auth/login")
            .with_status(200)
            .with_body(r#"{"auth":{}}"#)
            .create_async()
            .await;

        let client = AccountClient::with_base_url(server.url()).expect("client");
        let err = client.login("a", "b").await.expect_err("should fail");
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_network_error() {
        let client = AccountClient::with_base_url("http://127.0.0.1:1").expect("client");
        let err = client.login("a", "b").await.expect_err("should fail");
        assert!(matches!(err, Error::Network { .. }));
    }
}
