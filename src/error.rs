//! Error types for drm-relay.

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for relay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials or bearer token are missing or were rejected.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The upstream service could not be reached.
    #[error("Network error: {context}: {source}")]
    Network {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The upstream answered with a non-success status or an unparsable body.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The asset lookup succeeded but the DRM token or stream URL is missing.
    #[error("Incomplete asset {asset_id}: {reason}")]
    IncompleteAsset { asset_id: u64, reason: String },

    /// A stream URL is not an absolute http(s) URL.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The caller passed an asset identifier that is not a positive integer.
    #[error("Invalid asset id '{0}'")]
    InvalidAssetId(String),

    /// The manifest could not be downloaded from the CDN.
    #[error("Manifest fetch error: {0}")]
    ManifestFetch(String),

    /// The manifest is not a well-formed MPD document.
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    /// Credential renewal failed; the store no longer serves tokens.
    #[error("Credential renewal failed, relay is terminating")]
    Terminated,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

/// Who is to blame for an [`Error`], used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller sent something unusable.
    Client,
    /// An upstream service (account, license, CDN) failed.
    Upstream,
    /// The relay itself is unable to serve.
    Internal,
}

impl Error {
    pub(crate) fn network(context: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Network {
            context: context.into(),
            source,
        }
    }

    /// Classify the error for the HTTP boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Auth(_) | Error::InvalidAssetId(_) => ErrorClass::Client,
            Error::Network { .. }
            | Error::Protocol(_)
            | Error::IncompleteAsset { .. }
            | Error::InvalidUrl { .. }
            | Error::ManifestFetch(_)
            | Error::ManifestParse(_) => ErrorClass::Upstream,
            Error::Terminated | Error::Io(_) | Error::Other(_) => ErrorClass::Internal,
        }
    }

    /// HTTP status code matching [`Error::class`].
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::InvalidAssetId(_) => StatusCode::BAD_REQUEST,
            Error::Terminated => StatusCode::SERVICE_UNAVAILABLE,
            _ => match self.class() {
                ErrorClass::Upstream => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;
