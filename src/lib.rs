//! drm-relay - DRM license and manifest relay.
//!
//! This crate provides:
//! - A shared, periodically renewed account token ([`credentials`]).
//! - Per-asset DRM token and stream lookup ([`resolver`]).
//! - License challenge forwarding ([`license`]).
//! - DASH manifest parsing and rewriting ([`manifest`], [`rewrite`]).
//! - The relay service tying them together, and an HTTP API for it.
//!
//! Feature flags:
//! - `serve`: enable the HTTP API (default).
//! - `cli`: enable the CLI binary.
#![allow(clippy::result_large_err)]

/// Account service client.
pub mod account;
/// Relay configuration.
pub mod config;
/// Credential store and renewal.
pub mod credentials;
/// Common error types and Result alias.
pub mod error;
/// License relay.
pub mod license;
/// DASH manifest model.
pub mod manifest;
/// License and manifest relay service.
pub mod relay;
/// Asset resolution.
pub mod resolver;
/// Manifest rewriting.
pub mod rewrite;
/// Shared helper utilities.
pub mod utils;

/// HTTP serve API (feature: `serve`).
#[cfg(feature = "serve")]
pub mod serve;

pub use error::{Error, ErrorClass, Result};
