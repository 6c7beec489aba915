//! Client configuration.

use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080/ws";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_ANALYSIS_URL: &str = "http://127.0.0.1:5000/process-image";
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_VIEWPORT: (u32, u32) = (1280, 720);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
    #[error("{var} must use one of {expected}, got {scheme}")]
    InvalidScheme {
        var: &'static str,
        expected: String,
        scheme: String,
    },
    #[error("Invalid viewport {0:?}; expected WIDTHxHEIGHT")]
    InvalidViewport(String),
}

/// Endpoints and limits used by a client session.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Relay WebSocket endpoint, without the token query.
    pub relay_url: Url,
    /// Base URL of the history service.
    pub api_url: Url,
    /// Image analysis endpoint.
    pub analysis_url: Url,
    pub analysis_timeout: Duration,
    /// Initial surface size in pixels.
    pub viewport: (u32, u32),
}

impl ClientConfig {
    /// Build from environment variables.
    ///
    /// Optional:
    /// - `INKROOM_RELAY_URL`: default `ws://127.0.0.1:8080/ws`
    /// - `INKROOM_API_URL`: default `http://127.0.0.1:8080`
    /// - `INKROOM_ANALYSIS_URL`: default `http://127.0.0.1:5000/process-image`
    /// - `INKROOM_ANALYSIS_TIMEOUT_SECS`: default 30
    /// - `INKROOM_VIEWPORT`: `WIDTHxHEIGHT`, default `1280x720`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let relay_url = parse_url(&lookup, "INKROOM_RELAY_URL", DEFAULT_RELAY_URL, &["ws", "wss"])?;
        let api_url = parse_url(&lookup, "INKROOM_API_URL", DEFAULT_API_URL, &["http", "https"])?;
        let analysis_url = parse_url(&lookup, "INKROOM_ANALYSIS_URL", DEFAULT_ANALYSIS_URL, &["http", "https"])?;
        let timeout_secs = lookup("INKROOM_ANALYSIS_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_ANALYSIS_TIMEOUT_SECS);
        let viewport = match lookup("INKROOM_VIEWPORT") {
            Some(raw) => parse_viewport(&raw)?,
            None => DEFAULT_VIEWPORT,
        };

        Ok(Self {
            relay_url,
            api_url,
            analysis_url,
            analysis_timeout: Duration::from_secs(timeout_secs),
            viewport,
        })
    }

    /// Relay URL carrying the bearer token as a `token` query parameter.
    pub fn relay_endpoint(&self, token: &str) -> Url {
        let mut url = self.relay_url.clone();
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_viewport(raw: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::InvalidViewport(raw.to_string());
    let (w, h) = raw.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
    let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

fn parse_url(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: &str,
    schemes: &'static [&'static str],
) -> Result<Url, ConfigError> {
    let raw = lookup(var).unwrap_or_else(|| default.to_string());
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
        var,
        reason: e.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidScheme {
            var,
            expected: schemes.join("/"),
            scheme: url.scheme().to_string(),
        });
    }
    Ok(url)
}
