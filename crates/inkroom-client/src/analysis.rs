//! Image analysis client for captured regions.
//!
//! Thin HTTP wrapper around the analysis service. Reply parsing is kept in
//! [`parse_reply`] so it can be tested without a server.

use inkroom_render::CapturedImage;
use kurbo::Rect;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Instruction sent with every capture.
pub const ANALYSIS_PROMPT: &str = "Analyze the selected region of the whiteboard and answer concisely.";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClientBuild(String),
    #[error("Analysis request failed: {0}")]
    Request(String),
    #[error("Analysis request timed out")]
    Timeout,
    #[error("Analysis service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("Malformed analysis reply: {0}")]
    Decode(String),
}

#[derive(Serialize)]
struct AnalysisRequest<'a> {
    #[serde(rename = "imageData")]
    image_data: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct AnalysisReply {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Text returned for a captured region, shown next to it on the local board.
///
/// Annotations are never added to the shape list or sent to peers.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Region the text describes.
    pub region: Rect,
    pub text: String,
}

impl Annotation {
    pub fn new(region: Rect, text: impl Into<String>) -> Self {
        Self {
            region,
            text: text.into(),
        }
    }
}

pub struct AnalysisClient {
    http: reqwest::Client,
    url: Url,
}

impl AnalysisClient {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, AnalysisError> {
        let builder = reqwest::Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(timeout);
        #[cfg(target_arch = "wasm32")]
        let _ = timeout;
        let http = builder
            .build()
            .map_err(|e| AnalysisError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, url })
    }

    /// Send a capture for analysis and return the reply text.
    pub async fn analyze(&self, image: &CapturedImage) -> Result<String, AnalysisError> {
        let data_url = image.to_data_url();
        let body = AnalysisRequest {
            image_data: &data_url,
            prompt: ANALYSIS_PROMPT,
        };
        log::info!("Sending {}x{} capture for analysis", image.width, image.height);

        let response = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(request_error)?;
        parse_reply(status, &text)
    }
}

fn request_error(e: reqwest::Error) -> AnalysisError {
    if e.is_timeout() {
        AnalysisError::Timeout
    } else {
        AnalysisError::Request(e.to_string())
    }
}

/// Interpret a `{"response": ...}` or `{"error": ...}` reply.
pub fn parse_reply(status: u16, body: &str) -> Result<String, AnalysisError> {
    let reply: AnalysisReply = match serde_json::from_str(body) {
        Ok(reply) => reply,
        Err(e) if (200..300).contains(&status) => return Err(AnalysisError::Decode(e.to_string())),
        Err(_) => {
            return Err(AnalysisError::Service {
                status,
                message: body.to_string(),
            });
        }
    };

    match (reply.response, reply.error) {
        (_, Some(message)) => Err(AnalysisError::Service { status, message }),
        (Some(text), None) if (200..300).contains(&status) => Ok(text),
        (_, None) => Err(AnalysisError::Decode(format!(
            "reply with status {} has no response text",
            status
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let body = AnalysisRequest {
            image_data: "data:image/png;base64,AAAA",
            prompt: ANALYSIS_PROMPT,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["imageData"], "data:image/png;base64,AAAA");
        assert_eq!(json["prompt"], ANALYSIS_PROMPT);
    }

    #[test]
    fn test_parse_success() {
        assert_eq!(parse_reply(200, r#"{"response":"x = 4"}"#).unwrap(), "x = 4");
    }

    #[test]
    fn test_parse_service_error() {
        let err = parse_reply(500, r#"{"error":"model unavailable"}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::Service { status: 500, ref message } if message == "model unavailable"));

        let err = parse_reply(400, r#"{"error":"No imageData provided"}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::Service { status: 400, .. }));
    }

    #[test]
    fn test_parse_non_json_failure() {
        let err = parse_reply(502, "Bad Gateway").unwrap_err();
        assert!(matches!(err, AnalysisError::Service { status: 502, .. }));
    }

    #[test]
    fn test_parse_missing_text() {
        assert!(matches!(parse_reply(200, "{}"), Err(AnalysisError::Decode(_))));
        assert!(matches!(parse_reply(200, "not json"), Err(AnalysisError::Decode(_))));
    }

    #[test]
    fn test_client_builds_with_timeout() {
        let url = Url::parse("http://127.0.0.1:5000/process-image").unwrap();
        assert!(AnalysisClient::new(url, Duration::from_secs(30)).is_ok());
    }
}
