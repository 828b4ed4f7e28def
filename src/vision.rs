//! Vision model client for semantic design/implementation comparison.
//!
//! Sends the design mockup and the implementation screenshot in a single
//! Messages API request together with a fixed rubric, and parses the reply
//! into a [`VisionResult`].
//!
//! The client is best-effort: [`compare_with_vision`] never returns an error.
//! Transport, auth and API failures, as well as replies that do not match
//! the expected schema, come back as a failing sentinel verdict with
//! `confidence = 0`.
//!
//! # Configuration
//!
//! Settings come from [`crate::config`]:
//! - `DESIGN_CONVERGE_VISION_ENDPOINT`: API endpoint URL
//! - `DESIGN_CONVERGE_VISION_MODEL`: Model name
//! - `DESIGN_CONVERGE_VISION_MAX_TOKENS`: Max tokens in response
//! - `DESIGN_CONVERGE_VISION_CONNECT_TIMEOUT`: Connection timeout (seconds)
//! - `ANTHROPIC_API_KEY`: Credential

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config;

/// Result type for vision transport operations
pub type VisionOpResult<T> = Result<T, VisionError>;

/// Errors that can occur while talking to the vision API
///
/// These never escape [`compare_with_vision`]; they are folded into the
/// summary of a failing [`VisionResult`].
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("no API key configured (set {})", config::ENV_API_KEY)]
    MissingApiKey,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Configuration for the vision client
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name to use
    pub model: String,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Timeout for initial connection (seconds)
    pub connection_timeout: u64,
    /// API credential
    pub api_key: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.vision.endpoint.clone(),
            model: cfg.vision.model.clone(),
            max_tokens: cfg.vision.max_tokens,
            connection_timeout: cfg.vision.connect_timeout,
            api_key: cfg.vision.api_key.clone(),
        }
    }
}

impl VisionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

/// Area of the UI an issue belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Layout,
    Spacing,
    Typography,
    Color,
    States,
    Other,
}

/// How much an issue matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

/// A single difference reported by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionIssue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Verdict of a vision comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionResult {
    pub pass: bool,
    pub confidence: f64,
    pub issues: Vec<VisionIssue>,
    pub summary: String,
}

impl VisionResult {
    /// Sentinel for a reply that did not match the schema
    pub fn parse_failure(detail: &str) -> Self {
        Self {
            pass: false,
            confidence: 0.0,
            issues: Vec::new(),
            summary: format!("Failed to parse vision response: {}", detail),
        }
    }

    /// Sentinel for a request that never produced a reply
    pub fn error(err: &VisionError) -> Self {
        Self {
            pass: false,
            confidence: 0.0,
            issues: Vec::new(),
            summary: format!("Vision comparison failed: {}", err),
        }
    }

    /// Whether any issue is major or critical
    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(|issue| issue.severity >= Severity::Major)
    }
}

/// Check if a vision endpoint is reachable (connection-only check).
///
/// Any HTTP response, including 4xx/5xx, counts as reachable.
pub async fn check_health(endpoint: &str, timeout_secs: u64) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    client.head(endpoint).send().await.is_ok()
}

/// Build the rubric sent alongside the two images
pub fn build_rubric_prompt() -> String {
    r#"The first image is the design mockup. The second image is the implementation rendered from the component catalog.

Compare the implementation against the design across these dimensions:
- layout: structure, alignment, element order and sizing
- spacing: margins, padding and gaps
- typography: font family, size, weight, line height
- color: backgrounds, text, borders, shadows
- states: hover, focus, disabled and other interactive states visible in the design

Grade each difference as "minor", "major" or "critical". The implementation passes when there are no major or critical issues; minor issues alone may still pass.

Respond with ONLY a JSON object, no prose and no code fences, in exactly this shape:
{"pass": boolean, "confidence": number between 0 and 1, "issues": [{"category": "layout" | "spacing" | "typography" | "color" | "states" | "other", "severity": "minor" | "major" | "critical", "description": string, "region": string (optional)}], "summary": string}"#
        .to_string()
}

/// Compare a design and an implementation screenshot with the vision model.
///
/// Always returns a well-formed verdict.
#[tracing::instrument(skip_all, fields(model = %config.model))]
pub async fn compare_with_vision(
    design_path: &Path,
    implementation_path: &Path,
    config: &VisionConfig,
) -> VisionResult {
    match request_verdict(design_path, implementation_path, config).await {
        Ok(text) => {
            let result = parse_verdict(&text);
            info!(pass = result.pass, issues = result.issues.len(), "vision verdict");
            result
        }
        Err(e) => {
            warn!("vision comparison failed: {}", e);
            VisionResult::error(&e)
        }
    }
}

async fn read_base64(path: &Path) -> VisionOpResult<String> {
    let bytes = tokio::fs::read(path).await.map_err(|source| VisionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn image_block(data: String) -> serde_json::Value {
    serde_json::json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": "image/png",
            "data": data
        }
    })
}

async fn request_verdict(
    design_path: &Path,
    implementation_path: &Path,
    config: &VisionConfig,
) -> VisionOpResult<String> {
    let api_key = config.api_key.as_deref().ok_or(VisionError::MissingApiKey)?;

    let design = read_base64(design_path).await?;
    let implementation = read_base64(implementation_path).await?;

    let request = serde_json::json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": "Design mockup:" },
                image_block(design),
                { "type": "text", "text": "Implementation:" },
                image_block(implementation),
                { "type": "text", "text": build_rubric_prompt() }
            ]
        }]
    });

    // No total timeout: large images can take a while to review.
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connection_timeout))
        .build()?;

    debug!(endpoint = %config.endpoint, "sending vision request");
    let response = client
        .post(&config.endpoint)
        .header("x-api-key", api_key)
        .header("anthropic-version", config::VISION_API_VERSION)
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(VisionError::Status {
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        });
    }

    let body: serde_json::Value = response.json().await?;
    first_text_block(&body)
        .map(str::to_string)
        .ok_or_else(|| VisionError::InvalidResponse("no text block in response".to_string()))
}

fn first_text_block(body: &serde_json::Value) -> Option<&str> {
    body["content"]
        .as_array()?
        .iter()
        .find(|block| block["type"] == "text")
        .and_then(|block| block["text"].as_str())
}

/// Parse the model's text reply into a verdict.
///
/// The text must be a JSON object matching [`VisionResult`]; unknown
/// categories or severities, missing fields and a confidence outside 0..=1
/// all yield the parse-failure sentinel. A `pass` that contradicts a major
/// or critical issue is downgraded to a failure.
pub fn parse_verdict(text: &str) -> VisionResult {
    let mut result: VisionResult = match serde_json::from_str(text.trim()) {
        Ok(result) => result,
        Err(e) => return VisionResult::parse_failure(&e.to_string()),
    };

    if !(0.0..=1.0).contains(&result.confidence) {
        return VisionResult::parse_failure(&format!(
            "confidence {} outside 0..=1",
            result.confidence
        ));
    }

    if result.pass && result.has_blocking_issues() {
        debug!("model passed a verdict with blocking issues, downgrading");
        result.pass = false;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;

    fn write_images(dir: &Path) -> (PathBuf, PathBuf) {
        let design = dir.join("design.png");
        let implementation = dir.join("storybook.png");
        image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]))
            .save(&design)
            .unwrap();
        image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 255, 255]))
            .save(&implementation)
            .unwrap();
        (design, implementation)
    }

    fn text_reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "msg_1",
            "type": "message",
            "content": [{ "type": "text", "text": text }]
        })
    }

    fn test_config(server: &MockServer) -> VisionConfig {
        VisionConfig::new(server.url("/v1/messages"))
            .model("test-model")
            .api_key(Some("test-key".to_string()))
    }

    #[test]
    fn test_parse_verdict_valid() {
        let result = parse_verdict(
            r#" {"pass": true, "confidence": 0.9, "issues": [{"category": "spacing", "severity": "minor", "description": "gap is 2px wider"}], "summary": "close"} "#,
        );
        assert!(result.pass);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.issues[0].category, IssueCategory::Spacing);
        assert_eq!(result.issues[0].region, None);
    }

    #[test]
    fn test_parse_verdict_downgrades_blocking_pass() {
        let result = parse_verdict(
            r#"{"pass": true, "confidence": 0.7, "issues": [{"category": "layout", "severity": "major", "description": "sidebar missing", "region": "left"}], "summary": "mostly"}"#,
        );
        assert!(!result.pass);
        assert_eq!(result.issues[0].region.as_deref(), Some("left"));
    }

    #[test]
    fn test_parse_verdict_rejects_schema_violations() {
        let cases = [
            "Looks good to me!",
            r#"{"pass": true, "confidence": 0.9, "issues": [], "summary": "x""#,
            r#"{"pass": true, "confidence": 0.9, "issues": []}"#,
            r#"{"pass": true, "confidence": 1.5, "issues": [], "summary": "x"}"#,
            r#"{"pass": false, "confidence": 0.5, "issues": [{"category": "motion", "severity": "minor", "description": "x"}], "summary": "x"}"#,
            r#"{"pass": "yes", "confidence": 0.5, "issues": [], "summary": "x"}"#,
        ];
        for text in cases {
            let result = parse_verdict(text);
            assert!(!result.pass, "{}", text);
            assert_eq!(result.confidence, 0.0);
            assert!(result.issues.is_empty());
            assert!(result.summary.starts_with("Failed to parse"), "{}", result.summary);
        }
    }

    #[test]
    fn test_rubric_mentions_dimensions() {
        let prompt = build_rubric_prompt();
        for word in ["layout", "spacing", "typography", "color", "states", "JSON"] {
            assert!(prompt.contains(word), "missing {}", word);
        }
    }

    #[test]
    fn test_vision_config_builder() {
        let config = VisionConfig::new("http://localhost:8080")
            .model("vision-test")
            .max_tokens(200)
            .api_key(Some("k".to_string()));

        assert_eq!(config.endpoint, "http://localhost:8080");
        assert_eq!(config.model, "vision-test");
        assert_eq!(config.max_tokens, 200);
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn test_compare_with_vision_success() {
        let dir = tempfile::tempdir().unwrap();
        let (design, implementation) = write_images(dir.path());
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/messages")
                    .header("x-api-key", "test-key")
                    .header("anthropic-version", config::VISION_API_VERSION)
                    .body_includes("\"model\":\"test-model\"")
                    .body_includes("image/png");
                then.status(200).json_body(text_reply(
                    r#"{"pass": false, "confidence": 0.8, "issues": [{"category": "color", "severity": "critical", "description": "primary is blue, design is red"}], "summary": "wrong brand color"}"#,
                ));
            })
            .await;

        let result = compare_with_vision(&design, &implementation, &test_config(&server)).await;

        mock.assert_async().await;
        assert!(!result.pass);
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.issues[0].severity, Severity::Critical);
        assert_eq!(result.summary, "wrong brand color");
    }

    #[tokio::test]
    async fn test_compare_with_vision_unparsable_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (design, implementation) = write_images(dir.path());
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/messages");
                then.status(200)
                    .json_body(text_reply("```json\n{\"pass\": true}\n```"));
            })
            .await;

        let result = compare_with_vision(&design, &implementation, &test_config(&server)).await;
        assert!(!result.pass);
        assert_eq!(result.confidence, 0.0);
        assert!(result.summary.starts_with("Failed to parse"));
    }

    #[tokio::test]
    async fn test_compare_with_vision_api_error() {
        let dir = tempfile::tempdir().unwrap();
        let (design, implementation) = write_images(dir.path());
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/messages");
                then.status(401).body("invalid x-api-key");
            })
            .await;

        let result = compare_with_vision(&design, &implementation, &test_config(&server)).await;
        assert!(!result.pass);
        assert_eq!(result.confidence, 0.0);
        assert!(result.summary.contains("401"), "{}", result.summary);
    }

    #[tokio::test]
    async fn test_compare_with_vision_no_text_block() {
        let dir = tempfile::tempdir().unwrap();
        let (design, implementation) = write_images(dir.path());
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/messages");
                then.status(200).json_body(serde_json::json!({ "content": [] }));
            })
            .await;

        let result = compare_with_vision(&design, &implementation, &test_config(&server)).await;
        assert!(!result.pass);
        assert!(result.summary.contains("no text block"));
    }

    #[tokio::test]
    async fn test_compare_with_vision_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let (design, implementation) = write_images(dir.path());
        let config = VisionConfig::new("http://127.0.0.1:1/v1/messages")
            .api_key(Some("test-key".to_string()));

        let result = compare_with_vision(&design, &implementation, &config).await;
        assert!(!result.pass);
        assert_eq!(result.confidence, 0.0);
        assert!(result.summary.starts_with("Vision comparison failed"));
    }

    #[tokio::test]
    async fn test_compare_with_vision_without_key_or_images() {
        let dir = tempfile::tempdir().unwrap();
        let (design, implementation) = write_images(dir.path());

        let no_key = VisionConfig::new("http://127.0.0.1:1").api_key(None);
        let result = compare_with_vision(&design, &implementation, &no_key).await;
        assert!(!result.pass);
        assert!(result.summary.contains(config::ENV_API_KEY));

        let keyed = no_key.api_key(Some("k".to_string()));
        let missing = dir.path().join("missing.png");
        let result = compare_with_vision(&missing, &implementation, &keyed).await;
        assert!(!result.pass);
        assert!(result.summary.contains("missing.png"));
    }
}
