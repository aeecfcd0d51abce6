//! Grounded search backend trait and the Google Gemini implementation.
//!
//! Endpoint: {base_url}/models/{model}:generateContent
//! Auth:     x-goog-api-key header
//!
//! The wire response is decoded into typed structs whose metadata fields are
//! all optional, then flattened into a [`GroundedResponse`].

use async_trait::async_trait;
use inflamind_config::GeminiConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed provider response: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("No API key configured")]
    MissingCredential,
    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },
}

/// Coarse failure category, used for logs and audit records only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Transport,
    MalformedResponse,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration     => "configuration",
            FailureKind::Transport         => "transport",
            FailureKind::MalformedResponse => "malformed_response",
        }
    }
}

impl LlmError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LlmError::MissingCredential                => FailureKind::Configuration,
            LlmError::Http(e) if e.is_decode()         => FailureKind::MalformedResponse,
            LlmError::Http(_) | LlmError::ApiError { .. } => FailureKind::Transport,
            LlmError::Serde(_)                         => FailureKind::MalformedResponse,
        }
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// One grounded query: a single user turn under a fixed system instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundedRequest {
    pub system_instruction: String,
    pub query: String,
    pub search_grounding: bool,
}

impl GroundedRequest {
    /// Gemini `generateContent` request body.
    pub fn to_gemini_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": self.query }]
            }],
            "systemInstruction": {
                "parts": [{ "text": self.system_instruction }]
            }
        });
        if self.search_grounding {
            body["tools"] = serde_json::json!([{ "googleSearch": {} }]);
        }
        body
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebSource>,
}

impl GroundingChunk {
    pub fn web(title: Option<&str>, uri: Option<&str>) -> Self {
        Self {
            web: Some(WebSource {
                uri: uri.map(String::from),
                title: title.map(String::from),
            }),
        }
    }
}

/// Provider output after decoding, before answer/citation normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundedResponse {
    /// Text of the first candidate; `None` when the provider produced none.
    pub text: Option<String>,
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thought: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
    #[serde(default)]
    pub web_search_queries: Vec<String>,
}

impl GenerateContentResponse {
    pub fn into_grounded(self) -> GroundedResponse {
        let Some(first) = self.candidates.into_iter().next() else {
            return GroundedResponse::default();
        };

        // Thought summaries are not part of the answer
        let texts: Vec<String> = first.content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.thought != Some(true))
            .filter_map(|p| p.text)
            .collect();
        let text = if texts.is_empty() { None } else { Some(texts.concat()) };

        if let Some(reason) = first.finish_reason.as_deref() {
            debug!(finish_reason = reason, "Gemini candidate finished");
        }

        let grounding_chunks = match first.grounding_metadata {
            Some(meta) => {
                debug!(
                    chunks = meta.grounding_chunks.len(),
                    searches = meta.web_search_queries.len(),
                    "Gemini grounding metadata received"
                );
                meta.grounding_chunks
            }
            None => Vec::new(),
        };

        GroundedResponse { text, grounding_chunks }
    }
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn generate(
        &self,
        req: &GroundedRequest,
        api_key: &SecretString,
    ) -> Result<GroundedResponse, LlmError>;
    fn model_id(&self) -> &str;
}

// ── Google Gemini ─────────────────────────────────────────────────────────────

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiBackend {
    pub model: String,
    pub base_url: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_base_url(model, GEMINI_API_BASE)
    }

    pub fn with_base_url(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &GeminiConfig) -> Self {
        Self::with_base_url(config.model.clone(), config.base_url.clone())
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

async fn read_response_body(resp: reqwest::Response) -> Result<String, LlmError> {
    let status = resp.status().as_u16();
    let body = resp.text().await?;
    if status >= 400 {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|json| json["error"]["message"].as_str().map(String::from))
            .unwrap_or_else(|| body.chars().take(200).collect());
        return Err(LlmError::ApiError { status, message });
    }
    Ok(body)
}

#[async_trait]
impl SearchBackend for GeminiBackend {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(
        &self,
        req: &GroundedRequest,
        api_key: &SecretString,
    ) -> Result<GroundedResponse, LlmError> {
        let resp = self.client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&req.to_gemini_body())
            .send()
            .await?;

        let body = read_response_body(resp).await?;
        let decoded: GenerateContentResponse = serde_json::from_str(&body)?;
        Ok(decoded.into_grounded())
    }

    fn model_id(&self) -> &str { &self.model }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;

    fn request() -> GroundedRequest {
        GroundedRequest {
            system_instruction: "你是醫學專家".to_string(),
            query: "慢性發炎如何影響大腦前額葉？".to_string(),
            search_grounding: true,
        }
    }

    #[test]
    fn test_body_carries_single_user_turn_and_search_tool() {
        let body = request().to_gemini_body();
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "慢性發炎如何影響大腦前額葉？");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "你是醫學專家");
        assert_eq!(body["tools"], serde_json::json!([{ "googleSearch": {} }]));
    }

    #[test]
    fn test_body_without_grounding_has_no_tools() {
        let mut req = request();
        req.search_grounding = false;
        assert!(req.to_gemini_body().get("tools").is_none());
    }

    #[test]
    fn test_into_grounded_joins_text_parts_and_skips_thoughts() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "thinking...", "thought": true },
                    { "text": "Part one. " },
                    { "text": "Part two." }
                ]},
                "groundingMetadata": {
                    "groundingChunks": [{ "web": { "uri": "https://example.org/a", "title": "Study A" } }]
                }
            }]
        });
        let resp: GenerateContentResponse = serde_json::from_value(json).unwrap();
        let grounded = resp.into_grounded();
        assert_eq!(grounded.text.as_deref(), Some("Part one. Part two."));
        assert_eq!(
            grounded.grounding_chunks,
            vec![GroundingChunk::web(Some("Study A"), Some("https://example.org/a"))]
        );
    }

    #[test]
    fn test_into_grounded_without_candidates_is_empty() {
        let resp: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(resp.into_grounded(), GroundedResponse::default());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(LlmError::MissingCredential.kind(), FailureKind::Configuration);
        assert_eq!(
            LlmError::ApiError { status: 503, message: "overloaded".into() }.kind(),
            FailureKind::Transport
        );
        let serde_err = serde_json::from_str::<GenerateContentResponse>("[1, 2]").unwrap_err();
        assert_eq!(LlmError::from(serde_err).kind(), FailureKind::MalformedResponse);
    }

    #[test]
    fn test_gemini_backend_model_id() {
        let b = GeminiBackend::new("gemini-2.5-flash");
        assert_eq!(b.model_id(), "gemini-2.5-flash");
        assert_eq!(
            b.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_generate_posts_to_gemini_endpoint() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/gemini-2.5-flash:generateContent")
                    .header("x-goog-api-key", "AIza-test")
                    .json_body(request().to_gemini_body());
                then.status(200).json_body(serde_json::json!({
                    "candidates": [{
                        "content": { "parts": [{ "text": "發炎會影響前額葉。" }] },
                        "groundingMetadata": {
                            "groundingChunks": [
                                { "web": { "uri": "https://example.org/a", "title": "Study A" } }
                            ]
                        }
                    }]
                }));
            })
            .await;

        let backend = GeminiBackend::with_base_url("gemini-2.5-flash", server.base_url());
        let key = SecretString::from("AIza-test");
        let resp = backend.generate(&request(), &key).await.unwrap();

        mock.assert_async().await;
        assert_eq!(resp.text.as_deref(), Some("發炎會影響前額葉。"));
        assert_eq!(resp.grounding_chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_generate_maps_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(403).json_body(serde_json::json!({
                    "error": { "code": 403, "message": "API key not valid" }
                }));
            })
            .await;

        let backend = GeminiBackend::with_base_url("gemini-2.5-flash", server.base_url());
        let err = backend
            .generate(&request(), &SecretString::from("bad"))
            .await
            .unwrap_err();

        match err {
            LlmError::ApiError { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_rejects_unexpected_shape() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).body(r#"{"candidates": "not-a-list"}"#);
            })
            .await;

        let backend = GeminiBackend::with_base_url("gemini-2.5-flash", server.base_url());
        let err = backend
            .generate(&request(), &SecretString::from("AIza-test"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedResponse);
    }
}
