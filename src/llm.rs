use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: 0.3,
        }
    }
}

/// One single-turn completion: a system instruction plus the user message.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

// Gemini wire types, shared with the embedding client.

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Part {
    #[serde(default)]
    pub text: String,
}

impl Content {
    pub(crate) fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Prefix bare model names with `models/` as the REST API expects.
pub(crate) fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

pub(crate) fn resolve_api_key(api_key: Option<String>) -> std::result::Result<String, String> {
    let key = match api_key {
        Some(key) => key,
        None => env::var(API_KEY_ENV).map_err(|_| format!("{API_KEY_ENV} is not set"))?,
    };
    if key.trim().is_empty() {
        return Err(format!("{API_KEY_ENV} is empty"));
    }
    Ok(key)
}

pub(crate) fn http_client() -> std::result::Result<Client, String> {
    Client::builder()
        .user_agent(concat!("docrag/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| format!("HTTP client error: {e}"))
}

/// POST a JSON body and decode the JSON answer; errors carry status and body.
///
/// The key travels in a header and transport errors are stripped of the URL,
/// so error messages never contain credentials.
pub(crate) async fn post_json<B, R>(
    http: &Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> std::result::Result<R, String>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let response = http
        .post(url)
        .header(API_KEY_HEADER, api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| format!("request failed: {}", e.without_url()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| format!("failed to read response: {}", e.without_url()))?;

    if !status.is_success() {
        return Err(format!("status {status}: {text}"));
    }

    serde_json::from_str(&text).map_err(|e| format!("invalid response: {e}"))
}

/// Google Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Create a client; `api_key` falls back to `GOOGLE_API_KEY`.
    pub fn new(api_key: Option<String>, model: &str, base_url: &str) -> Result<Self> {
        let api_key = resolve_api_key(api_key).map_err(Error::Config)?;
        let http = http_client().map_err(Error::Config)?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model_path(model),
        })
    }
}

#[async_trait]
impl CompletionModel for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let payload = GenerateRequest {
            contents: vec![Content::text(Some("user"), &request.user)],
            system_instruction: Content::text(None, &request.system),
            generation_config: WireGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };
        let url = format!("{}/{}:generateContent", self.base_url, self.model);

        debug!("Calling {} (system prompt {} chars)", self.model, request.system.len());
        let response: GenerateResponse = post_json(&self.http, &url, &self.api_key, &payload)
            .await
            .map_err(|e| Error::Generation(format!("{}: {e}", self.model)))?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::Generation(format!("empty response from {}", self.model)));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new(Some("test-key".into()), "gemini-test", &server.base_url()).unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "Answer only from context.\n\nBreast cancer is a disease.".into(),
            user: "What is breast cancer?".into(),
            temperature: 0.3,
            max_tokens: 500,
        }
    }

    #[test]
    fn model_path_adds_prefix_once() {
        assert_eq!(model_path("gemini-2.5-flash"), "models/gemini-2.5-flash");
        assert_eq!(model_path("models/embedding-001"), "models/embedding-001");
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = GeminiClient::new(Some("  ".into()), "m", "http://localhost").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn complete_sends_system_instruction_and_returns_text() {
        let server = MockServer::start_async().await;

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/models/gemini-test:generateContent")
                .header("x-goog-api-key", "test-key")
                .matches(|req| {
                    let body: serde_json::Value =
                        serde_json::from_slice(req.body().as_ref()).unwrap();
                    let system = body["systemInstruction"]["parts"][0]["text"]
                        .as_str()
                        .unwrap_or("");
                    let user = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or("");
                    system.contains("Breast cancer is a disease.")
                        && user == "What is breast cancer?"
                        && body["contents"][0]["role"] == "user"
                        && body["generationConfig"]["maxOutputTokens"] == 500
                });
            then.status(200).json_body(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Breast cancer "}, {"text": "is a disease."}]}
                }]
            }));
        });

        let answer = client(&server).complete(&request()).await.unwrap();

        assert_eq!(answer, "Breast cancer is a disease.");
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn http_failure_is_generation_error() {
        let server = MockServer::start_async().await;

        let mock = server.mock(|when, then| {
            when.method(POST).path("/models/gemini-test:generateContent");
            then.status(429).body("quota exhausted");
        });

        let err = client(&server).complete(&request()).await.unwrap_err();

        assert!(matches!(err, Error::Generation(_)));
        let msg = err.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("quota exhausted"));
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn empty_candidates_are_generation_error() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/models/gemini-test:generateContent");
            then.status(200).json_body(json!({"candidates": []}));
        });

        let err = client(&server).complete(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[tokio::test]
    async fn api_key_stays_out_of_transport_errors() {
        // Nothing listens on port 1, so the request fails before any response.
        let client =
            GeminiClient::new(Some("SECRET123".into()), "m", "http://127.0.0.1:1").unwrap();

        let err = client.complete(&request()).await.unwrap_err();

        assert!(matches!(err, Error::Generation(_)));
        let msg = err.to_string();
        assert!(msg.contains("request failed"));
        assert!(!msg.contains("SECRET123"), "key leaked: {msg}");
    }
}
