//! Minimal Gemini REST client.
//!
//! We only call `models/{model}:generateContent` and ask for either plain text, a JSON
//! object (optionally with a response schema) or inline image parts. Settings are read
//! on every call so a key saved from the settings panel applies immediately.
//!
//! NOTE: We never log the API key or prompt contents, only sizes and latencies.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::config::ApiConfig;
use crate::error::AiError;
use crate::model::{GenerateRequest, GenerateResponse, GenerativeModel, InlineImage};
use crate::util::trunc_for_log;

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct GeminiClient {
  client: reqwest::Client,
  settings: Arc<RwLock<ApiConfig>>,
}

impl GeminiClient {
  pub fn new(settings: Arc<RwLock<ApiConfig>>) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(180))
      .build()?;
    Ok(Self { client, settings })
  }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
  #[instrument(
    level = "info",
    skip(self, request),
    fields(json = request.json_output, prompt_len = request.contents.len())
  )]
  async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, AiError> {
    let cfg = self.settings.read().await.clone();
    if !cfg.has_key() {
      return Err(AiError::MissingCredential);
    }
    let model = request.model.clone().unwrap_or_else(|| cfg.model.clone());
    let url = format!("{}/v1beta/models/{}:generateContent", cfg.base_url, model);
    let body = GenerateContentRequest::from(&request);

    let start = Instant::now();
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "edurealm-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(API_KEY_HEADER, cfg.api_key.as_str())
      .json(&body)
      .send()
      .await
      .map_err(|e| AiError::Network(e.to_string()))?;

    let status = res.status();
    if !status.is_success() {
      let text = res.text().await.unwrap_or_default();
      let err = http_error(status.as_u16(), status.canonical_reason().unwrap_or(""), &text);
      warn!(target: "gemini", %model, status = status.as_u16(), elapsed_ms = start.elapsed().as_millis() as u64, body = %trunc_for_log(&text, 200), "Gemini returned an error status");
      return Err(err);
    }

    let parsed: GenerateContentResponse = res.json().await.map_err(|e| AiError::Network(e.to_string()))?;
    if let Some(usage) = &parsed.usage_metadata {
      info!(target: "gemini", %model, prompt_tokens = ?usage.prompt_token_count, output_tokens = ?usage.candidates_token_count, total_tokens = ?usage.total_token_count, "Gemini usage");
    }
    // Blocked prompts come back with no candidates at all.
    if parsed.candidates.is_empty() {
      warn!(target: "gemini", %model, "Gemini returned no candidates");
      return Err(AiError::EmptyResponse);
    }
    let out = parsed.into_response();
    info!(
      target: "gemini",
      %model,
      elapsed_ms = start.elapsed().as_millis() as u64,
      text_len = out.text.as_ref().map(|t| t.len()).unwrap_or(0),
      images = out.images.len(),
      "Gemini response received"
    );
    Ok(out)
  }
}

/// Build an `AiError::Http` from Google's `{ "error": { code, message, status } }` body.
fn http_error(status: u16, reason: &str, body: &str) -> AiError {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj {
    #[serde(default)] message: String,
    #[serde(default)] status: String,
  }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => AiError::Http {
      status,
      status_text: if w.error.status.is_empty() { reason.to_string() } else { w.error.status },
      message: w.error.message,
    },
    Err(_) => AiError::Http { status, status_text: reason.to_string(), message: body.chars().take(500).collect() },
  }
}

// --- Wire DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
  contents: Vec<Content>,
  #[serde(skip_serializing_if = "Option::is_none")]
  system_instruction: Option<Content>,
  #[serde(skip_serializing_if = "Option::is_none")]
  generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  role: Option<String>,
  #[serde(default)]
  parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  text: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
  mime_type: String,
  data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  #[serde(skip_serializing_if = "Option::is_none")]
  temperature: Option<f32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_output_tokens: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_mime_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_schema: Option<Value>,
}

fn text_part(text: &str) -> Part {
  Part { text: Some(text.to_string()), inline_data: None }
}

impl From<&GenerateRequest> for GenerateContentRequest {
  fn from(r: &GenerateRequest) -> Self {
    let generation_config = GenerationConfig {
      temperature: r.temperature,
      max_output_tokens: r.max_output_tokens,
      response_mime_type: r.json_output.then(|| "application/json".to_string()),
      response_schema: if r.json_output { r.response_schema.clone() } else { None },
    };
    let has_config = generation_config.temperature.is_some()
      || generation_config.max_output_tokens.is_some()
      || generation_config.response_mime_type.is_some();
    Self {
      contents: vec![Content { role: Some("user".into()), parts: vec![text_part(&r.contents)] }],
      system_instruction: r
        .system_instruction
        .as_deref()
        .map(|s| Content { role: None, parts: vec![text_part(s)] }),
      generation_config: has_config.then_some(generation_config),
    }
  }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
  #[serde(default)]
  usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
  #[serde(default)]
  content: Option<Content>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
}

impl GenerateContentResponse {
  /// Text parts of the first candidate are concatenated; inline data parts become images.
  fn into_response(self) -> GenerateResponse {
    let mut text = String::new();
    let mut images = Vec::new();
    let parts = self
      .candidates
      .into_iter()
      .next()
      .and_then(|c| c.content)
      .map(|c| c.parts)
      .unwrap_or_default();
    for part in parts {
      if let Some(t) = part.text {
        text.push_str(&t);
      }
      if let Some(d) = part.inline_data {
        images.push(InlineImage { mime_type: d.mime_type, data: d.data });
      }
    }
    GenerateResponse { text: (!text.is_empty()).then_some(text), images }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn request_body_carries_schema_only_for_json() {
    let req = GenerateRequest::text("解析教材")
      .system("核心规则")
      .json(Some(json!({"type": "OBJECT"})))
      .temperature(0.2);
    let body = serde_json::to_value(GenerateContentRequest::from(&req)).unwrap();
    assert_eq!(body["contents"][0]["parts"][0]["text"], "解析教材");
    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "核心规则");
    assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");

    let plain = serde_json::to_value(GenerateContentRequest::from(&GenerateRequest::text("hi"))).unwrap();
    assert!(plain.get("generationConfig").is_none());
    assert!(plain.get("systemInstruction").is_none());
  }

  #[test]
  fn response_parts_are_split_into_text_and_images() {
    let raw = json!({
      "candidates": [{ "content": { "parts": [
        { "text": "{\"a\":" },
        { "text": "1}" },
        { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } }
      ]}}]
    });
    let parsed: GenerateContentResponse = serde_json::from_value(raw).unwrap();
    let out = parsed.into_response();
    assert_eq!(out.text.as_deref(), Some("{\"a\":1}"));
    assert_eq!(out.images, vec![InlineImage { mime_type: "image/png".into(), data: "aGVsbG8=".into() }]);
  }

  #[test]
  fn google_error_body_becomes_http_error() {
    let body = r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED"}}"#;
    let err = http_error(429, "Too Many Requests", body);
    assert!(err.is_quota());
    assert!(matches!(err, AiError::Http { status: 429, ref status_text, .. } if status_text == "RESOURCE_EXHAUSTED"));

    let opaque = http_error(502, "Bad Gateway", "<html>upstream</html>");
    assert!(matches!(opaque, AiError::Http { status: 502, ref message, .. } if message.contains("upstream")));
    assert!(!opaque.is_quota());
  }

  #[tokio::test]
  async fn empty_key_fails_without_network() {
    let settings = Arc::new(RwLock::new(ApiConfig {
      api_key: String::new(),
      base_url: "http://127.0.0.1:9".into(),
      ..Default::default()
    }));
    let client = GeminiClient::new(settings).unwrap();
    let out = client.generate(GenerateRequest::text("hi")).await;
    assert!(matches!(out, Err(AiError::MissingCredential)));
  }
}
