//! Generative model seam.
//!
//! Everything that talks to a model goes through `GenerativeModel`, so pipeline stages,
//! tutor calls and session chat can run against the real Gemini client or a scripted fake.
//! `ask_text` / `ask_json` add the retry wrapper and response parsing on top.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::AiError;
use crate::retry::{with_backoff, RetryPolicy};
use crate::sanitize::parse_json;

/// One `generateContent`-style request.
#[derive(Clone, Debug, Default)]
pub struct GenerateRequest {
  /// Overrides the configured text model (used for image generation).
  pub model: Option<String>,
  pub contents: String,
  pub system_instruction: Option<String>,
  /// Structured-output schema. Requested, never trusted.
  pub response_schema: Option<Value>,
  pub json_output: bool,
  pub temperature: Option<f32>,
  pub max_output_tokens: Option<u32>,
}

impl GenerateRequest {
  pub fn text(contents: impl Into<String>) -> Self {
    Self { contents: contents.into(), ..Default::default() }
  }

  pub fn system(mut self, instruction: impl Into<String>) -> Self {
    self.system_instruction = Some(instruction.into());
    self
  }

  pub fn json(mut self, schema: Option<Value>) -> Self {
    self.json_output = true;
    self.response_schema = schema;
    self
  }

  pub fn temperature(mut self, t: f32) -> Self {
    self.temperature = Some(t);
    self
  }

  pub fn model(mut self, model: impl Into<String>) -> Self {
    self.model = Some(model.into());
    self
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InlineImage {
  pub mime_type: String,
  /// Base64 payload as returned by the API.
  pub data: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerateResponse {
  pub text: Option<String>,
  pub images: Vec<InlineImage>,
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
  async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, AiError>;
}

/// Text completion under `policy`. `Ok(None)` means the model answered with no text.
pub async fn ask_text(
  model: &dyn GenerativeModel,
  policy: RetryPolicy,
  operation: &str,
  request: GenerateRequest,
) -> Result<Option<String>, AiError> {
  let resp = with_backoff(policy, operation, || model.generate(request.clone())).await?;
  let text = resp.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
  debug!(target: "gemini", operation, reply_len = text.as_ref().map(|t| t.chars().count()).unwrap_or(0), "Text reply received");
  Ok(text)
}

/// JSON completion under `policy`, parsed into `T`. A missing body is treated as `{}`.
pub async fn ask_json<T: DeserializeOwned>(
  model: &dyn GenerativeModel,
  policy: RetryPolicy,
  operation: &str,
  request: GenerateRequest,
) -> Result<T, AiError> {
  let resp = with_backoff(policy, operation, || model.generate(request.clone())).await?;
  let text = resp.text.unwrap_or_else(|| "{}".to_string());
  debug!(target: "gemini", operation, reply_len = text.len(), "JSON reply received");
  Ok(parse_json::<T>(&text)?)
}

#[cfg(test)]
pub mod testing {
  //! Scripted stand-in for the real client.

  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;

  use super::*;

  /// Replays queued results in order and records every request it sees.
  /// Once the queue is empty every call fails with a network error.
  #[derive(Default)]
  pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<GenerateResponse, AiError>>>,
    calls: AtomicU32,
    seen: Mutex<Vec<GenerateRequest>>,
  }

  impl ScriptedModel {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn with_text(self, text: &str) -> Self {
      self.push(Ok(GenerateResponse { text: Some(text.to_string()), images: Vec::new() }));
      self
    }

    pub fn with_error(self, err: AiError) -> Self {
      self.push(Err(err));
      self
    }

    pub fn with_response(self, resp: GenerateResponse) -> Self {
      self.push(Ok(resp));
      self
    }

    pub fn push(&self, r: Result<GenerateResponse, AiError>) {
      self.replies.lock().unwrap().push_back(r);
    }

    pub fn calls(&self) -> u32 {
      self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
      self.seen.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl GenerativeModel for ScriptedModel {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, AiError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.seen.lock().unwrap().push(request);
      self
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(AiError::Network("scripted model has no more replies".into())))
    }
  }

  pub fn quota_error() -> AiError {
    AiError::Http { status: 429, status_text: "RESOURCE_EXHAUSTED".into(), message: "Quota exceeded".into() }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::*;
  use super::*;
  use serde::Deserialize;

  #[derive(Debug, Deserialize, PartialEq)]
  struct Pair { a: i64 }

  #[tokio::test(start_paused = true)]
  async fn ask_json_retries_quota_then_parses_fenced_reply() {
    let model = ScriptedModel::new()
      .with_error(quota_error())
      .with_text("```json\n{\"a\": 7}\n```");
    let out: Pair = ask_json(&model, RetryPolicy::new(2, 1_000), "test", GenerateRequest::text("x").json(None))
      .await
      .unwrap();
    assert_eq!(out, Pair { a: 7 });
    assert_eq!(model.calls(), 2);
  }

  #[tokio::test]
  async fn ask_json_reports_parse_failures() {
    let model = ScriptedModel::new().with_text("I cannot do that.");
    let out = ask_json::<Pair>(&model, RetryPolicy::new(0, 0), "test", GenerateRequest::text("x")).await;
    assert!(matches!(out, Err(AiError::Parse(_))));
  }

  #[tokio::test]
  async fn ask_text_treats_blank_as_none() {
    let model = ScriptedModel::new().with_text("   \n");
    let out = ask_text(&model, RetryPolicy::new(0, 0), "test", GenerateRequest::text("x")).await.unwrap();
    assert_eq!(out, None);
  }
}
