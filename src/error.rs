//! Error types shared across the backend.
//!
//! Model calls, parsing, session transitions and persistence each get their own enum so
//! callers can decide what to absorb (pipeline stages), soften (chat) or surface (HTTP).

use thiserror::Error;

/// Failure while turning free-form model text into a JSON value.
#[derive(Debug, Error)]
pub enum ParseError {
  #[error("no JSON object found in model response")]
  NoJsonObject,
  #[error("invalid JSON in model response: {0}")]
  Invalid(#[from] serde_json::Error),
}

/// Failure of an outbound generative-AI call.
#[derive(Debug, Error)]
pub enum AiError {
  #[error("API KEY MISSING: 请在右下角设置中心配置 API Key")]
  MissingCredential,
  #[error("model HTTP {status} ({status_text}): {message}")]
  Http { status: u16, status_text: String, message: String },
  #[error("network error: {0}")]
  Network(String),
  #[error("model returned no usable content")]
  EmptyResponse,
  #[error(transparent)]
  Parse(#[from] ParseError),
}

impl AiError {
  /// Rate-limit / quota classification used by the retry wrapper.
  ///
  /// Matches HTTP 429, a `RESOURCE_EXHAUSTED`/`429` status string, or a message mentioning
  /// 429, quota, limit or exhausted.
  pub fn is_quota(&self) -> bool {
    match self {
      AiError::Http { status, status_text, message } => {
        *status == 429
          || status_text.contains("429")
          || status_text.contains("RESOURCE_EXHAUSTED")
          || message_mentions_quota(message)
      }
      AiError::Network(msg) => message_mentions_quota(msg),
      _ => false,
    }
  }
}

fn message_mentions_quota(msg: &str) -> bool {
  let m = msg.to_lowercase();
  m.contains("429") || m.contains("quota") || m.contains("limit") || m.contains("exhausted")
}

/// Rejected game-session transition. State is never mutated when one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
  #[error("unknown task: {0}")]
  UnknownTask(String),
  #[error("unknown clue: {0}")]
  UnknownClue(String),
  #[error("action requires stage {expected}, session is in {actual}")]
  WrongStage { expected: &'static str, actual: &'static str },
  #[error("unknown role: {0}")]
  UnknownRole(String),
  #[error("unknown session: {0}")]
  UnknownSession(String),
  #[error("session has ended")]
  Ended,
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
  #[error("column encoding error: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("{kind} reference points to missing id '{id}'")]
  DanglingReference { kind: &'static str, id: String },
  #[error("not found: {0}")]
  NotFound(String),
}

/// Settings file failures.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("settings file IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("settings file is not valid TOML: {0}")]
  TomlRead(#[from] toml::de::Error),
  #[error("settings could not be encoded: {0}")]
  TomlWrite(#[from] toml::ser::Error),
}

/// Everything an API call can fail with, mapped to a status at the HTTP edge.
#[derive(Debug, Error)]
pub enum AppError {
  #[error(transparent)]
  Session(#[from] SessionError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("not found: {0}")]
  NotFound(String),
  #[error("bad request: {0}")]
  BadRequest(String),
  #[error("{0} is not available")]
  Unavailable(&'static str),
}

impl AppError {
  pub fn status_code(&self) -> u16 {
    match self {
      AppError::Session(SessionError::WrongStage { .. }) => 409,
      AppError::Session(SessionError::Ended) => 410,
      AppError::Session(_) => 404,
      AppError::Store(StoreError::DanglingReference { .. }) => 422,
      AppError::Store(StoreError::NotFound(_)) => 404,
      AppError::Store(_) | AppError::Config(_) => 500,
      AppError::NotFound(_) => 404,
      AppError::BadRequest(_) => 400,
      AppError::Unavailable(_) => 503,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn http(status: u16, status_text: &str, message: &str) -> AiError {
    AiError::Http { status, status_text: status_text.into(), message: message.into() }
  }

  #[test]
  fn quota_classification() {
    assert!(http(429, "", "").is_quota());
    assert!(http(400, "RESOURCE_EXHAUSTED", "").is_quota());
    assert!(http(500, "INTERNAL", "You exceeded your current Quota").is_quota());
    assert!(http(403, "", "rate limit reached").is_quota());
    assert!(AiError::Network("HTTP 429 from upstream".into()).is_quota());

    assert!(!http(500, "INTERNAL", "backend exploded").is_quota());
    assert!(!AiError::Network("connection reset".into()).is_quota());
    assert!(!AiError::MissingCredential.is_quota());
  }

  #[test]
  fn app_errors_pick_a_status() {
    let wrong = AppError::from(SessionError::WrongStage { expected: "gameplay", actual: "intro" });
    assert_eq!(wrong.status_code(), 409);
    assert_eq!(AppError::from(SessionError::UnknownTask("t9".into())).status_code(), 404);
    assert_eq!(AppError::from(SessionError::Ended).status_code(), 410);
    let dangling = AppError::from(StoreError::DanglingReference { kind: "assignee", id: "r9".into() });
    assert_eq!(dangling.status_code(), 422);
    assert_eq!(dangling.to_string(), "assignee reference points to missing id 'r9'");
    assert_eq!(AppError::Unavailable("database").status_code(), 503);
  }
}
