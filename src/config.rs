//! Configuration: persisted API settings and the optional agent TOML.
//!
//! `ApiConfig` is what the settings panel reads and writes (`EDUREALM_SETTINGS_PATH`).
//! `AgentConfig` tunes prompt rules and retry policies (`EDUREALM_CONFIG_PATH`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::ConfigError;
use crate::prompts::RulesCfg;
use crate::retry::{RetryPolicies, RetryPolicyCfg};
use crate::session::IdlePolicy;

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiConfig {
  pub api_key: String,
  pub model: String,
  pub base_url: String,
  pub image_model: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      api_key: String::new(),
      model: DEFAULT_MODEL.into(),
      base_url: DEFAULT_BASE_URL.into(),
      image_model: DEFAULT_IMAGE_MODEL.into(),
    }
  }
}

impl ApiConfig {
  pub fn settings_path() -> PathBuf {
    std::env::var("EDUREALM_SETTINGS_PATH")
      .map(PathBuf::from)
      .unwrap_or_else(|_| PathBuf::from("./edurealm-settings.toml"))
  }

  /// Saved values over defaults; an empty key falls back to `GEMINI_API_KEY`.
  /// A missing file is not an error.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let mut cfg = match std::fs::read_to_string(path) {
      Ok(s) => toml::from_str::<ApiConfig>(&s)?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => ApiConfig::default(),
      Err(e) => return Err(e.into()),
    };
    if cfg.api_key.trim().is_empty() {
      if let Ok(k) = std::env::var("GEMINI_API_KEY") {
        cfg.api_key = k;
      }
    }
    cfg.normalize();
    Ok(cfg)
  }

  /// Like `load`, but logs and falls back to defaults on a broken file.
  pub fn load_or_default(path: &Path) -> Self {
    match Self::load(path) {
      Ok(cfg) => {
        info!(target: "edurealm", path = %path.display(), model = %cfg.model, has_key = cfg.has_key(), "Loaded API settings");
        cfg
      }
      Err(e) => {
        error!(target: "edurealm", path = %path.display(), error = %e, "Failed to load API settings; using defaults");
        let mut cfg = ApiConfig::default();
        if let Ok(k) = std::env::var("GEMINI_API_KEY") {
          cfg.api_key = k;
        }
        cfg
      }
    }
  }

  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
      std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, toml::to_string_pretty(self)?)?;
    info!(target: "edurealm", path = %path.display(), "Saved API settings");
    Ok(())
  }

  pub fn has_key(&self) -> bool {
    !self.api_key.trim().is_empty()
  }

  /// Blank fields go back to their defaults; trailing slashes are dropped from the base URL.
  fn normalize(&mut self) {
    if self.model.trim().is_empty() { self.model = DEFAULT_MODEL.into(); }
    if self.image_model.trim().is_empty() { self.image_model = DEFAULT_IMAGE_MODEL.into(); }
    if self.base_url.trim().is_empty() { self.base_url = DEFAULT_BASE_URL.into(); }
    self.base_url = self.base_url.trim_end_matches('/').to_string();
  }

  /// Copy for display: keeps the last four characters of the key.
  pub fn masked(&self) -> Self {
    let chars: Vec<char> = self.api_key.chars().collect();
    let api_key = if chars.is_empty() {
      String::new()
    } else if chars.len() <= 4 {
      "****".into()
    } else {
      let tail: String = chars[chars.len() - 4..].iter().collect();
      format!("****{}", tail)
    };
    Self { api_key, ..self.clone() }
  }

  /// Apply an update from the settings panel. A masked or absent key keeps the current one.
  pub fn merged(&self, update: ApiConfigUpdate) -> Self {
    let mut next = self.clone();
    if let Some(k) = update.api_key.filter(|k| !k.starts_with("****")) { next.api_key = k; }
    if let Some(m) = update.model { next.model = m; }
    if let Some(u) = update.base_url { next.base_url = u; }
    if let Some(i) = update.image_model { next.image_model = i; }
    next.normalize();
    next
  }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfigUpdate {
  #[serde(default)] pub api_key: Option<String>,
  #[serde(default)] pub model: Option<String>,
  #[serde(default)] pub base_url: Option<String>,
  #[serde(default)] pub image_model: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub rules: RulesCfg,
  #[serde(default)]
  pub retry: RetryCfg,
  #[serde(default)]
  pub sessions: SessionsCfg,
}

/// `[sessions]`: idle sessions are ended after `idle_ttl_secs`, checked every `sweep_secs`.
#[derive(Clone, Copy, Debug, Deserialize, Default)]
pub struct SessionsCfg {
  #[serde(default)] pub idle_ttl_secs: Option<u64>,
  #[serde(default)] pub sweep_secs: Option<u64>,
}

impl SessionsCfg {
  pub fn policy(&self) -> IdlePolicy {
    let mut p = IdlePolicy::default();
    if let Some(s) = self.idle_ttl_secs { p.ttl = Duration::from_secs(s); }
    if let Some(s) = self.sweep_secs.filter(|s| *s > 0) { p.sweep_every = Duration::from_secs(s); }
    p
  }
}

/// `[retry.<site>]` tables; absent sites keep their defaults.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct RetryCfg {
  #[serde(default)] pub generation: Option<RetryPolicyCfg>,
  #[serde(default)] pub chat: Option<RetryPolicyCfg>,
  #[serde(default)] pub insight: Option<RetryPolicyCfg>,
  #[serde(default)] pub grading: Option<RetryPolicyCfg>,
  #[serde(default)] pub report: Option<RetryPolicyCfg>,
}

impl RetryCfg {
  pub fn policies(&self) -> RetryPolicies {
    let mut p = RetryPolicies::default();
    if let Some(c) = self.generation { p.generation = c.into(); }
    if let Some(c) = self.chat { p.chat = c.into(); }
    if let Some(c) = self.insight { p.insight = c.into(); }
    if let Some(c) = self.grading { p.grading = c.into(); }
    if let Some(c) = self.report { p.report = c.into(); }
    p
  }
}

/// Attempt to load `AgentConfig` from EDUREALM_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("EDUREALM_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AgentConfig>(&s) {
      Ok(cfg) => {
        info!(target: "edurealm", %path, "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "edurealm", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      warn!(target: "edurealm", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
