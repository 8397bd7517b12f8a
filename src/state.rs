//! Application state shared by every handler.
//!
//! This module owns:
//!   - the API settings record (hot-swappable, persisted to TOML)
//!   - the prompt rule book and per-call-site retry policies (handed to workshop and tutor)
//!   - the generative model behind the workshop and the tutor
//!   - the optional database and the bundled script catalogue
//!   - the registry of live game sessions

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::config::{load_agent_config_from_env, AgentConfig, ApiConfig, ApiConfigUpdate};
use crate::domain::{Script, ScriptSummary};
use crate::error::{AppError, StoreError};
use crate::gemini::GeminiClient;
use crate::model::GenerativeModel;
use crate::prompts::RuleBook;
use crate::seeds::bundled_scripts;
use crate::session::SessionRegistry;
use crate::store::Store;
use crate::tutor::Tutor;
use crate::workshop::Workshop;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://edurealm.db?mode=rwc";

pub struct AppState {
    pub settings: Arc<RwLock<ApiConfig>>,
    pub settings_path: PathBuf,
    pub workshop: Workshop,
    pub tutor: Tutor,
    pub store: Option<Store>,
    pub bundled: Vec<Script>,
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Build state from env: settings file, agent config, Gemini client, database.
    #[instrument(level = "info", skip_all)]
    pub async fn from_env() -> Result<Self, reqwest::Error> {
        let settings_path = ApiConfig::settings_path();
        let settings = Arc::new(RwLock::new(ApiConfig::load_or_default(&settings_path)));
        {
            let s = settings.read().await;
            if s.has_key() {
                info!(target: "edurealm", model = %s.model, base_url = %s.base_url, "Gemini enabled.");
            } else {
                warn!(target: "edurealm", "No API key configured; model calls will ask for one.");
            }
        }
        let model: Arc<dyn GenerativeModel> = Arc::new(GeminiClient::new(settings.clone())?);

        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let store = match Store::connect(&url).await {
            Ok(s) => Some(s),
            Err(e) => {
                error!(target: "store", error = %e, "Database unavailable; publishing and progress are disabled");
                None
            }
        };

        Ok(Self::new(settings, settings_path, load_agent_config_from_env(), model, store))
    }

    pub fn new(
        settings: Arc<RwLock<ApiConfig>>,
        settings_path: PathBuf,
        agent: Option<AgentConfig>,
        model: Arc<dyn GenerativeModel>,
        store: Option<Store>,
    ) -> Self {
        let agent = agent.unwrap_or_default();
        let rules = Arc::new(RuleBook::with_overrides(&agent.rules));
        let policies = agent.retry.policies();
        let bundled = bundled_scripts();
        info!(target: "edurealm", bundled = bundled.len(), database = store.is_some(), "Application state ready");
        Self {
            settings,
            settings_path,
            workshop: Workshop::new(model.clone(), rules, policies.generation),
            tutor: Tutor::new(model, policies),
            store,
            bundled,
            sessions: SessionRegistry::new(agent.sessions.policy()),
        }
    }

    pub fn store(&self) -> Result<&Store, AppError> {
        self.store.as_ref().ok_or(AppError::Unavailable("database"))
    }

    /// Bundled scripts first, then whatever the database lets this user see.
    #[instrument(level = "debug", skip(self))]
    pub async fn list_scripts(&self, user: Option<&str>) -> Vec<ScriptSummary> {
        let mut out: Vec<ScriptSummary> = self.bundled.iter().map(|s| ScriptSummary::of(s, true)).collect();
        if let Some(store) = &self.store {
            match store.list_scripts(user).await {
                Ok(rows) => out.extend(rows),
                Err(e) => error!(target: "store", error = %e, "Listing stored scripts failed; showing bundled only"),
            }
        }
        out
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn load_script(&self, id: &str) -> Result<Script, AppError> {
        if let Some(s) = self.bundled.iter().find(|s| s.id == id) {
            return Ok(s.clone());
        }
        match &self.store {
            Some(store) => Ok(store.fetch_script(id).await?),
            None => Err(StoreError::NotFound(format!("script {}", id)).into()),
        }
    }

    /// Current settings with the key masked.
    pub async fn settings_view(&self) -> ApiConfig {
        self.settings.read().await.masked()
    }

    /// Merge, persist, then swap in the new record. Nothing changes if the save fails.
    #[instrument(level = "info", skip_all)]
    pub async fn update_settings(&self, update: ApiConfigUpdate) -> Result<ApiConfig, AppError> {
        let mut guard = self.settings.write().await;
        let next = guard.merged(update);
        next.save(&self.settings_path)?;
        *guard = next;
        info!(target: "edurealm", model = %guard.model, has_key = guard.has_key(), "Settings updated");
        Ok(guard.masked())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// State over a scripted model with no database, settings in a temp dir.
    pub fn state_with(model: Arc<dyn GenerativeModel>, dir: &std::path::Path) -> AppState {
        let settings = Arc::new(RwLock::new(ApiConfig { api_key: "AIza-test-1234".into(), ..Default::default() }));
        AppState::new(settings, dir.join("settings.toml"), None, model, None)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::state_with;
    use super::*;
    use crate::model::testing::ScriptedModel;
    use crate::seeds::SILK_ROAD_ID;

    #[tokio::test]
    async fn bundled_scripts_are_listed_and_loadable_without_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(Arc::new(ScriptedModel::new()), dir.path());
        let list = state.list_scripts(Some("alice")).await;
        assert_eq!(list.len(), 4);
        assert!(list.iter().all(|s| s.is_official));
        assert_eq!(state.load_script(SILK_ROAD_ID).await.unwrap().id, SILK_ROAD_ID);
        assert!(matches!(state.load_script("nope").await, Err(AppError::Store(StoreError::NotFound(_)))));
        assert!(matches!(state.store(), Err(AppError::Unavailable("database"))));
    }

    #[tokio::test]
    async fn settings_update_persists_and_masks() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(Arc::new(ScriptedModel::new()), dir.path());
        let view = state
            .update_settings(ApiConfigUpdate { model: Some("gemini-2.5-pro".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(view.model, "gemini-2.5-pro");
        assert_eq!(view.api_key, "****1234");
        assert_eq!(state.settings.read().await.api_key, "AIza-test-1234");

        let reloaded = ApiConfig::load(&dir.path().join("settings.toml")).unwrap();
        assert_eq!(reloaded.model, "gemini-2.5-pro");
    }
}
