//! EduRealm · role-play learning backend
//!
//! - Axum HTTP + WebSocket API
//! - Workshop pipeline that turns teaching material into a playable script (Gemini)
//! - Game sessions with a companion game master, quiz grading and learning reports
//! - Optional SQLite persistence for published scripts, profiles and progress
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                   : u16 (default 3000)
//!   EDUREALM_SETTINGS_PATH : TOML file with provider settings (default "./edurealm-settings.toml")
//!   EDUREALM_CONFIG_PATH   : TOML file overriding prompts, retry policies and session idle TTL
//!   DATABASE_URL           : sqlite URL (default "sqlite://edurealm.db?mode=rwc")
//!   GEMINI_API_KEY         : used when the settings file carries no key
//!   LOG_LEVEL              : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT             : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod retry;
mod sanitize;
mod prompts;
mod model;
mod gemini;
mod workshop;
mod tutor;
mod quiz;
mod session;
mod store;
mod seeds;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Settings, model client, optional database, bundled scripts.
  let state = Arc::new(AppState::from_env().await?);

  // Sessions whose client went away without ending them.
  let sweeper = tokio::spawn({
    let state = state.clone();
    async move { state.sessions.sweep_idle().await }
  });

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "edurealm", %addr, database = state.store.is_some(), "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  sweeper.abort();
  info!(target: "edurealm", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "edurealm", error = %e, "Could not listen for shutdown signal");
    std::future::pending::<()>().await;
  }
}
