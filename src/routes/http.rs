//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented; logs carry ids and sizes, never prompt or answer text.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::{HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument, warn};

use crate::config::ApiConfigUpdate;
use crate::domain::{Artifact, QuizDraft, Script};
use crate::error::AppError;
use crate::logic::*;
use crate::protocol::*;
use crate::session::SessionEvent;
use crate::state::AppState;
use crate::store::{Profile, ProgressRecord};
use crate::workshop::assemble_script;

pub const USER_HEADER: &str = "x-user-id";

/// Signed-in user, if the front-end passed one along.
pub fn user_id(headers: &HeaderMap) -> Option<String> {
  headers
    .get(USER_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_string)
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
      warn!(target: "edurealm", error = %self, "Request failed");
    }
    (status, Json(ErrorOut { error: self.to_string() })).into_response()
  }
}

type ApiResult<T> = Result<Json<T>, AppError>;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let database = match &state.store {
    Some(store) => Some(store.ping().await),
    None => None,
  };
  let model_configured = state.settings.read().await.has_key();
  Json(HealthOut { ok: true, database, model_configured })
}

// ---------- settings ----------

#[instrument(level = "info", skip(state))]
pub async fn http_get_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(state.settings_view().await)
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_put_settings(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ApiConfigUpdate>,
) -> ApiResult<crate::config::ApiConfig> {
  Ok(Json(state.update_settings(body).await?))
}

// ---------- profile ----------

#[instrument(level = "info", skip(state, headers))]
pub async fn http_get_profile(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Profile> {
  let user = user_id(&headers).ok_or_else(|| AppError::BadRequest(format!("missing {} header", USER_HEADER)))?;
  state
    .store()?
    .profile(&user)
    .await?
    .map(Json)
    .ok_or_else(|| AppError::NotFound(format!("profile {}", user)))
}

#[instrument(level = "info", skip(state, headers, body))]
pub async fn http_put_profile(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Json(mut body): Json<Profile>,
) -> ApiResult<Profile> {
  let user = user_id(&headers).ok_or_else(|| AppError::BadRequest(format!("missing {} header", USER_HEADER)))?;
  body.id = user;
  state.store()?.upsert_profile(&body).await?;
  Ok(Json(body))
}

/// Finished playthroughs of the signed-in user, newest first.
#[instrument(level = "info", skip(state, headers))]
pub async fn http_get_progress(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Vec<ProgressRecord>> {
  let user = user_id(&headers).ok_or_else(|| AppError::BadRequest(format!("missing {} header", USER_HEADER)))?;
  Ok(Json(state.store()?.progress_for(&user).await?))
}

// ---------- scripts ----------

#[instrument(level = "info", skip(state, headers))]
pub async fn http_list_scripts(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
  let user = user_id(&headers);
  let list = state.list_scripts(user.as_deref()).await;
  info!(target: "edurealm", count = list.len(), signed_in = user.is_some(), "Script list served");
  Json(list)
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_script(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Script> {
  Ok(Json(state.load_script(&id).await?))
}

#[instrument(level = "info", skip(state, headers, script), fields(title = %script.title))]
pub async fn http_publish_script(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Json(script): Json<Script>,
) -> Result<(StatusCode, Json<PublishOut>), AppError> {
  let user = user_id(&headers);
  let id = state.store()?.publish_script(&script, user.as_deref()).await?;
  Ok((StatusCode::CREATED, Json(PublishOut { id })))
}

// ---------- sessions ----------

#[instrument(level = "info", skip(state, body), fields(script_id = %body.script_id, role_id = %body.role_id))]
pub async fn http_start_session(
  State(state): State<Arc<AppState>>,
  Json(body): Json<StartSessionIn>,
) -> Result<(StatusCode, Json<crate::session::SessionView>), AppError> {
  let view = start_session(&state, &body.script_id, &body.role_id).await?;
  Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> ApiResult<crate::session::SessionView> {
  Ok(Json(session_view(&state, &id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_end_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<EndOut> {
  let transcript = end_session(&state, &id).await?;
  Ok(Json(EndOut { transcript }))
}

async fn apply(state: &AppState, id: &str, event: SessionEvent) -> ApiResult<OutcomeOut> {
  let (outcome, session) = session_event(state, id, event).await?;
  Ok(Json(OutcomeOut { outcome, session }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_advance_intro(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<OutcomeOut> {
  apply(&state, &id, SessionEvent::AdvanceIntro).await
}

#[instrument(level = "info", skip(state))]
pub async fn http_accept_role(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<OutcomeOut> {
  apply(&state, &id, SessionEvent::AcceptRole).await
}

#[instrument(level = "info", skip(state, body), fields(answered = body.answer.is_some()))]
pub async fn http_submit_task(
  State(state): State<Arc<AppState>>,
  Path((id, task_id)): Path<(String, String)>,
  Json(body): Json<SubmitTaskIn>,
) -> ApiResult<OutcomeOut> {
  apply(&state, &id, SessionEvent::SubmitTask { task_id, answer: body.answer }).await
}

#[instrument(level = "info", skip(state))]
pub async fn http_dismiss_playback(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> ApiResult<OutcomeOut> {
  apply(&state, &id, SessionEvent::DismissPlayback).await
}

#[instrument(level = "info", skip(state))]
pub async fn http_open_clue(
  State(state): State<Arc<AppState>>,
  Path((id, clue_id)): Path<(String, String)>,
) -> ApiResult<OutcomeOut> {
  apply(&state, &id, SessionEvent::OpenClue { clue_id }).await
}

/// The insight lands in the session timeline; HTTP clients see it on their next read.
#[instrument(level = "info", skip(state, body), fields(text_len = body.text.len()))]
pub async fn http_chat(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<ChatIn>,
) -> ApiResult<crate::session::ChatMessage> {
  Ok(Json(send_chat(&state, &id, &body.text, None).await?))
}

// ---------- quiz & report ----------

#[instrument(level = "info", skip(state, body), fields(script_id = %body.script_id))]
pub async fn http_grade_quiz(
  State(state): State<Arc<AppState>>,
  Json(body): Json<QuizGradeIn>,
) -> ApiResult<crate::quiz::QuizResult> {
  Ok(Json(grade_script_quiz(&state, &body.script_id, &body.answers).await?))
}

#[instrument(level = "info", skip(state, headers, body), fields(session_id = %body.session_id))]
pub async fn http_report(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Json(body): Json<ReportIn>,
) -> ApiResult<ReportOut> {
  let user = user_id(&headers);
  Ok(Json(finish_with_report(&state, &body.session_id, body.score, body.total, user.as_deref()).await?))
}

// ---------- workshop ----------

#[instrument(level = "info", skip(state, body), fields(material_len = body.material.len()))]
pub async fn http_workshop_curriculum(
  State(state): State<Arc<AppState>>,
  Json(body): Json<CurriculumIn>,
) -> impl IntoResponse {
  Json(state.workshop.analyze_curriculum(&body.material, &body.instructions, &body.meta).await)
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_workshop_outline(State(state): State<Arc<AppState>>, Json(body): Json<OutlineIn>) -> impl IntoResponse {
  Json(state.workshop.generate_outline(&body.curriculum, &body.config).await)
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_workshop_roles(State(state): State<Arc<AppState>>, Json(body): Json<SchemeIn>) -> impl IntoResponse {
  Json(state.workshop.generate_roles(&body.curriculum, &body.scheme).await)
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_workshop_scenes(State(state): State<Arc<AppState>>, Json(body): Json<SchemeIn>) -> impl IntoResponse {
  Json(state.workshop.render_scenes(&body.curriculum, &body.scheme).await)
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_workshop_quiz(State(state): State<Arc<AppState>>, Json(body): Json<QuizGenIn>) -> impl IntoResponse {
  let quiz = state.workshop.generate_quiz(&body.curriculum, &body.scenes).await;
  Json(QuizDraft { quiz })
}

#[instrument(level = "info", skip(state, body), fields(kind = body.artifact.kind()))]
pub async fn http_workshop_refine(State(state): State<Arc<AppState>>, Json(body): Json<RefineIn>) -> Json<Artifact> {
  Json(state.workshop.refine(body.artifact, &body.instruction).await)
}

#[instrument(level = "info", skip(state, body), fields(prompt_len = body.prompt.len()))]
pub async fn http_workshop_image(State(state): State<Arc<AppState>>, Json(body): Json<ImageIn>) -> impl IntoResponse {
  let image_model = state.settings.read().await.image_model.clone();
  let image = state
    .workshop
    .generate_image(&body.prompt, body.style.as_deref(), body.resolution.as_deref(), &image_model)
    .await;
  Json(ImageOut { image })
}

#[instrument(level = "info", skip(body), fields(scenes = body.scenes.len(), quiz = body.quiz.len()))]
pub async fn http_workshop_assemble(Json(body): Json<AssembleIn>) -> Json<Script> {
  Json(assemble_script(&body.curriculum, &body.scheme, &body.scenes, body.quiz, body.duration))
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::HeaderValue;

  #[test]
  fn user_header_is_trimmed_and_optional() {
    let mut h = HeaderMap::new();
    assert_eq!(user_id(&h), None);
    h.insert(USER_HEADER, HeaderValue::from_static("  "));
    assert_eq!(user_id(&h), None);
    h.insert(USER_HEADER, HeaderValue::from_static(" alice "));
    assert_eq!(user_id(&h).as_deref(), Some("alice"));
  }

  #[test]
  fn app_errors_render_as_json_with_status() {
    let resp = AppError::Unavailable("database").into_response();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let resp = AppError::BadRequest("x".into()).into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }
}
