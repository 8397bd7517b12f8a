//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - starting, driving and ending game sessions
//!   - chat turns (reply now, insight later)
//!   - quiz grading and the end-of-game report, which also saves progress

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::error::AppError;
use crate::quiz::{grade_quiz, QuizAnswer, QuizResult};
use crate::session::{chat_turn, ChatMessage, GameSession, InsightNote, SessionEvent, SessionOutcome, SessionView};
use crate::state::AppState;
use crate::store::ProgressRecord;
use crate::protocol::ReportOut;

#[instrument(level = "info", skip(state))]
pub async fn start_session(state: &AppState, script_id: &str, role_id: &str) -> Result<SessionView, AppError> {
  let script = state.load_script(script_id).await?;
  let session = GameSession::new(&script, role_id)?;
  let view = session.view();
  state.sessions.insert(session).await;
  let live = state.sessions.len().await;
  info!(target: "session", session = %view.id, %script_id, %role_id, stage = view.stage.as_str(), live, "Session started");
  Ok(view)
}

pub async fn session_view(state: &AppState, session_id: &str) -> Result<SessionView, AppError> {
  let live = state.sessions.get(session_id).await?;
  let view = live.state.lock().await.view();
  Ok(view)
}

/// Apply one player action and return the outcome with the fresh view.
#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn session_event(
  state: &AppState,
  session_id: &str,
  event: SessionEvent,
) -> Result<(SessionOutcome, SessionView), AppError> {
  let live = state.sessions.get(session_id).await?;
  if live.token.is_cancelled() {
    return Err(crate::error::SessionError::Ended.into());
  }
  let mut s = live.state.lock().await;
  let outcome = s.apply(event)?;
  Ok((outcome, s.view()))
}

/// Companion reply for one chat message. The insight, if any, is appended to the
/// timeline later and also sent to `notify` when given.
#[instrument(level = "info", skip(state, text, notify), fields(%session_id, text_len = text.len()))]
pub async fn send_chat(
  state: &AppState,
  session_id: &str,
  text: &str,
  notify: Option<mpsc::UnboundedSender<InsightNote>>,
) -> Result<ChatMessage, AppError> {
  let text = text.trim();
  if text.is_empty() {
    return Err(AppError::BadRequest("empty chat message".into()));
  }
  let live = state.sessions.get(session_id).await?;
  let turn = chat_turn(live, &state.tutor, text, notify).await?;
  debug!(target: "session", %session_id, insight_pending = !turn.insight.is_finished(), "Companion replied");
  Ok(turn.reply)
}

pub async fn end_session(state: &AppState, session_id: &str) -> Result<Vec<String>, AppError> {
  Ok(state.sessions.end(session_id).await?)
}

#[instrument(level = "info", skip(state, answers), fields(%script_id, answered = answers.len()))]
pub async fn grade_script_quiz(
  state: &AppState,
  script_id: &str,
  answers: &HashMap<u32, QuizAnswer>,
) -> Result<QuizResult, AppError> {
  let script = state.load_script(script_id).await?;
  Ok(grade_quiz(&state.tutor, &script.quiz, answers).await)
}

/// Report for a finished session. The session is ended, and progress is saved when the
/// caller is signed in and a database is attached. A failed save is logged, not returned.
#[instrument(level = "info", skip(state), fields(%session_id, score, total))]
pub async fn finish_with_report(
  state: &AppState,
  session_id: &str,
  score: u32,
  total: u32,
  user: Option<&str>,
) -> Result<ReportOut, AppError> {
  let (title, script_id, points) = {
    let live = state.sessions.get(session_id).await?;
    let s = live.state.lock().await;
    (s.script_title.clone(), s.script_id.clone(), s.knowledge_points.clone())
  };
  let transcript = state.sessions.end(session_id).await?;
  let report = state.tutor.learning_report(&title, &points, &transcript, score, total).await;

  let mut saved = false;
  if let (Some(store), Some(user)) = (&state.store, user) {
    let record = ProgressRecord {
      script_id,
      quiz_score: score,
      transcript: transcript.clone(),
      ai_report: Some(report.clone()),
      completed_at: Utc::now(),
    };
    match store.save_progress(Some(user), &record).await {
      Ok(()) => saved = true,
      Err(e) => error!(target: "store", %session_id, error = %e, "Saving progress failed"),
    }
  }
  Ok(ReportOut { report, transcript, saved })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  use crate::error::SessionError;
  use crate::model::testing::ScriptedModel;
  use crate::seeds::{SHANG_YANG_ID, SILK_ROAD_ID};
  use crate::session::{SessionStage, SubmitOutcome};
  use crate::state::testing::state_with;
  use crate::tutor::REPORT_FALLBACK_REVIEW;

  #[tokio::test]
  async fn silk_road_playthrough_over_shared_logic() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new().with_text("先想想汉朝的都城在哪里？"));
    let state = state_with(model, dir.path());

    let view = start_session(&state, SILK_ROAD_ID, "r1").await.unwrap();
    assert_eq!(view.stage, SessionStage::Intro);
    let id = view.id;

    session_event(&state, &id, SessionEvent::AdvanceIntro).await.unwrap();
    let (_, view) = session_event(&state, &id, SessionEvent::AcceptRole).await.unwrap();
    assert_eq!(view.stage, SessionStage::Gameplay);

    let reply = send_chat(&state, &id, "起点是哪里？", None).await.unwrap();
    assert_eq!(reply.content, "先想想汉朝的都城在哪里？");

    let submit = SessionEvent::SubmitTask { task_id: "t1".into(), answer: Some("长安".into()) };
    let (outcome, view) = session_event(&state, &id, submit).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Submit(SubmitOutcome::Accepted { plot_playback: true, .. })));
    assert_eq!(view.found_clues.len(), 1);
    assert_eq!(view.stage, SessionStage::PlotPlayback);

    let transcript = end_session(&state, &id).await.unwrap();
    assert_eq!(transcript.len(), 3);
    assert!(matches!(
      session_view(&state, &id).await,
      Err(AppError::Session(SessionError::UnknownSession(_)))
    ));
  }

  #[tokio::test]
  async fn blank_chat_is_rejected_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new());
    let state = state_with(model.clone(), dir.path());
    let id = start_session(&state, SHANG_YANG_ID, "r_sy_1").await.unwrap().id;
    assert!(matches!(send_chat(&state, &id, "  ", None).await, Err(AppError::BadRequest(_))));
    assert_eq!(model.calls(), 0);
  }

  #[tokio::test]
  async fn unknown_role_is_a_session_error() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(Arc::new(ScriptedModel::new()), dir.path());
    let err = start_session(&state, SILK_ROAD_ID, "ghost").await.unwrap_err();
    assert_eq!(err.status_code(), 404);
  }

  #[tokio::test]
  async fn quiz_grades_against_the_bundled_key() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(Arc::new(ScriptedModel::new()), dir.path());
    let answers = HashMap::from([(1, QuizAnswer::Choice(1)), (2, QuizAnswer::Choice(0))]);
    let out = grade_script_quiz(&state, SHANG_YANG_ID, &answers).await.unwrap();
    assert_eq!((out.score, out.total), (1, 2));
  }

  #[tokio::test(start_paused = true)]
  async fn report_ends_the_session_and_skips_saving_without_a_database() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(Arc::new(ScriptedModel::new()), dir.path());
    let id = start_session(&state, SHANG_YANG_ID, "r_sy_2").await.unwrap().id;

    let out = finish_with_report(&state, &id, 1, 2, Some("alice")).await.unwrap();
    assert_eq!(out.report.plot_review, REPORT_FALLBACK_REVIEW);
    assert!(!out.saved);
    assert_eq!(state.sessions.len().await, 0);
  }
}
