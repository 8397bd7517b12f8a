//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic; the reply is a single JSON message. Insight notes from
//! chat turns on this connection are pushed as separate `insight` messages whenever
//! they resolve.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::logic::*;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::session::{InsightNote, SessionEvent};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "edurealm", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> Result<(), axum::Error> {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  socket.send(Message::Text(out)).await
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "edurealm", "WebSocket connected");
  let (insight_tx, mut insight_rx) = mpsc::unbounded_channel::<InsightNote>();

  loop {
    tokio::select! {
      incoming = socket.recv() => {
        let Some(Ok(msg)) = incoming else { break };
        match msg {
          Message::Text(txt) => {
            let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
              Ok(incoming) => {
                debug!(target: "edurealm", "WS received: {:?}", &incoming);
                handle_client_ws(incoming, &state, &insight_tx).await
              }
              Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
            };
            if let Err(e) = send(&mut socket, &reply).await {
              error!(target: "edurealm", error = %e, "WS send error");
              break;
            }
          }
          Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
          Message::Close(_) => break,
          _ => {}
        }
      }
      Some(note) = insight_rx.recv() => {
        let msg = ServerWsMessage::Insight { session_id: note.session_id, entry: note.entry };
        if let Err(e) = send(&mut socket, &msg).await {
          error!(target: "edurealm", error = %e, "WS send error");
          break;
        }
      }
    }
  }
  info!(target: "edurealm", "WebSocket disconnected");
}

fn error_msg(e: impl std::fmt::Display) -> ServerWsMessage {
  ServerWsMessage::Error { message: e.to_string() }
}

async fn event(state: &AppState, session_id: &str, ev: SessionEvent) -> ServerWsMessage {
  match session_event(state, session_id, ev).await {
    Ok((outcome, session)) => ServerWsMessage::Outcome { outcome, session },
    Err(e) => error_msg(e),
  }
}

#[instrument(level = "info", skip(state, insight_tx))]
async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &AppState,
  insight_tx: &mpsc::UnboundedSender<InsightNote>,
) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::StartSession { script_id, role_id } => match start_session(state, &script_id, &role_id).await {
      Ok(session) => ServerWsMessage::Session { session },
      Err(e) => error_msg(e),
    },

    ClientWsMessage::GetSession { session_id } => match session_view(state, &session_id).await {
      Ok(session) => ServerWsMessage::Session { session },
      Err(e) => error_msg(e),
    },

    ClientWsMessage::AdvanceIntro { session_id } => event(state, &session_id, SessionEvent::AdvanceIntro).await,
    ClientWsMessage::AcceptRole { session_id } => event(state, &session_id, SessionEvent::AcceptRole).await,
    ClientWsMessage::DismissPlayback { session_id } => event(state, &session_id, SessionEvent::DismissPlayback).await,
    ClientWsMessage::SubmitTask { session_id, task_id, answer } => {
      event(state, &session_id, SessionEvent::SubmitTask { task_id, answer }).await
    }
    ClientWsMessage::OpenClue { session_id, clue_id } => {
      event(state, &session_id, SessionEvent::OpenClue { clue_id }).await
    }

    ClientWsMessage::Chat { session_id, text } => {
      match send_chat(state, &session_id, &text, Some(insight_tx.clone())).await {
        Ok(message) => ServerWsMessage::ChatReply { session_id, message },
        Err(e) => error_msg(e),
      }
    }

    ClientWsMessage::EndSession { session_id } => match end_session(state, &session_id).await {
      Ok(transcript) => ServerWsMessage::Ended { session_id, transcript },
      Err(e) => error_msg(e),
    },
  }
}
