//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Domain types are sent as-is; only request envelopes and small replies live here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    Artifact, CurriculumInfo, DesignScheme, LearningReport, QuizQuestion, ScriptScene,
};
use crate::quiz::QuizAnswer;
use crate::session::{ChatMessage, SessionOutcome, SessionView, TimelineEntry};
use crate::workshop::{CurriculumMeta, OutlineConfig};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    StartSession {
        #[serde(rename = "scriptId")]
        script_id: String,
        #[serde(rename = "roleId")]
        role_id: String,
    },
    GetSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    AdvanceIntro {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    AcceptRole {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    SubmitTask {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(default)]
        answer: Option<String>,
    },
    DismissPlayback {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    OpenClue {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "clueId")]
        clue_id: String,
    },
    Chat {
        #[serde(rename = "sessionId")]
        session_id: String,
        text: String,
    },
    EndSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session {
        session: SessionView,
    },
    Outcome {
        outcome: SessionOutcome,
        session: SessionView,
    },
    ChatReply {
        #[serde(rename = "sessionId")]
        session_id: String,
        message: ChatMessage,
    },
    /// Arrives on its own, before or after the matching `chat_reply`.
    Insight {
        #[serde(rename = "sessionId")]
        session_id: String,
        entry: TimelineEntry,
    },
    Ended {
        #[serde(rename = "sessionId")]
        session_id: String,
        transcript: Vec<String>,
    },
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    /// `None` when no database is attached.
    pub database: Option<bool>,
    #[serde(rename = "modelConfigured")]
    pub model_configured: bool,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}

#[derive(Serialize)]
pub struct PublishOut {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionIn {
    pub script_id: String,
    pub role_id: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct SubmitTaskIn {
    #[serde(default)]
    pub answer: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatIn {
    pub text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeOut {
    pub outcome: SessionOutcome,
    pub session: SessionView,
}

#[derive(Serialize)]
pub struct EndOut {
    pub transcript: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizGradeIn {
    pub script_id: String,
    /// Keyed by question id.
    #[serde(default)]
    pub answers: HashMap<u32, QuizAnswer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportIn {
    pub session_id: String,
    pub score: u32,
    pub total: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOut {
    pub report: LearningReport,
    pub transcript: Vec<String>,
    /// Whether a progress row was written for the caller.
    pub saved: bool,
}

// Workshop

#[derive(Deserialize)]
pub struct CurriculumIn {
    pub material: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub meta: CurriculumMeta,
}

#[derive(Deserialize)]
pub struct OutlineIn {
    pub curriculum: CurriculumInfo,
    pub config: OutlineConfig,
}

#[derive(Deserialize)]
pub struct SchemeIn {
    pub curriculum: CurriculumInfo,
    pub scheme: DesignScheme,
}

#[derive(Deserialize)]
pub struct QuizGenIn {
    pub curriculum: CurriculumInfo,
    #[serde(default)]
    pub scenes: Vec<ScriptScene>,
}

#[derive(Deserialize)]
pub struct RefineIn {
    pub artifact: Artifact,
    pub instruction: String,
}

#[derive(Deserialize)]
pub struct ImageIn {
    pub prompt: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

#[derive(Serialize)]
pub struct ImageOut {
    /// `data:` URL, or null when generation failed.
    pub image: Option<String>,
}

#[derive(Deserialize)]
pub struct AssembleIn {
    pub curriculum: CurriculumInfo,
    pub scheme: DesignScheme,
    #[serde(default)]
    pub scenes: Vec<ScriptScene>,
    #[serde(default)]
    pub quiz: Vec<QuizQuestion>,
    pub duration: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_camel_case_ids() {
        let m: ClientWsMessage =
            serde_json::from_str(r#"{"type":"submit_task","sessionId":"s1","taskId":"t1","answer":"长安"}"#).unwrap();
        match m {
            ClientWsMessage::SubmitTask { session_id, task_id, answer } => {
                assert_eq!((session_id.as_str(), task_id.as_str()), ("s1", "t1"));
                assert_eq!(answer.as_deref(), Some("长安"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let m: ClientWsMessage = serde_json::from_str(r#"{"type":"submit_task","sessionId":"s1","taskId":"t1"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::SubmitTask { answer: None, .. }));
    }

    #[test]
    fn server_errors_are_tagged() {
        let v = serde_json::to_value(ServerWsMessage::Error { message: "boom".into() }).unwrap();
        assert_eq!(v, serde_json::json!({"type": "error", "message": "boom"}));
    }
}
