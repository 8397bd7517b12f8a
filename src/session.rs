//! Game session controller.
//!
//! A `GameSession` is the whole state of one playthrough. Player actions go through
//! `apply`, which either returns an outcome after mutating or an error without touching
//! anything. Chat turns are async and live in `chat_turn`: they snapshot what the model
//! needs, release the lock for the call, and re-check cancellation before writing back.
//!
//! Stages: Intro → RoleReview → Gameplay ⇄ PlotPlayback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Clue, PlotSlide, Role, Script, Task, TaskCategory, TaskType};
use crate::error::SessionError;
use crate::tutor::{ChatTurn, Tutor, COMPANION_NAME};
use crate::util::clock_hhmm;

pub const LOG_SENDER: &str = "探险日志";
pub const REJECT_HINT: &str = "吱！好像不对劲，咱们再翻翻手头的线索？";
/// Earlier messages handed to the companion with each chat turn.
pub const CHAT_HISTORY_WINDOW: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Intro,
    RoleReview,
    Gameplay,
    PlotPlayback,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStage::Intro => "intro",
            SessionStage::RoleReview => "role_review",
            SessionStage::Gameplay => "gameplay",
            SessionStage::PlotPlayback => "plot_playback",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Ai,
    System,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Plot,
    Task,
    Clue,
    Insight,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub id: String,
    /// Wall clock, `HH:MM`.
    pub time: String,
    #[serde(rename = "type")]
    pub kind: TimelineKind,
    pub title: String,
    pub description: String,
}

/// Cut-scene shown after a plot-advancing task.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlotOverlay {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    AdvanceIntro,
    AcceptRole,
    SubmitTask { task_id: String, answer: Option<String> },
    DismissPlayback,
    OpenClue { clue_id: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted {
        #[serde(rename = "revealedClues")]
        revealed_clues: Vec<String>,
        #[serde(rename = "plotPlayback")]
        plot_playback: bool,
    },
    Rejected { hint: String },
    AlreadyCompleted,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum SessionOutcome {
    Stage(SessionStage),
    Submit(SubmitOutcome),
    ClueOpened(Clue),
}

/// What a chat turn needs from the session, captured under the lock.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatSnapshot {
    pub context: String,
    pub history: Vec<ChatTurn>,
    pub user_text: String,
}

#[derive(Clone, Debug)]
pub struct GameSession {
    pub id: String,
    pub script_id: String,
    pub script_title: String,
    pub knowledge_points: Vec<String>,
    pub role: Role,
    intro_slides: Vec<PlotSlide>,
    intro_cursor: usize,
    stage: SessionStage,
    tasks: Vec<Task>,
    clues: Vec<Clue>,
    messages: Vec<ChatMessage>,
    timeline: Vec<TimelineEntry>,
    initial_scenario: String,
    current_plot: String,
    plot_history: Vec<String>,
    overlay: Option<PlotOverlay>,
    seq: u64,
}

impl GameSession {
    pub fn new(script: &Script, role_id: &str) -> Result<Self, SessionError> {
        let role = script
            .role(role_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownRole(role_id.to_string()))?;
        let stage = if script.intro_slides.is_empty() { SessionStage::RoleReview } else { SessionStage::Intro };
        let clues = script
            .playable_clues()
            .into_iter()
            .map(|c| Clue { is_new: false, ..c })
            .collect();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            script_id: script.id.clone(),
            script_title: script.title.clone(),
            knowledge_points: script.curriculum.knowledge_points.clone(),
            role,
            intro_slides: script.intro_slides.clone(),
            intro_cursor: 0,
            stage,
            tasks: script.playable_tasks(),
            clues,
            messages: Vec::new(),
            timeline: Vec::new(),
            initial_scenario: script.initial_scenario.clone(),
            current_plot: script.initial_scenario.clone(),
            plot_history: vec![script.initial_scenario.clone()],
            overlay: None,
            seq: 0,
        })
    }

    pub fn stage(&self) -> SessionStage { self.stage }
    pub fn tasks(&self) -> &[Task] { &self.tasks }
    pub fn clues(&self) -> &[Clue] { &self.clues }
    pub fn messages(&self) -> &[ChatMessage] { &self.messages }
    pub fn timeline(&self) -> &[TimelineEntry] { &self.timeline }
    pub fn plot_history(&self) -> &[String] { &self.plot_history }
    pub fn overlay(&self) -> Option<&PlotOverlay> { self.overlay.as_ref() }
    pub fn intro_cursor(&self) -> usize { self.intro_cursor }

    pub fn current_slide(&self) -> Option<&PlotSlide> {
        (self.stage == SessionStage::Intro).then(|| self.intro_slides.get(self.intro_cursor)).flatten()
    }

    pub fn plot_context(&self) -> &str {
        &self.current_plot
    }

    pub fn active_main_task(&self) -> Option<&Task> {
        self.tasks().iter().find(|t| t.category == TaskCategory::Main && !t.is_completed)
    }

    pub fn personal_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.category == TaskCategory::Personal && t.assignee_id.as_deref() == Some(self.role.id.as_str()))
            .collect()
    }

    pub fn all_main_completed(&self) -> bool {
        self.tasks.iter().filter(|t| t.category == TaskCategory::Main).all(|t| t.is_completed)
    }

    /// Last `n` messages in the shape the companion prompt expects.
    pub fn chat_history(&self, n: usize) -> Vec<ChatTurn> {
        let start = self.messages.len().saturating_sub(n);
        self.messages[start..]
            .iter()
            .map(|m| ChatTurn { from_player: m.sender == Sender::User, text: format!("[{}]: {}", m.sender_name, m.content) })
            .collect()
    }

    /// Whole chat as `[name]: content` lines, carried to the report.
    pub fn transcript(&self) -> Vec<String> {
        self.messages.iter().map(|m| format!("[{}]: {}", m.sender_name, m.content)).collect()
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{}-{}", prefix, self.seq)
    }

    fn log(&mut self, kind: TimelineKind, title: &str, description: &str) -> TimelineEntry {
        let entry = TimelineEntry {
            id: self.next_id("tl"),
            time: clock_hhmm(),
            kind,
            title: title.to_string(),
            description: description.to_string(),
        };
        self.timeline.push(entry.clone());
        entry
    }

    fn push_message(&mut self, sender: Sender, sender_name: &str, content: &str) -> ChatMessage {
        let msg = ChatMessage {
            id: self.next_id("msg"),
            sender,
            sender_name: sender_name.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        self.messages.push(msg.clone());
        msg
    }

    fn expect_stage(&self, expected: SessionStage) -> Result<(), SessionError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(SessionError::WrongStage { expected: expected.as_str(), actual: self.stage.as_str() })
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionOutcome, SessionError> {
        match event {
            SessionEvent::AdvanceIntro => {
                self.expect_stage(SessionStage::Intro)?;
                self.intro_cursor += 1;
                if self.intro_cursor >= self.intro_slides.len() {
                    self.stage = SessionStage::RoleReview;
                }
                Ok(SessionOutcome::Stage(self.stage))
            }
            SessionEvent::AcceptRole => {
                self.expect_stage(SessionStage::RoleReview)?;
                self.stage = SessionStage::Gameplay;
                if self.messages.is_empty() {
                    let opening = self.initial_scenario.clone();
                    self.push_message(Sender::System, LOG_SENDER, &opening);
                    self.log(TimelineKind::Plot, "新的开始", &opening);
                }
                Ok(SessionOutcome::Stage(self.stage))
            }
            SessionEvent::SubmitTask { task_id, answer } => {
                self.expect_stage(SessionStage::Gameplay)?;
                self.submit_task(&task_id, answer.as_deref()).map(SessionOutcome::Submit)
            }
            SessionEvent::DismissPlayback => {
                self.expect_stage(SessionStage::PlotPlayback)?;
                self.overlay = None;
                self.stage = SessionStage::Gameplay;
                Ok(SessionOutcome::Stage(self.stage))
            }
            SessionEvent::OpenClue { clue_id } => {
                let clue = self
                    .clues
                    .iter_mut()
                    .find(|c| c.id == clue_id)
                    .ok_or(SessionError::UnknownClue(clue_id))?;
                clue.is_new = false;
                Ok(SessionOutcome::ClueOpened(clue.clone()))
            }
        }
    }

    fn submit_task(&mut self, task_id: &str, answer: Option<&str>) -> Result<SubmitOutcome, SessionError> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| SessionError::UnknownTask(task_id.to_string()))?;
        if self.tasks[idx].is_completed {
            return Ok(SubmitOutcome::AlreadyCompleted);
        }
        if !answer_satisfies(&self.tasks[idx], answer) {
            debug!(target: "session", session = %self.id, %task_id, "Task answer rejected");
            return Ok(SubmitOutcome::Rejected { hint: REJECT_HINT.into() });
        }

        self.tasks[idx].is_completed = true;
        let task = self.tasks[idx].clone();
        self.log(TimelineKind::Task, "解决难题", &format!("成功：{}", task.title));

        let mut revealed = Vec::new();
        for clue_id in task.reward_clue_ids() {
            let Some(pos) = self.clues.iter().position(|c| c.id == clue_id) else {
                warn!(target: "session", session = %self.id, %task_id, %clue_id, "Reward clue not in script; ignoring");
                continue;
            };
            if self.clues[pos].is_found {
                continue;
            }
            self.clues[pos].is_found = true;
            self.clues[pos].is_new = true;
            let title = self.clues[pos].title.clone();
            self.log(TimelineKind::Clue, "获得线索", &title);
            revealed.push(clue_id);
        }

        let plot_playback = task.has_plot_update();
        if plot_playback {
            self.overlay = Some(PlotOverlay { text: task.plot_update.clone().unwrap_or_default(), video: task.video.clone() });
            self.stage = SessionStage::PlotPlayback;
            // An empty update still plays the overlay but leaves the story where it was.
            if let Some(text) = task.plot_update.as_ref().filter(|t| !t.is_empty()) {
                self.current_plot = text.clone();
                self.plot_history.push(text.clone());
            }
        }
        info!(target: "session", session = %self.id, %task_id, revealed = revealed.len(), plot_playback, "Task completed");
        Ok(SubmitOutcome::Accepted { revealed_clues: revealed, plot_playback })
    }

    /// Capture the companion context, then append the player's message.
    pub fn begin_chat_turn(&mut self, text: &str) -> Result<ChatSnapshot, SessionError> {
        if !matches!(self.stage, SessionStage::Gameplay | SessionStage::PlotPlayback) {
            return Err(SessionError::WrongStage { expected: SessionStage::Gameplay.as_str(), actual: self.stage.as_str() });
        }
        let snapshot = ChatSnapshot {
            context: format!("当前探险场景: {}. 你的身份: {}. 当前扮演队友: {}.", self.current_plot, COMPANION_NAME, self.role.name),
            history: self.chat_history(CHAT_HISTORY_WINDOW),
            user_text: text.to_string(),
        };
        let name = self.role.name.clone();
        self.push_message(Sender::User, &name, text);
        Ok(snapshot)
    }

    pub fn push_companion_reply(&mut self, text: &str) -> ChatMessage {
        self.push_message(Sender::Ai, COMPANION_NAME, text)
    }

    pub fn record_insight(&mut self, text: &str) -> TimelineEntry {
        self.log(TimelineKind::Insight, "思路火花", text)
    }

    /// Client-facing snapshot. Correct answers stay on the server.
    pub fn view(&self) -> SessionView {
        let hide = |t: &Task| Task { correct_answer: None, ..t.clone() };
        SessionView {
            id: self.id.clone(),
            script_id: self.script_id.clone(),
            script_title: self.script_title.clone(),
            stage: self.stage(),
            intro_index: self.intro_cursor(),
            intro_slide: self.current_slide().cloned(),
            role: self.role.clone(),
            current_plot: self.plot_context().to_string(),
            plot_history: self.plot_history().to_vec(),
            overlay: self.overlay().cloned(),
            active_main_task: self.active_main_task().map(hide),
            personal_tasks: self.personal_tasks().into_iter().map(hide).collect(),
            found_clues: self.clues().iter().filter(|c| c.is_found).cloned().collect(),
            messages: self.messages().to_vec(),
            timeline: self.timeline().to_vec(),
            all_main_completed: self.all_main_completed(),
        }
    }
}

/// Non-discussion tasks with a non-empty answer key need an exact or containing match.
fn answer_satisfies(task: &Task, answer: Option<&str>) -> bool {
    if task.kind == TaskType::Discussion {
        return true;
    }
    match task.correct_answer.as_deref().filter(|c| !c.is_empty()) {
        None => true,
        Some(expected) => answer.is_some_and(|a| a == expected || a.contains(expected)),
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub script_id: String,
    pub script_title: String,
    pub stage: SessionStage,
    pub intro_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intro_slide: Option<PlotSlide>,
    pub role: Role,
    pub current_plot: String,
    pub plot_history: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<PlotOverlay>,
    pub active_main_task: Option<Task>,
    pub personal_tasks: Vec<Task>,
    pub found_clues: Vec<Clue>,
    pub messages: Vec<ChatMessage>,
    pub timeline: Vec<TimelineEntry>,
    pub all_main_completed: bool,
}

// ---------- Live sessions ----------

/// A running session plus the token that stops its pending model calls.
pub struct LiveSession {
    pub state: Mutex<GameSession>,
    pub token: CancellationToken,
    last_active: Mutex<Instant>,
}

impl LiveSession {
    pub fn new(session: GameSession) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(session),
            token: CancellationToken::new(),
            last_active: Mutex::new(Instant::now()),
        })
    }

    pub async fn touch(&self) {
        *self.last_active.lock().await = Instant::now();
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_active.lock().await.elapsed()
    }
}

/// How long an untouched session lives, and how often the sweeper looks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdlePolicy {
    pub ttl: Duration,
    pub sweep_every: Duration,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(2 * 60 * 60), sweep_every: Duration::from_secs(60) }
    }
}

/// Timeline entry produced by a detached insight task.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightNote {
    pub session_id: String,
    pub entry: TimelineEntry,
}

#[derive(Default)]
pub struct SessionRegistry {
    live: RwLock<HashMap<String, Arc<LiveSession>>>,
    idle: IdlePolicy,
}

impl SessionRegistry {
    pub fn new(idle: IdlePolicy) -> Self {
        Self { live: RwLock::default(), idle }
    }

    pub async fn insert(&self, session: GameSession) -> Arc<LiveSession> {
        let id = session.id.clone();
        let live = LiveSession::new(session);
        self.live.write().await.insert(id, live.clone());
        live
    }

    /// Looking a session up counts as activity.
    pub async fn get(&self, id: &str) -> Result<Arc<LiveSession>, SessionError> {
        let live = self.live.read().await.get(id).cloned().ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        live.touch().await;
        Ok(live)
    }

    /// Remove the session, cancel whatever it still has in flight, and hand back the transcript.
    #[instrument(level = "info", skip(self))]
    pub async fn end(&self, id: &str) -> Result<Vec<String>, SessionError> {
        let live = self.live.write().await.remove(id).ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        live.token.cancel();
        let transcript = live.state.lock().await.transcript();
        info!(target: "session", session = %id, lines = transcript.len(), "Session ended");
        Ok(transcript)
    }

    pub async fn len(&self) -> usize {
        self.live.read().await.len()
    }

    /// End every session untouched for longer than the idle TTL. Returns their ids.
    pub async fn end_idle(&self) -> Vec<String> {
        let snapshot: Vec<(String, Arc<LiveSession>)> =
            self.live.read().await.iter().map(|(id, live)| (id.clone(), live.clone())).collect();
        let mut ended = Vec::new();
        for (id, live) in snapshot {
            if live.idle_for().await <= self.idle.ttl {
                continue;
            }
            // Someone else may have ended it since the snapshot.
            if self.end(&id).await.is_ok() {
                ended.push(id);
            }
        }
        if !ended.is_empty() {
            info!(target: "session", ended = ended.len(), ttl_secs = self.idle.ttl.as_secs(), "Idle sessions ended");
        }
        ended
    }

    /// Runs until the task is dropped.
    pub async fn sweep_idle(&self) {
        let mut tick = tokio::time::interval(self.idle.sweep_every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            self.end_idle().await;
        }
    }
}

/// Reply to the player plus the detached insight task (fire-and-forget for callers).
pub struct ChatTurnResult {
    pub reply: ChatMessage,
    pub insight: JoinHandle<()>,
}

/// One chat turn: snapshot under the lock, call the companion unlocked, write back if
/// the session is still alive, then spawn insight extraction on the `(user, reply)` pair.
/// The insight may land before or after the caller sees the reply.
#[instrument(level = "info", skip(live, tutor, text, notify), fields(text_len = text.len()))]
pub async fn chat_turn(
    live: Arc<LiveSession>,
    tutor: &Tutor,
    text: &str,
    notify: Option<mpsc::UnboundedSender<InsightNote>>,
) -> Result<ChatTurnResult, SessionError> {
    if live.token.is_cancelled() {
        return Err(SessionError::Ended);
    }
    let (session_id, snapshot) = {
        let mut s = live.state.lock().await;
        let snap = s.begin_chat_turn(text)?;
        (s.id.clone(), snap)
    };

    let reply_text = tokio::select! {
        _ = live.token.cancelled() => {
            debug!(target: "session", session = %session_id, "Chat call cancelled");
            return Err(SessionError::Ended);
        }
        reply = tutor.game_master_reply(&snapshot.context, &snapshot.user_text, &snapshot.history) => reply,
    };

    let reply = {
        let mut s = live.state.lock().await;
        if live.token.is_cancelled() {
            return Err(SessionError::Ended);
        }
        s.push_companion_reply(&reply_text)
    };

    let insight = {
        let live = live.clone();
        let tutor = tutor.clone();
        let user_text = snapshot.user_text;
        tokio::spawn(async move {
            let highlight = tokio::select! {
                _ = live.token.cancelled() => return,
                h = tutor.discussion_highlight(&user_text, &reply_text) => h,
            };
            let Some(highlight) = highlight else { return };
            let entry = {
                let mut s = live.state.lock().await;
                if live.token.is_cancelled() {
                    return;
                }
                s.record_insight(&highlight)
            };
            if let Some(tx) = notify {
                let _ = tx.send(InsightNote { session_id, entry });
            }
        })
    };

    Ok(ChatTurnResult { reply, insight })
}
