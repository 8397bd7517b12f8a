//! In-game model calls: the game-master companion ("学伴球球"), discussion highlights,
//! short-answer grading and the end-of-game learning report.
//!
//! None of these return errors to the caller. Chat answers with an in-character apology,
//! highlights are simply skipped, grading and the report fall back to fixed content.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::domain::{Abilities, KnowledgeMark, KnowledgeStatus, LearningReport, QuizQuestion};
use crate::error::AiError;
use crate::model::{ask_json, ask_text, GenerateRequest, GenerativeModel};
use crate::retry::RetryPolicies;

pub const COMPANION_NAME: &str = "学伴球球";
pub const QUOTA_APOLOGY: &str = "吱吱... 额度好像用完啦，请稍微等一分钟或者在侧边设置里换个模型再试。吱！";
pub const EMPTY_REPLY: &str = "吱！咱们继续加油呀！";
pub const UNANSWERED: &str = "未作答。";
pub const GRADING_UNAVAILABLE: &str = "阅卷服务暂时不可用，请稍后。";
pub const REPORT_FALLBACK_REVIEW: &str = "今天的历险很精彩！由于配置波动，报告部分内容为预设方案。";
pub const REPORT_FALLBACK_SUGGESTION: &str = "继续保持这种状态，请确保 API 配置正确以解锁全量分析。";

const COMPANION_SYSTEM: &str = "你现在的身份是“学伴球球”（Qiuqiu）。\n核心原则：启发式引导，减少剧情描述，语气友好好奇。";
const HIGHLIGHT_SYSTEM: &str = "总结学生的思考亮点，15字以内。";
const GRADER_SYSTEM: &str = "你是一个公正的阅卷老师。请用中文评估学生的回答是否正确，并给出简洁的鼓励或建议。输出格式必须为 JSON。";
const REPORT_SYSTEM: &str = "你是历史课堂的学习分析师。根据剧本、知识点、对话记录和测验得分生成学习报告，能力值为 0-100 的整数。";

/// Transcript lines sent with a report request are capped to the most recent ones.
const REPORT_TRANSCRIPT_LINES: usize = 40;

/// One earlier chat line as the companion sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatTurn {
  pub from_player: bool,
  /// Already formatted as `[senderName]: content`.
  pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortAnswerFeedback {
  pub is_correct: bool,
  pub feedback: String,
}

#[derive(Clone)]
pub struct Tutor {
  model: Arc<dyn GenerativeModel>,
  policies: RetryPolicies,
}

impl Tutor {
  pub fn new(model: Arc<dyn GenerativeModel>, policies: RetryPolicies) -> Self {
    Self { model, policies }
  }

  /// Companion reply for one chat turn.
  #[instrument(level = "info", skip_all, fields(context_len = context.len(), message_len = user_message.len(), history = history.len()))]
  pub async fn game_master_reply(&self, context: &str, user_message: &str, history: &[ChatTurn]) -> String {
    let req = GenerateRequest::text(game_master_prompt(context, user_message, history))
      .system(COMPANION_SYSTEM)
      .temperature(0.7);
    match ask_text(self.model.as_ref(), self.policies.chat, "game_master_reply", req).await {
      Ok(Some(text)) => text,
      Ok(None) => EMPTY_REPLY.to_string(),
      Err(AiError::MissingCredential) => {
        warn!(target: "session", "Chat attempted without an API key");
        AiError::MissingCredential.to_string()
      }
      Err(e) => {
        error!(target: "session", error = %e, "Companion reply failed; sending apology");
        QUOTA_APOLOGY.to_string()
      }
    }
  }

  /// Short "spark of insight" for the timeline. Best effort.
  #[instrument(level = "debug", skip_all)]
  pub async fn discussion_highlight(&self, user_message: &str, reply: &str) -> Option<String> {
    let prompt = format!("分析对话并总结逻辑火花：\n用户: {}\nAI: {}", user_message, reply);
    let req = GenerateRequest::text(prompt).system(HIGHLIGHT_SYSTEM).temperature(0.3);
    match ask_text(self.model.as_ref(), self.policies.insight, "discussion_highlight", req).await {
      Ok(text) => text,
      Err(e) => {
        warn!(target: "session", error = %e, "Highlight extraction failed; skipping");
        None
      }
    }
  }

  #[instrument(level = "info", skip_all, fields(question_id = question.id, answer_len = answer.len()))]
  pub async fn grade_short_answer(&self, question: &QuizQuestion, answer: &str) -> ShortAnswerFeedback {
    let answer = answer.trim();
    if answer.is_empty() {
      return ShortAnswerFeedback { is_correct: false, feedback: UNANSWERED.into() };
    }
    let prompt = format!(
      "问题: {}\n背景材料: {}\n学生回答: {}\n评分要点: {}",
      question.question,
      question.material.as_deref().filter(|m| !m.is_empty()).unwrap_or("无"),
      answer,
      question.explanation
    );
    let req = GenerateRequest::text(prompt).system(GRADER_SYSTEM).json(Some(feedback_schema()));
    match ask_json::<ShortAnswerFeedback>(self.model.as_ref(), self.policies.grading, "grade_short_answer", req).await {
      Ok(fb) => fb,
      Err(e) => {
        error!(target: "session", question_id = question.id, error = %e, "Short-answer grading failed");
        ShortAnswerFeedback { is_correct: false, feedback: GRADING_UNAVAILABLE.into() }
      }
    }
  }

  #[instrument(level = "info", skip(self, knowledge_points, transcript), fields(points = knowledge_points.len(), lines = transcript.len()))]
  pub async fn learning_report(
    &self,
    title: &str,
    knowledge_points: &[String],
    transcript: &[String],
    score: u32,
    total: u32,
  ) -> LearningReport {
    let recent = &transcript[transcript.len().saturating_sub(REPORT_TRANSCRIPT_LINES)..];
    let prompt = format!(
      "生成{}的报告。得分: {}/{}\n知识点: {}\n对话记录:\n{}",
      title,
      score,
      total,
      knowledge_points.join("、"),
      recent.join("\n")
    );
    let req = GenerateRequest::text(prompt).system(REPORT_SYSTEM).json(Some(report_schema()));
    match ask_json::<LearningReport>(self.model.as_ref(), self.policies.report, "learning_report", req).await {
      Ok(report) => {
        info!(target: "session", %title, score, total, "Learning report generated");
        report
      }
      Err(e) => {
        error!(target: "session", %title, error = %e, "Report generation failed; using preset report");
        fallback_report(knowledge_points)
      }
    }
  }
}

/// `场景: …` line, one line per history turn, then the new message and an open reply slot.
pub fn game_master_prompt(context: &str, user_message: &str, history: &[ChatTurn]) -> String {
  let mut prompt = format!("场景: {}\n", context);
  for turn in history {
    let who = if turn.from_player { "队友" } else { "球球" };
    prompt.push_str(&format!("{}: {}\n", who, turn.text));
  }
  prompt.push_str(&format!("队友: {}\n回复：", user_message));
  prompt
}

pub fn fallback_report(knowledge_points: &[String]) -> LearningReport {
  LearningReport {
    plot_review: REPORT_FALLBACK_REVIEW.into(),
    teacher_suggestion: REPORT_FALLBACK_SUGGESTION.into(),
    knowledge_map: knowledge_points
      .iter()
      .map(|p| KnowledgeMark { point: p.clone(), status: KnowledgeStatus::Mastered })
      .collect(),
    abilities: Abilities::default(),
  }
}

fn feedback_schema() -> Value {
  json!({
    "type": "OBJECT",
    "properties": {
      "isCorrect": { "type": "BOOLEAN" },
      "feedback": { "type": "STRING" }
    },
    "required": ["isCorrect", "feedback"]
  })
}

fn report_schema() -> Value {
  json!({
    "type": "OBJECT",
    "properties": {
      "plotReview": { "type": "STRING" },
      "teacherSuggestion": { "type": "STRING" },
      "knowledgeMap": {
        "type": "ARRAY",
        "items": {
          "type": "OBJECT",
          "properties": {
            "point": { "type": "STRING" },
            "status": { "type": "STRING", "enum": ["mastered", "weak"] }
          },
          "required": ["point", "status"]
        }
      },
      "abilities": {
        "type": "OBJECT",
        "properties": {
          "history": { "type": "INTEGER" },
          "logic": { "type": "INTEGER" },
          "collaboration": { "type": "INTEGER" },
          "spaceTime": { "type": "INTEGER" },
          "values": { "type": "INTEGER" }
        }
      }
    }
  })
}
