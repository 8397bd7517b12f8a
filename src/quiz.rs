//! End-of-game quiz grading.
//!
//! Choice-like questions are checked locally against the stored option index.
//! Short-answer questions go to the grader model one at a time, in question order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::domain::{QuestionType, QuizQuestion};
use crate::tutor::{ShortAnswerFeedback, Tutor};

/// A submitted answer: an option index or free text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuizAnswer {
  Choice(u32),
  Text(String),
}

impl QuizAnswer {
  fn as_choice(&self) -> Option<u32> {
    match self {
      QuizAnswer::Choice(i) => Some(*i),
      QuizAnswer::Text(s) => s.trim().parse().ok(),
    }
  }

  fn as_text(&self) -> String {
    match self {
      QuizAnswer::Choice(i) => i.to_string(),
      QuizAnswer::Text(s) => s.clone(),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
  pub question_id: u32,
  pub is_correct: bool,
  /// Grader feedback for short answers, the stored explanation otherwise.
  pub feedback: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
  pub score: u32,
  pub total: u32,
  pub results: Vec<QuestionResult>,
}

#[instrument(level = "info", skip_all, fields(questions = questions.len(), answered = answers.len()))]
pub async fn grade_quiz(tutor: &Tutor, questions: &[QuizQuestion], answers: &HashMap<u32, QuizAnswer>) -> QuizResult {
  let mut results = Vec::with_capacity(questions.len());

  for q in questions {
    let answer = answers.get(&q.id);
    let result = if q.kind == QuestionType::Short {
      let text = answer.map(QuizAnswer::as_text).unwrap_or_default();
      let ShortAnswerFeedback { is_correct, feedback } = tutor.grade_short_answer(q, &text).await;
      QuestionResult { question_id: q.id, is_correct, feedback }
    } else {
      let chosen = answer.and_then(QuizAnswer::as_choice);
      let is_correct = chosen.is_some() && chosen == q.correct_answer;
      QuestionResult { question_id: q.id, is_correct, feedback: q.explanation.clone() }
    };
    results.push(result);
  }

  let score = results.iter().filter(|r| r.is_correct).count() as u32;
  let total = questions.len() as u32;
  info!(target: "session", score, total, "Quiz graded");
  QuizResult { score, total, results }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  use crate::model::testing::ScriptedModel;
  use crate::retry::RetryPolicies;
  use crate::tutor::UNANSWERED;

  fn choice(id: u32, correct: u32) -> QuizQuestion {
    QuizQuestion {
      id,
      kind: QuestionType::Choice,
      question: format!("q{}", id),
      options: Some(vec!["甲".into(), "乙".into(), "丙".into(), "丁".into()]),
      correct_answer: Some(correct),
      explanation: "见课本".into(),
      ..Default::default()
    }
  }

  #[test]
  fn answers_accept_numbers_or_text() {
    let a: HashMap<u32, QuizAnswer> = serde_json::from_str(r#"{"1": 2, "2": "使秦国富强"}"#).unwrap();
    assert_eq!(a[&1], QuizAnswer::Choice(2));
    assert_eq!(a[&2], QuizAnswer::Text("使秦国富强".into()));
  }

  #[tokio::test]
  async fn mixed_quiz_is_scored_in_order() {
    let model = Arc::new(ScriptedModel::new().with_text(r#"{"isCorrect":true,"feedback":"很好"}"#));
    let tutor = Tutor::new(model.clone(), RetryPolicies::default());
    let short = QuizQuestion { id: 3, kind: QuestionType::Short, question: "评价".into(), ..Default::default() };
    let unanswered = QuizQuestion { id: 4, kind: QuestionType::Short, question: "意义".into(), ..Default::default() };
    let questions = vec![choice(1, 2), choice(2, 0), short, unanswered];

    let answers = HashMap::from([
      (1, QuizAnswer::Choice(2)),
      (2, QuizAnswer::Text("3".into())),
      (3, QuizAnswer::Text("富国强兵".into())),
    ]);
    let out = grade_quiz(&tutor, &questions, &answers).await;

    assert_eq!(out.total, 4);
    assert_eq!(out.score, 2);
    let flags: Vec<bool> = out.results.iter().map(|r| r.is_correct).collect();
    assert_eq!(flags, vec![true, false, true, false]);
    assert_eq!(out.results[3].feedback, UNANSWERED);
    // Only the answered short question reached the model.
    assert_eq!(model.calls(), 1);
  }
}
