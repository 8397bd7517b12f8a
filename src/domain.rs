//! Domain models: scripts and everything a playthrough touches, plus the intermediate
//! artifacts produced by the workshop pipeline.
//!
//! Wire names are camelCase to stay compatible with existing front-ends and stored JSON.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumInfo {
  #[serde(default)] pub subject: String,
  #[serde(default)] pub version: String,
  #[serde(default)] pub grade: String,
  #[serde(default)] pub unit: String,
  #[serde(default)] pub knowledge_points: Vec<String>,
  #[serde(default)] pub core_competencies: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub teaching_focus: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub teaching_difficulty: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlotSlide {
  #[serde(default)] pub image: String,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub video: Option<String>,
  #[serde(default)] pub text: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
  #[default]
  Main,
  Personal,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
  #[default]
  Discussion,
  Puzzle,
  Choice,
  Matching,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MatchingData {
  #[serde(default)] pub items: Vec<String>,
  #[serde(default)] pub categories: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: String,
  pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub mission: String,
  #[serde(default)] pub category: TaskCategory,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub assignee_id: Option<String>,
  #[serde(default, rename = "type")] pub kind: TaskType,
  #[serde(default)] pub is_completed: bool,
  #[serde(default = "default_true")] pub required_for_plot: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub image: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub video: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub options: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub correct_answer: Option<String>,
  /// Comma-separated clue ids.
  #[serde(default, skip_serializing_if = "Option::is_none")] pub reward_clue_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub plot_update: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub matching_data: Option<MatchingData>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub fun_point: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub knowledge_point: Option<String>,
}

fn default_true() -> bool { true }

impl Task {
  pub fn reward_clue_ids(&self) -> Vec<String> {
    crate::util::split_ids(self.reward_clue_id.as_deref().unwrap_or_default())
  }

  /// Completing this task plays a cut-scene.
  pub fn has_plot_update(&self) -> bool {
    self.plot_update.is_some() || self.video.is_some()
  }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClueKind {
  History,
  #[default]
  Plot,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Clue {
  pub id: String,
  pub title: String,
  #[serde(default)] pub content: String,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub knowledge_detail: Option<String>,
  #[serde(default, rename = "type")] pub kind: ClueKind,
  #[serde(default)] pub is_found: bool,
  #[serde(default)] pub is_new: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub image: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub asset_prompt: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Role {
  pub id: String,
  pub name: String,
  #[serde(default)] pub avatar: String,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub portrait_large: Option<String>,
  #[serde(default)] pub description: String,
  #[serde(default)] pub objective: String,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub detailed_profile: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
  #[default]
  Choice,
  Short,
  Boolean,
  MaterialAnalysis,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
  pub id: u32,
  #[serde(default, rename = "type")] pub kind: QuestionType,
  pub question: String,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub material: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub options: Option<Vec<String>>,
  /// Index into `options` for choice-like questions.
  #[serde(default, skip_serializing_if = "Option::is_none")] pub correct_answer: Option<u32>,
  #[serde(default)] pub explanation: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
  #[default]
  Image,
  Video,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationOptions {
  #[serde(default)] pub styles: Vec<String>,
  #[serde(default)] pub resolutions: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptScene {
  pub id: String,
  #[serde(default)] pub act_id: String,
  pub title: String,
  #[serde(default)] pub summary: String,
  #[serde(default)] pub narrative: String,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub transition: Option<String>,
  #[serde(default)] pub asset_type: AssetType,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub asset_description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub asset_prompt: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub asset_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub generation_options: Option<GenerationOptions>,
  #[serde(default)] pub is_edited: bool,
  #[serde(default)] pub associated_role_ids: Vec<String>,
  #[serde(default)] pub tasks: Vec<Task>,
  #[serde(default)] pub clues: Vec<Clue>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Script {
  pub id: String,
  pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub cover_image: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub background_image: Option<String>,
  #[serde(default)] pub curriculum: CurriculumInfo,
  /// Minutes.
  #[serde(default)] pub duration: u32,
  #[serde(default)] pub min_players: u32,
  #[serde(default)] pub max_players: u32,
  /// 1..=5
  #[serde(default)] pub difficulty: u32,
  #[serde(default)] pub roles: Vec<Role>,
  #[serde(default)] pub intro_slides: Vec<PlotSlide>,
  #[serde(default)] pub initial_scenario: String,
  #[serde(default)] pub scenes: Vec<ScriptScene>,
  #[serde(default)] pub tasks: Vec<Task>,
  #[serde(default)] pub clues: Vec<Clue>,
  #[serde(default)] pub quiz: Vec<QuizQuestion>,
}

impl Script {
  /// Flat task list for play. Legacy scripts carry it directly; scene-based ones are flattened.
  pub fn playable_tasks(&self) -> Vec<Task> {
    if !self.tasks.is_empty() {
      return self.tasks.clone();
    }
    self.scenes.iter().flat_map(|s| s.tasks.iter().cloned()).collect()
  }

  pub fn playable_clues(&self) -> Vec<Clue> {
    if !self.clues.is_empty() {
      return self.clues.clone();
    }
    self.scenes.iter().flat_map(|s| s.clues.iter().cloned()).collect()
  }

  pub fn role(&self, role_id: &str) -> Option<&Role> {
    self.roles.iter().find(|r| r.id == role_id)
  }

  /// `(kind, id)` for every assignee / reward reference that does not resolve in this script.
  pub fn dangling_references(&self) -> Vec<(&'static str, String)> {
    let role_ids: HashSet<&str> = self.roles.iter().map(|r| r.id.as_str()).collect();
    let clues = self.playable_clues();
    let clue_ids: HashSet<&str> = clues.iter().map(|c| c.id.as_str()).collect();

    let mut out = Vec::new();
    for task in self.playable_tasks() {
      if let Some(assignee) = &task.assignee_id {
        if !role_ids.contains(assignee.as_str()) {
          out.push(("assignee", assignee.clone()));
        }
      }
      for clue_id in task.reward_clue_ids() {
        if !clue_ids.contains(clue_id.as_str()) {
          out.push(("reward clue", clue_id));
        }
      }
    }
    out
  }
}

/// Lobby listing entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSummary {
  pub id: String,
  pub title: String,
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub cover_image: Option<String>,
  pub curriculum: CurriculumInfo,
  pub duration: u32,
  pub min_players: u32,
  pub max_players: u32,
  pub difficulty: u32,
  pub is_official: bool,
}

impl ScriptSummary {
  pub fn of(script: &Script, is_official: bool) -> Self {
    Self {
      id: script.id.clone(),
      title: script.title.clone(),
      description: script.description.clone(),
      cover_image: script.cover_image.clone(),
      curriculum: script.curriculum.clone(),
      duration: script.duration,
      min_players: script.min_players,
      max_players: script.max_players,
      difficulty: script.difficulty,
      is_official,
    }
  }
}

// ---------- Workshop artifacts ----------

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Act {
  #[serde(default)] pub id: String,
  #[serde(default)] pub title: String,
  #[serde(default)] pub plot_logic: String,
  #[serde(default)] pub knowledge_point: String,
  #[serde(default)] pub assessment_content: String,
  #[serde(default)] pub duration: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveRole {
  #[serde(default)] pub id: String,
  #[serde(default)] pub role_name: String,
  #[serde(default)] pub role_description: String,
  #[serde(default)] pub cognitive_function: String,
  #[serde(default)] pub knowledge_responsibility: String,
  #[serde(default)] pub collaboration_value: String,
  #[serde(default)] pub emoji: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DesignScheme {
  #[serde(default)] pub positioning: String,
  #[serde(default)] pub teacher_instructions: String,
  #[serde(default)] pub acts: Vec<Act>,
  #[serde(default)] pub overall_logic: String,
  #[serde(default)] pub cognitive_roles: Vec<CognitiveRole>,
  #[serde(default)] pub outline_confirmed: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SceneDraft {
  #[serde(default)] pub scenes: Vec<ScriptScene>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QuizDraft {
  #[serde(default)] pub quiz: Vec<QuizQuestion>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleDraft {
  #[serde(default)] pub cognitive_roles: Vec<CognitiveRole>,
}

/// Stage output that can be sent back through "refine". A refine call always returns
/// the same variant it was given.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Artifact {
  Curriculum(CurriculumInfo),
  Outline(DesignScheme),
  Roles(Vec<CognitiveRole>),
  Scene(ScriptScene),
  Quiz(Vec<QuizQuestion>),
}

impl Artifact {
  pub fn kind(&self) -> &'static str {
    match self {
      Artifact::Curriculum(_) => "curriculum",
      Artifact::Outline(_) => "outline",
      Artifact::Roles(_) => "roles",
      Artifact::Scene(_) => "scene",
      Artifact::Quiz(_) => "quiz",
    }
  }
}

// ---------- Report ----------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeStatus {
  Mastered,
  Weak,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeMark {
  pub point: String,
  pub status: KnowledgeStatus,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Abilities {
  #[serde(default)] pub history: u32,
  #[serde(default)] pub logic: u32,
  #[serde(default)] pub collaboration: u32,
  #[serde(default)] pub space_time: u32,
  #[serde(default)] pub values: u32,
}

impl Default for Abilities {
  fn default() -> Self {
    Self { history: 85, logic: 80, collaboration: 90, space_time: 75, values: 85 }
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearningReport {
  #[serde(default)] pub plot_review: String,
  #[serde(default)] pub teacher_suggestion: String,
  #[serde(default)] pub knowledge_map: Vec<KnowledgeMark>,
  #[serde(default)] pub abilities: Abilities,
}
