//! Script workshop pipeline.
//!
//! curriculum analysis → outline → roles → scene rendering → quiz, plus a "refine" pass
//! for any intermediate artifact and a best-effort image generator.
//!
//! Stages never fail: any model, quota or parse error is logged and replaced with a
//! fixed fallback value so the editor always has something to show.

use std::sync::Arc;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
  Artifact, CognitiveRole, CurriculumInfo, DesignScheme, QuizDraft, QuizQuestion, Role, RoleDraft, SceneDraft, Script,
  ScriptScene,
};
use crate::model::{ask_json, GenerateRequest, GenerativeModel};
use crate::prompts::{RuleBook, Stage};
use crate::retry::RetryPolicy;
use crate::util::fill_template;

/// Acts beyond this are dropped before scene rendering.
pub const MAX_RENDERED_ACTS: usize = 10;

pub const FALLBACK_UNIT: &str = "解析异常，请检查配置";
pub const FALLBACK_PLACEHOLDER: &str = "点此手动输入";
pub const FALLBACK_POSITIONING: &str = "生成失败";
pub const DEFAULT_OPENING: &str = "故事开始了...";

const ANALYSIS_TPL: &str = "任务：基于《{subject}》解析教材。内容：{material}。要求：{instructions}。";
const OUTLINE_TPL: &str = "为《{unit}》设计大纲。风格：{style}。时长：{duration}min。知识点：{points}。{notes}";
const ROLES_TPL: &str = "设计4-6个角色。剧本：{positioning}。整体逻辑：{logic}。";
const FINALIZE_TPL: &str = "渲染剧本正文。《{positioning}》。按大纲生成 {count} 幕。大纲：{acts}";
const QUIZ_TPL: &str = "为剧本《{unit}》生成习题。知识点：{points}。剧情：{scenes}";
const REFINE_TPL: &str = "当前内容(JSON)：{current}\n修改指令：{instruction}\n请返回修改后的完整 JSON，结构保持不变。";

/// Subject / grade / textbook edition chosen before upload.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CurriculumMeta {
  #[serde(default)] pub subject: String,
  #[serde(default)] pub grade: String,
  #[serde(default)] pub version: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OutlineConfig {
  #[serde(default)] pub style: String,
  /// Minutes.
  pub duration: u32,
  #[serde(default)] pub notes: String,
}

#[derive(Clone)]
pub struct Workshop {
  model: Arc<dyn GenerativeModel>,
  rules: Arc<RuleBook>,
  policy: RetryPolicy,
}

impl Workshop {
  pub fn new(model: Arc<dyn GenerativeModel>, rules: Arc<RuleBook>, policy: RetryPolicy) -> Self {
    Self { model, rules, policy }
  }

  fn request(&self, stage: Stage, subject: &str, structured: bool, contents: String, schema: Option<Value>) -> GenerateRequest {
    GenerateRequest::text(contents)
      .system(self.rules.system_instruction(stage, Some(subject), structured))
      .json(schema)
  }

  #[instrument(level = "info", skip(self, material, instructions), fields(subject = %meta.subject, material_len = material.len()))]
  pub async fn analyze_curriculum(&self, material: &str, instructions: &str, meta: &CurriculumMeta) -> CurriculumInfo {
    let contents = fill_template(
      ANALYSIS_TPL,
      &[("subject", meta.subject.as_str()), ("material", material), ("instructions", instructions)],
    );
    let req = self.request(Stage::Analysis, &meta.subject, false, contents, Some(curriculum_schema()));
    match ask_json::<CurriculumInfo>(self.model.as_ref(), self.policy, "analyze_curriculum", req).await {
      Ok(mut info) => {
        if info.subject.is_empty() { info.subject = meta.subject.clone(); }
        if info.grade.is_empty() { info.grade = meta.grade.clone(); }
        if info.version.is_empty() { info.version = meta.version.clone(); }
        info!(target: "pipeline", unit = %info.unit, points = info.knowledge_points.len(), "Curriculum analysed");
        info
      }
      Err(e) => {
        error!(target: "pipeline", error = %e, "Curriculum analysis failed; using fallback");
        CurriculumInfo {
          subject: meta.subject.clone(),
          grade: meta.grade.clone(),
          version: meta.version.clone(),
          unit: FALLBACK_UNIT.into(),
          knowledge_points: vec![FALLBACK_PLACEHOLDER.into()],
          core_competencies: vec![FALLBACK_PLACEHOLDER.into()],
          ..Default::default()
        }
      }
    }
  }

  #[instrument(level = "info", skip(self, curriculum, cfg), fields(unit = %curriculum.unit, duration = cfg.duration))]
  pub async fn generate_outline(&self, curriculum: &CurriculumInfo, cfg: &OutlineConfig) -> DesignScheme {
    let duration = cfg.duration.to_string();
    let points = curriculum.knowledge_points.join("、");
    let notes = if cfg.notes.trim().is_empty() { String::new() } else { format!("补充要求：{}。", cfg.notes.trim()) };
    let contents = fill_template(
      OUTLINE_TPL,
      &[("unit", curriculum.unit.as_str()), ("style", cfg.style.as_str()), ("duration", duration.as_str()), ("points", points.as_str()), ("notes", notes.as_str())],
    );
    let req = self.request(Stage::Outline, &curriculum.subject, true, contents, Some(outline_schema()));
    match ask_json::<DesignScheme>(self.model.as_ref(), self.policy, "generate_outline", req).await {
      Ok(scheme) => {
        info!(target: "pipeline", acts = scheme.acts.len(), "Outline generated");
        scheme
      }
      Err(e) => {
        error!(target: "pipeline", error = %e, "Outline generation failed; using fallback");
        DesignScheme { positioning: FALLBACK_POSITIONING.into(), ..Default::default() }
      }
    }
  }

  /// Fills in the cognitive roles and confirms the outline, even when generation fails.
  #[instrument(level = "info", skip_all, fields(positioning = %scheme.positioning))]
  pub async fn generate_roles(&self, curriculum: &CurriculumInfo, scheme: &DesignScheme) -> DesignScheme {
    let contents = fill_template(ROLES_TPL, &[("positioning", scheme.positioning.as_str()), ("logic", scheme.overall_logic.as_str())]);
    let req = self.request(Stage::Roles, &curriculum.subject, false, contents, Some(roles_schema()));
    let cognitive_roles = match ask_json::<RoleDraft>(self.model.as_ref(), self.policy, "generate_roles", req).await {
      Ok(draft) => {
        info!(target: "pipeline", roles = draft.cognitive_roles.len(), "Roles generated");
        draft.cognitive_roles
      }
      Err(e) => {
        error!(target: "pipeline", error = %e, "Role generation failed; leaving roles empty");
        Vec::new()
      }
    };
    DesignScheme { cognitive_roles, outline_confirmed: true, ..scheme.clone() }
  }

  #[instrument(level = "info", skip_all, fields(acts = scheme.acts.len()))]
  pub async fn render_scenes(&self, curriculum: &CurriculumInfo, scheme: &DesignScheme) -> SceneDraft {
    let acts = &scheme.acts[..scheme.acts.len().min(MAX_RENDERED_ACTS)];
    if acts.len() < scheme.acts.len() {
      warn!(target: "pipeline", dropped = scheme.acts.len() - acts.len(), "Outline has too many acts; rendering the first ones only");
    }
    let acts_json = serde_json::to_string(acts).unwrap_or_default();
    let count = acts.len().to_string();
    let contents = fill_template(FINALIZE_TPL, &[("positioning", scheme.positioning.as_str()), ("count", count.as_str()), ("acts", acts_json.as_str())]);
    let req = self.request(Stage::Finalize, &curriculum.subject, true, contents, Some(scenes_schema()));
    match ask_json::<SceneDraft>(self.model.as_ref(), self.policy, "render_scenes", req).await {
      Ok(draft) => {
        info!(target: "pipeline", scenes = draft.scenes.len(), "Scenes rendered");
        draft
      }
      Err(e) => {
        error!(target: "pipeline", error = %e, "Scene rendering failed; returning no scenes");
        SceneDraft::default()
      }
    }
  }

  #[instrument(level = "info", skip_all, fields(unit = %curriculum.unit, scenes = scenes.len()))]
  pub async fn generate_quiz(&self, curriculum: &CurriculumInfo, scenes: &[ScriptScene]) -> Vec<QuizQuestion> {
    let points = curriculum.knowledge_points.join("、");
    let summaries = scenes.iter().map(|s| s.title.as_str()).collect::<Vec<_>>().join("；");
    let contents = fill_template(QUIZ_TPL, &[("unit", curriculum.unit.as_str()), ("points", points.as_str()), ("scenes", summaries.as_str())]);
    let req = self.request(Stage::Quiz, &curriculum.subject, true, contents, Some(quiz_schema()));
    match ask_json::<QuizDraft>(self.model.as_ref(), self.policy, "generate_quiz", req).await {
      Ok(draft) => draft.quiz,
      Err(e) => {
        error!(target: "pipeline", error = %e, "Quiz generation failed; returning no questions");
        Vec::new()
      }
    }
  }

  /// Revise one artifact by free-text instruction. Always returns the same variant;
  /// on any failure the input comes back unchanged.
  #[instrument(level = "info", skip(self, artifact, instruction), fields(kind = artifact.kind(), instruction_len = instruction.len()))]
  pub async fn refine(&self, artifact: Artifact, instruction: &str) -> Artifact {
    let current = match &artifact {
      Artifact::Curriculum(c) => serde_json::to_string(c),
      Artifact::Outline(s) => serde_json::to_string(s),
      Artifact::Roles(r) => serde_json::to_string(&json!({ "cognitiveRoles": r })),
      Artifact::Scene(s) => serde_json::to_string(s),
      Artifact::Quiz(q) => serde_json::to_string(&json!({ "quiz": q })),
    };
    let current = match current {
      Ok(s) => s,
      Err(e) => {
        error!(target: "pipeline", error = %e, "Could not encode artifact for refine");
        return artifact;
      }
    };
    let contents = fill_template(REFINE_TPL, &[("current", current.as_str()), ("instruction", instruction)]);
    let model = self.model.as_ref();
    let policy = self.policy;

    let refined: Result<Option<Artifact>, crate::error::AiError> = match &artifact {
      Artifact::Curriculum(c) => {
        let req = self.request(Stage::Analysis, &c.subject, false, contents, Some(curriculum_schema()));
        ask_json::<CurriculumInfo>(model, policy, "refine_curriculum", req).await.map(|c| Some(Artifact::Curriculum(c)))
      }
      Artifact::Outline(old) => {
        let req = self.request(Stage::Outline, "", true, contents, Some(outline_schema()));
        ask_json::<DesignScheme>(model, policy, "refine_outline", req).await.map(|mut s| {
          if s.cognitive_roles.is_empty() {
            s.cognitive_roles = old.cognitive_roles.clone();
          }
          s.outline_confirmed = old.outline_confirmed;
          Some(Artifact::Outline(s))
        })
      }
      Artifact::Roles(_) => {
        let req = self.request(Stage::Roles, "", false, contents, Some(roles_schema()));
        ask_json::<RoleDraft>(model, policy, "refine_roles", req)
          .await
          .map(|d| (!d.cognitive_roles.is_empty()).then_some(Artifact::Roles(d.cognitive_roles)))
      }
      Artifact::Scene(_) => {
        let req = self.request(Stage::Finalize, "", true, contents, None);
        ask_json::<ScriptScene>(model, policy, "refine_scene", req).await.map(|s| Some(Artifact::Scene(s)))
      }
      Artifact::Quiz(_) => {
        let req = self.request(Stage::Quiz, "", true, contents, Some(quiz_schema()));
        ask_json::<QuizDraft>(model, policy, "refine_quiz", req)
          .await
          .map(|d| (!d.quiz.is_empty()).then_some(Artifact::Quiz(d.quiz)))
      }
    };

    match refined {
      Ok(Some(next)) => next,
      Ok(None) => {
        warn!(target: "pipeline", kind = artifact.kind(), "Refine returned an empty artifact; keeping the original");
        artifact
      }
      Err(e) => {
        error!(target: "pipeline", kind = artifact.kind(), error = %e, "Refine failed; keeping the original");
        artifact
      }
    }
  }

  /// Generate one illustration as a `data:` URL. `None` on any failure.
  #[instrument(level = "info", skip(self, prompt, image_model), fields(prompt_len = prompt.len(), model = %image_model))]
  pub async fn generate_image(
    &self,
    prompt: &str,
    style: Option<&str>,
    resolution: Option<&str>,
    image_model: &str,
  ) -> Option<String> {
    let mut contents = prompt.trim().to_string();
    if let Some(style) = style.filter(|s| !s.is_empty()) {
      contents.push_str(&format!("。画面风格：{}", style));
    }
    if let Some(res) = resolution.filter(|s| !s.is_empty()) {
      contents.push_str(&format!("。分辨率：{}", res));
    }
    let req = GenerateRequest::text(contents).model(image_model);
    let model = self.model.as_ref();
    let resp = match crate::retry::with_backoff(self.policy, "generate_image", || model.generate(req.clone())).await {
      Ok(r) => r,
      Err(e) => {
        error!(target: "pipeline", error = %e, "Image generation failed");
        return None;
      }
    };
    for image in resp.images {
      match base64::engine::general_purpose::STANDARD.decode(image.data.as_bytes()) {
        Ok(bytes) if !bytes.is_empty() => {
          info!(target: "pipeline", bytes = bytes.len(), mime = %image.mime_type, "Image generated");
          return Some(format!("data:{};base64,{}", image.mime_type, image.data));
        }
        Ok(_) => warn!(target: "pipeline", "Image part was empty"),
        Err(e) => warn!(target: "pipeline", error = %e, "Image part is not valid base64"),
      }
    }
    warn!(target: "pipeline", "Model returned no image parts");
    None
  }
}

/// Turn the workshop's outputs into a publishable script.
pub fn assemble_script(
  curriculum: &CurriculumInfo,
  scheme: &DesignScheme,
  scenes: &[ScriptScene],
  quiz: Vec<QuizQuestion>,
  duration: u32,
) -> Script {
  let roles: Vec<Role> = scheme.cognitive_roles.iter().enumerate().map(|(i, cr)| role_from(i, cr)).collect();
  let (min_players, max_players) = if roles.is_empty() { (4, 6) } else { (roles.len() as u32, roles.len() as u32) };
  Script {
    id: format!("custom_{}", Uuid::new_v4().simple()),
    title: scheme.positioning.clone(),
    description: scheme.overall_logic.clone(),
    cover_image: scenes.first().and_then(|s| s.asset_url.clone()),
    background_image: None,
    curriculum: curriculum.clone(),
    duration,
    min_players,
    max_players,
    difficulty: 3,
    roles,
    intro_slides: Vec::new(),
    initial_scenario: scenes
      .first()
      .map(|s| s.narrative.clone())
      .filter(|n| !n.is_empty())
      .unwrap_or_else(|| DEFAULT_OPENING.to_string()),
    scenes: scenes.to_vec(),
    tasks: scenes.iter().flat_map(|s| s.tasks.iter().cloned()).collect(),
    clues: scenes.iter().flat_map(|s| s.clues.iter().cloned()).collect(),
    quiz,
  }
}

fn role_from(index: usize, cr: &CognitiveRole) -> Role {
  Role {
    id: if cr.id.is_empty() { format!("role_{}", index + 1) } else { cr.id.clone() },
    name: cr.role_name.clone(),
    avatar: cr.emoji.clone(),
    portrait_large: None,
    description: cr.role_description.clone(),
    objective: cr.collaboration_value.clone(),
    detailed_profile: Some(cr.cognitive_function.clone()).filter(|s| !s.is_empty()),
  }
}

// --- Response schemas (Gemini OpenAPI subset) ---

fn curriculum_schema() -> Value {
  json!({
    "type": "OBJECT",
    "properties": {
      "unit": { "type": "STRING" },
      "knowledgePoints": { "type": "ARRAY", "items": { "type": "STRING" } },
      "coreCompetencies": { "type": "ARRAY", "items": { "type": "STRING" } },
      "teachingFocus": { "type": "STRING" },
      "teachingDifficulty": { "type": "STRING" }
    },
    "required": ["unit", "knowledgePoints", "teachingFocus"]
  })
}

fn outline_schema() -> Value {
  json!({
    "type": "OBJECT",
    "properties": {
      "positioning": { "type": "STRING" },
      "teacherInstructions": { "type": "STRING" },
      "acts": {
        "type": "ARRAY",
        "items": {
          "type": "OBJECT",
          "properties": {
            "id": { "type": "STRING" },
            "title": { "type": "STRING" },
            "plotLogic": { "type": "STRING" },
            "knowledgePoint": { "type": "STRING" },
            "assessmentContent": { "type": "STRING" },
            "duration": { "type": "INTEGER" }
          },
          "required": ["id", "title", "plotLogic", "knowledgePoint", "assessmentContent", "duration"]
        }
      },
      "overallLogic": { "type": "STRING" }
    },
    "required": ["positioning", "acts", "overallLogic"]
  })
}

fn roles_schema() -> Value {
  json!({
    "type": "OBJECT",
    "properties": {
      "cognitiveRoles": {
        "type": "ARRAY",
        "items": {
          "type": "OBJECT",
          "properties": {
            "id": { "type": "STRING" },
            "roleName": { "type": "STRING" },
            "roleDescription": { "type": "STRING" },
            "cognitiveFunction": { "type": "STRING" },
            "knowledgeResponsibility": { "type": "STRING" },
            "collaborationValue": { "type": "STRING" },
            "emoji": { "type": "STRING" }
          },
          "required": ["id", "roleName", "cognitiveFunction"]
        }
      }
    },
    "required": ["cognitiveRoles"]
  })
}

fn scenes_schema() -> Value {
  json!({
    "type": "OBJECT",
    "properties": {
      "scenes": {
        "type": "ARRAY",
        "items": {
          "type": "OBJECT",
          "properties": {
            "id": { "type": "STRING" },
            "actId": { "type": "STRING" },
            "title": { "type": "STRING" },
            "summary": { "type": "STRING" },
            "narrative": { "type": "STRING" },
            "assetType": { "type": "STRING", "enum": ["image", "video"] },
            "assetPrompt": { "type": "STRING" },
            "tasks": {
              "type": "ARRAY",
              "items": {
                "type": "OBJECT",
                "properties": {
                  "id": { "type": "STRING" },
                  "title": { "type": "STRING" },
                  "description": { "type": "STRING" },
                  "type": { "type": "STRING", "enum": ["discussion", "matching", "puzzle", "choice"] }
                },
                "required": ["id", "title", "description", "type"]
              }
            },
            "clues": {
              "type": "ARRAY",
              "items": {
                "type": "OBJECT",
                "properties": {
                  "id": { "type": "STRING" },
                  "title": { "type": "STRING" },
                  "content": { "type": "STRING" }
                }
              }
            }
          },
          "required": ["id", "title", "narrative", "tasks"]
        }
      }
    },
    "required": ["scenes"]
  })
}

fn quiz_schema() -> Value {
  json!({
    "type": "OBJECT",
    "properties": {
      "quiz": {
        "type": "ARRAY",
        "items": {
          "type": "OBJECT",
          "properties": {
            "id": { "type": "INTEGER" },
            "type": { "type": "STRING", "enum": ["choice", "short", "boolean", "material-analysis"] },
            "question": { "type": "STRING" },
            "material": { "type": "STRING" },
            "options": { "type": "ARRAY", "items": { "type": "STRING" } },
            "correctAnswer": { "type": "INTEGER" },
            "explanation": { "type": "STRING" }
          },
          "required": ["id", "type", "question", "explanation"]
        }
      }
    },
    "required": ["quiz"]
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{Act, Clue, Task, TaskType};
  use crate::error::AiError;
  use crate::model::testing::{quota_error, ScriptedModel};
  use crate::model::{GenerateResponse, InlineImage};

  fn workshop(model: Arc<ScriptedModel>) -> Workshop {
    Workshop::new(model, Arc::new(RuleBook::default()), RetryPolicy::new(3, 4_000))
  }

  fn meta() -> CurriculumMeta {
    CurriculumMeta { subject: "历史".into(), grade: "七年级".into(), version: "部编版".into() }
  }

  #[tokio::test]
  async fn curriculum_network_error_yields_fallback() {
    let model = Arc::new(ScriptedModel::new().with_error(AiError::Network("connection refused".into())));
    let info = workshop(model.clone()).analyze_curriculum("商鞅变法……", "提炼知识点", &meta()).await;

    assert_eq!(info.unit, FALLBACK_UNIT);
    assert_eq!(info.knowledge_points, vec![FALLBACK_PLACEHOLDER.to_string()]);
    assert_eq!(info.core_competencies, vec![FALLBACK_PLACEHOLDER.to_string()]);
    assert_eq!(info.subject, "历史");
    assert_eq!(model.calls(), 1);
  }

  #[tokio::test]
  async fn curriculum_success_fills_metadata_and_sends_stage_rules() {
    let model = Arc::new(ScriptedModel::new().with_text(
      r#"好的：```json
{"unit":"第6课 变法运动","knowledgePoints":["商鞅变法","立木为信"],"coreCompetencies":["史料实证"],"teachingFocus":"变法内容"}
```"#,
    ));
    let info = workshop(model.clone()).analyze_curriculum("教材", "", &meta()).await;
    assert_eq!(info.unit, "第6课 变法运动");
    assert_eq!(info.knowledge_points.len(), 2);
    assert_eq!(info.grade, "七年级");
    assert_eq!(info.version, "部编版");

    let req = &model.requests()[0];
    assert!(req.json_output);
    assert!(req.response_schema.is_some());
    let system = req.system_instruction.as_deref().unwrap();
    assert!(system.contains("【教材解析】"));
    assert!(system.contains("【历史学科】"));
    assert!(!system.contains("【结构规范】"));
  }

  #[tokio::test(start_paused = true)]
  async fn outline_quota_exhaustion_yields_fallback_after_four_calls() {
    let model = Arc::new(
      ScriptedModel::new()
        .with_error(quota_error())
        .with_error(quota_error())
        .with_error(quota_error())
        .with_error(quota_error()),
    );
    let cfg = OutlineConfig { style: "探案".into(), duration: 40, notes: String::new() };
    let scheme = workshop(model.clone()).generate_outline(&CurriculumInfo::default(), &cfg).await;
    assert_eq!(scheme.positioning, FALLBACK_POSITIONING);
    assert!(scheme.acts.is_empty());
    assert_eq!(model.calls(), 4);
  }

  #[tokio::test]
  async fn roles_confirm_outline_even_on_failure() {
    let model = Arc::new(ScriptedModel::new().with_text("not json at all"));
    let scheme = DesignScheme { positioning: "长安奇案".into(), ..Default::default() };
    let out = workshop(model).generate_roles(&CurriculumInfo::default(), &scheme).await;
    assert!(out.outline_confirmed);
    assert!(out.cognitive_roles.is_empty());
    assert_eq!(out.positioning, "长安奇案");
  }

  #[tokio::test]
  async fn scene_rendering_caps_acts() {
    let model = Arc::new(ScriptedModel::new().with_text(r#"{"scenes":[{"id":"s1","title":"开场","narrative":"驼铃声声","tasks":[]}]}"#));
    let acts = (0..12).map(|i| Act { id: format!("a{}", i), ..Default::default() }).collect();
    let scheme = DesignScheme { positioning: "丝路".into(), acts, ..Default::default() };
    let draft = workshop(model.clone()).render_scenes(&CurriculumInfo::default(), &scheme).await;
    assert_eq!(draft.scenes.len(), 1);
    assert!(model.requests()[0].contents.contains("按大纲生成 10 幕"));
  }

  #[tokio::test]
  async fn refine_returns_input_on_failure_and_same_variant_on_success() {
    let quiz = vec![QuizQuestion { id: 1, question: "商鞅变法发生在哪国？".into(), ..Default::default() }];

    let failing = Arc::new(ScriptedModel::new().with_error(AiError::Network("down".into())));
    let same = workshop(failing).refine(Artifact::Quiz(quiz.clone()), "更难一些").await;
    assert_eq!(same, Artifact::Quiz(quiz.clone()));

    let ok = Arc::new(ScriptedModel::new().with_text(r#"{"quiz":[{"id":1,"type":"short","question":"评价商鞅变法","explanation":"要点"}]}"#));
    let refined = workshop(ok.clone()).refine(Artifact::Quiz(quiz), "改成简答题").await;
    match refined {
      Artifact::Quiz(q) => assert_eq!(q[0].question, "评价商鞅变法"),
      other => panic!("unexpected variant {:?}", other.kind()),
    }
    assert!(ok.requests()[0].contents.contains("商鞅变法发生在哪国"));
  }

  #[tokio::test]
  async fn refine_outline_keeps_roles_when_model_drops_them() {
    let roles = vec![CognitiveRole { id: "r1".into(), role_name: "史官".into(), ..Default::default() }];
    let scheme = DesignScheme { positioning: "旧".into(), cognitive_roles: roles.clone(), outline_confirmed: true, ..Default::default() };
    let model = Arc::new(ScriptedModel::new().with_text(r#"{"positioning":"新","acts":[],"overallLogic":"x"}"#));
    match workshop(model).refine(Artifact::Outline(scheme), "换个标题").await {
      Artifact::Outline(s) => {
        assert_eq!(s.positioning, "新");
        assert_eq!(s.cognitive_roles, roles);
        assert!(s.outline_confirmed);
      }
      other => panic!("unexpected variant {:?}", other.kind()),
    }
  }

  #[tokio::test]
  async fn image_generation_validates_payload() {
    let good = Arc::new(ScriptedModel::new().with_response(GenerateResponse {
      text: None,
      images: vec![InlineImage { mime_type: "image/png".into(), data: "aGVsbG8=".into() }],
    }));
    let url = workshop(good.clone()).generate_image("长安西市", Some("水彩"), None, "img-model").await;
    assert_eq!(url.as_deref(), Some("data:image/png;base64,aGVsbG8="));
    assert_eq!(good.requests()[0].model.as_deref(), Some("img-model"));
    assert!(good.requests()[0].contents.contains("水彩"));

    let bad = Arc::new(ScriptedModel::new().with_response(GenerateResponse {
      text: Some("sorry".into()),
      images: vec![InlineImage { mime_type: "image/png".into(), data: "%%%".into() }],
    }));
    assert_eq!(workshop(bad).generate_image("x", None, None, "m").await, None);

    let missing = Arc::new(ScriptedModel::new().with_error(AiError::MissingCredential));
    assert_eq!(workshop(missing).generate_image("x", None, None, "m").await, None);
  }

  #[test]
  fn assembled_script_follows_workshop_outputs() {
    let scheme = DesignScheme {
      positioning: "丝路长安".into(),
      overall_logic: "沿丝路追查".into(),
      cognitive_roles: vec![
        CognitiveRole { id: "r1".into(), role_name: "商人".into(), emoji: "🐫".into(), collaboration_value: "交易".into(), ..Default::default() },
        CognitiveRole { id: String::new(), role_name: "僧人".into(), cognitive_function: "记录".into(), ..Default::default() },
      ],
      ..Default::default()
    };
    let scene = ScriptScene {
      id: "s1".into(),
      title: "开场".into(),
      narrative: "驼队抵达".into(),
      asset_url: Some("https://img/1.png".into()),
      tasks: vec![Task { id: "t1".into(), title: "辨方向".into(), kind: TaskType::Puzzle, ..Default::default() }],
      clues: vec![Clue { id: "c1".into(), title: "地图".into(), ..Default::default() }],
      ..Default::default()
    };
    let script = assemble_script(&CurriculumInfo::default(), &scheme, &[scene], vec![], 45);
    assert_eq!(script.title, "丝路长安");
    assert_eq!(script.description, "沿丝路追查");
    assert_eq!((script.min_players, script.max_players), (2, 2));
    assert_eq!(script.roles[0].avatar, "🐫");
    assert_eq!(script.roles[0].objective, "交易");
    assert_eq!(script.roles[1].id, "role_2");
    assert_eq!(script.roles[1].detailed_profile.as_deref(), Some("记录"));
    assert_eq!(script.initial_scenario, "驼队抵达");
    assert_eq!(script.cover_image.as_deref(), Some("https://img/1.png"));
    assert_eq!(script.tasks.len(), 1);
    assert_eq!(script.clues.len(), 1);
    assert_eq!(script.difficulty, 3);
    assert_eq!(script.duration, 45);

    let empty = assemble_script(&CurriculumInfo::default(), &DesignScheme::default(), &[], vec![], 40);
    assert_eq!((empty.min_players, empty.max_players), (4, 6));
    assert_eq!(empty.initial_scenario, DEFAULT_OPENING);
  }
}
