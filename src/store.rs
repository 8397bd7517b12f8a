//! Relational persistence for published scripts, player progress and profiles.
//!
//! The schema mirrors the hosted backend the front-end used to talk to: one row per
//! script, with roles, scenes, tasks, clues and quiz questions in child tables. List-like
//! and nested fields (knowledge points, options, slides, ...) are stored as JSON text.
//!
//! Publishing is a single transaction. Role and clue ids are remapped to fresh row ids
//! before anything is written, so task references stay consistent after the move. Every
//! clue row gets its own id even when generated scenes reuse one (`c1` in each act); a
//! reward resolves against its own scene first, then against the rest of the script.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
  Clue, CurriculumInfo, LearningReport, QuizQuestion, Role, Script, ScriptScene, ScriptSummary, Task,
};
use crate::error::StoreError;
use crate::util::split_ids;

pub const LEGACY_SCENE_TITLE: &str = "第一幕";
pub const LEGACY_SCENE_SUMMARY: &str = "场景摘要";

const SCHEMA: &[&str] = &[
  r#"CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL DEFAULT '',
    avatar TEXT,
    updated_at TEXT NOT NULL
  )"#,
  r#"CREATE TABLE IF NOT EXISTS scripts (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    cover_image TEXT,
    background_image TEXT,
    subject TEXT NOT NULL DEFAULT '',
    grade TEXT NOT NULL DEFAULT '',
    version TEXT NOT NULL DEFAULT '',
    unit TEXT NOT NULL DEFAULT '',
    knowledge_points TEXT NOT NULL DEFAULT '[]',
    core_competencies TEXT NOT NULL DEFAULT '[]',
    teaching_focus TEXT,
    teaching_difficulty TEXT,
    duration INTEGER NOT NULL DEFAULT 0,
    difficulty INTEGER NOT NULL DEFAULT 0,
    min_players INTEGER NOT NULL DEFAULT 0,
    max_players INTEGER NOT NULL DEFAULT 0,
    intro_slides TEXT NOT NULL DEFAULT '[]',
    initial_scenario TEXT NOT NULL DEFAULT '',
    creator_id TEXT,
    is_official INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
  )"#,
  r#"CREATE TABLE IF NOT EXISTS roles (
    id TEXT PRIMARY KEY,
    script_id TEXT NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    avatar TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    objective TEXT NOT NULL DEFAULT '',
    detailed_profile TEXT,
    portrait_large TEXT
  )"#,
  r#"CREATE TABLE IF NOT EXISTS scenes (
    id TEXT PRIMARY KEY,
    script_id TEXT NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
    order_index INTEGER NOT NULL,
    title TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    narrative TEXT NOT NULL DEFAULT '',
    transition_text TEXT,
    asset_type TEXT NOT NULL DEFAULT 'image',
    asset_description TEXT,
    asset_prompt TEXT,
    asset_url TEXT,
    generation_options TEXT,
    associated_role_ids TEXT NOT NULL DEFAULT '[]'
  )"#,
  r#"CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    scene_id TEXT NOT NULL REFERENCES scenes(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    body TEXT NOT NULL,
    assignee_role_id TEXT REFERENCES roles(id),
    reward_clue_id TEXT
  )"#,
  r#"CREATE TABLE IF NOT EXISTS clues (
    id TEXT PRIMARY KEY,
    scene_id TEXT NOT NULL REFERENCES scenes(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    body TEXT NOT NULL
  )"#,
  r#"CREATE TABLE IF NOT EXISTS quizzes (
    script_id TEXT NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
    question_no INTEGER NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (script_id, question_no)
  )"#,
  r#"CREATE TABLE IF NOT EXISTS user_progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    script_id TEXT NOT NULL,
    quiz_score INTEGER NOT NULL,
    transcript TEXT NOT NULL,
    ai_report TEXT,
    completed_at TEXT NOT NULL
  )"#,
];

/// One finished playthrough.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
  pub script_id: String,
  pub quiz_score: u32,
  #[serde(default)]
  pub transcript: Vec<String>,
  #[serde(default)]
  pub ai_report: Option<LearningReport>,
  pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
  /// Taken from the caller's identity on write.
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub display_name: String,
  #[serde(default)]
  pub avatar: Option<String>,
}

#[derive(Clone)]
pub struct Store {
  pool: SqlitePool,
}

impl Store {
  /// Open the pool and create missing tables.
  #[instrument(level = "info", skip_all)]
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    // Every in-memory connection is its own database.
    let max = if url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new().max_connections(max).connect(url).await?;
    for ddl in SCHEMA {
      sqlx::query(ddl).execute(&pool).await?;
    }
    info!(target: "store", "Database schema ready");
    Ok(Self { pool })
  }

  pub async fn ping(&self) -> bool {
    match sqlx::query("SELECT 1").execute(&self.pool).await {
      Ok(_) => true,
      Err(e) => {
        warn!(target: "store", error = %e, "Database ping failed");
        false
      }
    }
  }

  /// Write a whole script. Nothing is written when a reference does not resolve or any
  /// insert fails. Returns the new script id.
  #[instrument(level = "info", skip(self, script), fields(title = %script.title))]
  pub async fn publish_script(&self, script: &Script, user: Option<&str>) -> Result<String, StoreError> {
    if let Some((kind, id)) = script.dangling_references().into_iter().next() {
      return Err(StoreError::DanglingReference { kind, id });
    }

    let script_id = Uuid::new_v4().to_string();
    let role_ids: HashMap<String, String> =
      script.roles.iter().map(|r| (r.id.clone(), Uuid::new_v4().to_string())).collect();

    let scenes = if script.scenes.is_empty() { vec![legacy_scene(script)] } else { script.scenes.clone() };
    let clue_rows: Vec<Vec<String>> =
      scenes.iter().map(|sc| sc.clues.iter().map(|_| Uuid::new_v4().to_string()).collect()).collect();
    // First occurrence wins, both per scene and script-wide.
    let scene_clue_ids: Vec<HashMap<&str, &str>> = scenes
      .iter()
      .zip(&clue_rows)
      .map(|(sc, rows)| {
        let mut m = HashMap::new();
        for (clue, row) in sc.clues.iter().zip(rows) {
          m.entry(clue.id.as_str()).or_insert(row.as_str());
        }
        m
      })
      .collect();
    let mut script_clue_ids: HashMap<&str, &str> = HashMap::new();
    for m in &scene_clue_ids {
      for (k, v) in m {
        script_clue_ids.entry(*k).or_insert(*v);
      }
    }

    let mut tx = self.pool.begin().await?;
    let c = &script.curriculum;
    sqlx::query(
      r#"INSERT INTO scripts (id, title, description, cover_image, background_image, subject, grade,
          version, unit, knowledge_points, core_competencies, teaching_focus, teaching_difficulty,
          duration, difficulty, min_players, max_players, intro_slides, initial_scenario,
          creator_id, is_official, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&script_id)
    .bind(&script.title)
    .bind(&script.description)
    .bind(&script.cover_image)
    .bind(&script.background_image)
    .bind(&c.subject)
    .bind(&c.grade)
    .bind(&c.version)
    .bind(&c.unit)
    .bind(serde_json::to_string(&c.knowledge_points)?)
    .bind(serde_json::to_string(&c.core_competencies)?)
    .bind(&c.teaching_focus)
    .bind(&c.teaching_difficulty)
    .bind(script.duration)
    .bind(script.difficulty)
    .bind(script.min_players)
    .bind(script.max_players)
    .bind(serde_json::to_string(&script.intro_slides)?)
    .bind(&script.initial_scenario)
    .bind(user)
    .bind(user.is_none())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for r in &script.roles {
      sqlx::query(
        r#"INSERT INTO roles (id, script_id, name, avatar, description, objective, detailed_profile, portrait_large)
          VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
      )
      .bind(&role_ids[&r.id])
      .bind(&script_id)
      .bind(&r.name)
      .bind(&r.avatar)
      .bind(&r.description)
      .bind(&r.objective)
      .bind(&r.detailed_profile)
      .bind(&r.portrait_large)
      .execute(&mut *tx)
      .await?;
    }

    let remap = |id: &str, map: &HashMap<String, String>| map.get(id).cloned().unwrap_or_else(|| id.to_string());

    for (order, scene) in scenes.iter().enumerate() {
      let scene_id = Uuid::new_v4().to_string();
      let associated: Vec<String> = scene.associated_role_ids.iter().map(|id| remap(id, &role_ids)).collect();
      sqlx::query(
        r#"INSERT INTO scenes (id, script_id, order_index, title, summary, narrative, transition_text, asset_type,
            asset_description, asset_prompt, asset_url, generation_options, associated_role_ids)
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
      )
      .bind(&scene_id)
      .bind(&script_id)
      .bind(order as i64)
      .bind(&scene.title)
      .bind(&scene.summary)
      .bind(&scene.narrative)
      .bind(&scene.transition)
      .bind(serde_json::to_value(scene.asset_type)?.as_str().unwrap_or("image").to_string())
      .bind(&scene.asset_description)
      .bind(&scene.asset_prompt)
      .bind(&scene.asset_url)
      .bind(scene.generation_options.as_ref().map(serde_json::to_string).transpose()?)
      .bind(serde_json::to_string(&associated)?)
      .execute(&mut *tx)
      .await?;

      for (pos, task) in scene.tasks.iter().enumerate() {
        let mut stored = task.clone();
        stored.id = Uuid::new_v4().to_string();
        stored.is_completed = false;
        stored.assignee_id = task.assignee_id.as_deref().map(|id| remap(id, &role_ids));
        stored.reward_clue_id = task.reward_clue_id.as_deref().map(|ids| {
          split_ids(ids)
            .iter()
            .map(|id| {
              let found = scene_clue_ids[order].get(id.as_str()).or_else(|| script_clue_ids.get(id.as_str()));
              found.map(|v| v.to_string()).unwrap_or_else(|| id.clone())
            })
            .collect::<Vec<_>>()
            .join(",")
        });
        sqlx::query(
          "INSERT INTO tasks (id, scene_id, position, body, assignee_role_id, reward_clue_id) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&stored.id)
        .bind(&scene_id)
        .bind(pos as i64)
        .bind(serde_json::to_string(&stored)?)
        .bind(&stored.assignee_id)
        .bind(&stored.reward_clue_id)
        .execute(&mut *tx)
        .await?;
      }

      for (pos, (clue, row_id)) in scene.clues.iter().zip(&clue_rows[order]).enumerate() {
        let stored = Clue { id: row_id.clone(), is_found: false, is_new: false, ..clue.clone() };
        sqlx::query("INSERT INTO clues (id, scene_id, position, body) VALUES (?, ?, ?, ?)")
          .bind(&stored.id)
          .bind(&scene_id)
          .bind(pos as i64)
          .bind(serde_json::to_string(&stored)?)
          .execute(&mut *tx)
          .await?;
      }
    }

    // Numbered by position; generated quizzes repeat ids.
    for (pos, q) in script.quiz.iter().enumerate() {
      sqlx::query("INSERT INTO quizzes (script_id, question_no, body) VALUES (?, ?, ?)")
        .bind(&script_id)
        .bind(pos as i64)
        .bind(serde_json::to_string(q)?)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(
      target: "store",
      %script_id,
      roles = script.roles.len(),
      scenes = scenes.len(),
      quiz = script.quiz.len(),
      official = user.is_none(),
      "Script published"
    );
    Ok(script_id)
  }

  /// Official scripts plus the caller's own, newest first.
  #[instrument(level = "debug", skip(self))]
  pub async fn list_scripts(&self, user: Option<&str>) -> Result<Vec<ScriptSummary>, StoreError> {
    let rows = sqlx::query("SELECT * FROM scripts WHERE is_official = 1 OR creator_id = ? ORDER BY rowid DESC")
      .bind(user)
      .fetch_all(&self.pool)
      .await?;
    rows
      .iter()
      .map(|row| -> Result<ScriptSummary, StoreError> {
        let script = script_header(row)?;
        let official: bool = row.try_get("is_official")?;
        Ok(ScriptSummary::of(&script, official))
      })
      .collect()
  }

  /// Full script ready to play: scenes in order, tasks open, clues hidden.
  #[instrument(level = "debug", skip(self))]
  pub async fn fetch_script(&self, id: &str) -> Result<Script, StoreError> {
    let row = sqlx::query("SELECT * FROM scripts WHERE id = ?")
      .bind(id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| StoreError::NotFound(format!("script {}", id)))?;
    let mut script = script_header(&row)?;

    script.roles = sqlx::query("SELECT * FROM roles WHERE script_id = ? ORDER BY rowid")
      .bind(id)
      .fetch_all(&self.pool)
      .await?
      .iter()
      .map(role_from_row)
      .collect::<Result<_, _>>()?;

    let scene_rows = sqlx::query("SELECT * FROM scenes WHERE script_id = ? ORDER BY order_index")
      .bind(id)
      .fetch_all(&self.pool)
      .await?;
    for row in &scene_rows {
      let mut scene = scene_from_row(row)?;
      let tasks = sqlx::query("SELECT body FROM tasks WHERE scene_id = ? ORDER BY position")
        .bind(&scene.id)
        .fetch_all(&self.pool)
        .await?;
      scene.tasks = tasks
        .iter()
        .map(|r| json_col::<Task>(r, "body").map(|t| Task { is_completed: false, ..t }))
        .collect::<Result<_, _>>()?;
      let clues = sqlx::query("SELECT body FROM clues WHERE scene_id = ? ORDER BY position")
        .bind(&scene.id)
        .fetch_all(&self.pool)
        .await?;
      scene.clues = clues
        .iter()
        .map(|r| json_col::<Clue>(r, "body").map(|c| Clue { is_found: false, is_new: false, ..c }))
        .collect::<Result<_, _>>()?;
      script.scenes.push(scene);
    }

    script.quiz = sqlx::query("SELECT body FROM quizzes WHERE script_id = ? ORDER BY question_no")
      .bind(id)
      .fetch_all(&self.pool)
      .await?
      .iter()
      .map(|r| json_col::<QuizQuestion>(r, "body"))
      .collect::<Result<_, _>>()?;

    if script.initial_scenario.is_empty() {
      script.initial_scenario = script
        .scenes
        .first()
        .map(|s| s.narrative.clone())
        .unwrap_or_else(|| script.description.clone());
    }
    Ok(script)
  }

  /// Anonymous players have nowhere to save to; that is not an error.
  #[instrument(level = "info", skip(self, record), fields(script_id = %record.script_id, score = record.quiz_score))]
  pub async fn save_progress(&self, user: Option<&str>, record: &ProgressRecord) -> Result<(), StoreError> {
    let Some(user) = user else {
      return Ok(());
    };
    sqlx::query(
      r#"INSERT INTO user_progress (user_id, script_id, quiz_score, transcript, ai_report, completed_at)
        VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(user)
    .bind(&record.script_id)
    .bind(record.quiz_score)
    .bind(serde_json::to_string(&record.transcript)?)
    .bind(record.ai_report.as_ref().map(serde_json::to_string).transpose()?)
    .bind(record.completed_at.to_rfc3339())
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  pub async fn progress_for(&self, user: &str) -> Result<Vec<ProgressRecord>, StoreError> {
    let rows = sqlx::query("SELECT * FROM user_progress WHERE user_id = ? ORDER BY id DESC")
      .bind(user)
      .fetch_all(&self.pool)
      .await?;
    rows
      .iter()
      .map(|row| -> Result<ProgressRecord, StoreError> {
        let report: Option<String> = row.try_get("ai_report")?;
        let completed: String = row.try_get("completed_at")?;
        Ok(ProgressRecord {
          script_id: row.try_get("script_id")?,
          quiz_score: row.try_get("quiz_score")?,
          transcript: json_col(row, "transcript")?,
          ai_report: report.map(|r| serde_json::from_str(&r)).transpose()?,
          completed_at: DateTime::parse_from_rfc3339(&completed)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        })
      })
      .collect()
  }

  #[instrument(level = "debug", skip(self, profile), fields(id = %profile.id))]
  pub async fn upsert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
    sqlx::query(
      r#"INSERT INTO profiles (id, display_name, avatar, updated_at) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, avatar = excluded.avatar,
          updated_at = excluded.updated_at"#,
    )
    .bind(&profile.id)
    .bind(&profile.display_name)
    .bind(&profile.avatar)
    .bind(Utc::now().to_rfc3339())
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  pub async fn profile(&self, user: &str) -> Result<Option<Profile>, StoreError> {
    let row = sqlx::query("SELECT id, display_name, avatar FROM profiles WHERE id = ?")
      .bind(user)
      .fetch_optional(&self.pool)
      .await?;
    row
      .map(|r| -> Result<Profile, StoreError> {
        Ok(Profile { id: r.try_get("id")?, display_name: r.try_get("display_name")?, avatar: r.try_get("avatar")? })
      })
      .transpose()
  }
}

/// Flat scripts are stored as a single scene carrying every task and clue.
fn legacy_scene(script: &Script) -> ScriptScene {
  ScriptScene {
    id: String::new(),
    title: LEGACY_SCENE_TITLE.into(),
    summary: LEGACY_SCENE_SUMMARY.into(),
    narrative: if script.initial_scenario.is_empty() { script.description.clone() } else { script.initial_scenario.clone() },
    asset_url: script.cover_image.clone(),
    tasks: script.tasks.clone(),
    clues: script.clues.clone(),
    ..Default::default()
  }
}

fn json_col<T: DeserializeOwned>(row: &SqliteRow, col: &str) -> Result<T, StoreError> {
  let raw: String = row.try_get(col)?;
  Ok(serde_json::from_str(&raw)?)
}

fn script_header(row: &SqliteRow) -> Result<Script, StoreError> {
  Ok(Script {
    id: row.try_get("id")?,
    title: row.try_get("title")?,
    description: row.try_get("description")?,
    cover_image: row.try_get("cover_image")?,
    background_image: row.try_get("background_image")?,
    curriculum: CurriculumInfo {
      subject: row.try_get("subject")?,
      version: row.try_get("version")?,
      grade: row.try_get("grade")?,
      unit: row.try_get("unit")?,
      knowledge_points: json_col(row, "knowledge_points")?,
      core_competencies: json_col(row, "core_competencies")?,
      teaching_focus: row.try_get("teaching_focus")?,
      teaching_difficulty: row.try_get("teaching_difficulty")?,
    },
    duration: row.try_get("duration")?,
    min_players: row.try_get("min_players")?,
    max_players: row.try_get("max_players")?,
    difficulty: row.try_get("difficulty")?,
    intro_slides: json_col(row, "intro_slides")?,
    initial_scenario: row.try_get("initial_scenario")?,
    ..Default::default()
  })
}

fn role_from_row(row: &SqliteRow) -> Result<Role, StoreError> {
  Ok(Role {
    id: row.try_get("id")?,
    name: row.try_get("name")?,
    avatar: row.try_get("avatar")?,
    portrait_large: row.try_get("portrait_large")?,
    description: row.try_get("description")?,
    objective: row.try_get("objective")?,
    detailed_profile: row.try_get("detailed_profile")?,
  })
}

fn scene_from_row(row: &SqliteRow) -> Result<ScriptScene, StoreError> {
  let order: i64 = row.try_get("order_index")?;
  let asset_type: String = row.try_get("asset_type")?;
  let options: Option<String> = row.try_get("generation_options")?;
  Ok(ScriptScene {
    id: row.try_get("id")?,
    act_id: order.to_string(),
    title: row.try_get("title")?,
    summary: row.try_get("summary")?,
    narrative: row.try_get("narrative")?,
    transition: row.try_get("transition_text")?,
    asset_type: serde_json::from_value(serde_json::Value::String(asset_type)).unwrap_or_default(),
    asset_description: row.try_get("asset_description")?,
    asset_prompt: row.try_get("asset_prompt")?,
    asset_url: row.try_get("asset_url")?,
    generation_options: options.map(|o| serde_json::from_str(&o)).transpose()?,
    is_edited: true,
    associated_role_ids: json_col(row, "associated_role_ids")?,
    ..Default::default()
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{ClueKind, QuestionType, TaskCategory, TaskType};

  async fn store() -> Store {
    Store::connect("sqlite::memory:").await.unwrap()
  }

  fn flat_script() -> Script {
    Script {
      id: "silk".into(),
      title: "丝路".into(),
      description: "驼队西行".into(),
      curriculum: CurriculumInfo { subject: "历史".into(), knowledge_points: vec!["丝绸之路".into()], ..Default::default() },
      duration: 45,
      roles: vec![Role { id: "r1".into(), name: "张骞".into(), ..Default::default() }],
      initial_scenario: "驼队停在玉门关外。".into(),
      tasks: vec![
        Task {
          id: "t1".into(),
          title: "城名".into(),
          kind: TaskType::Puzzle,
          category: TaskCategory::Main,
          correct_answer: Some("长安".into()),
          reward_clue_id: Some("c1,c2".into()),
          is_completed: true,
          ..Default::default()
        },
        Task {
          id: "t2".into(),
          title: "使命".into(),
          category: TaskCategory::Personal,
          assignee_id: Some("r1".into()),
          ..Default::default()
        },
      ],
      clues: vec![
        Clue { id: "c1".into(), title: "地图".into(), kind: ClueKind::History, is_found: true, ..Default::default() },
        Clue { id: "c2".into(), title: "文牒".into(), ..Default::default() },
      ],
      quiz: vec![QuizQuestion {
        id: 1,
        kind: QuestionType::Choice,
        question: "起点？".into(),
        options: Some(vec!["长安".into(), "洛阳".into()]),
        correct_answer: Some(0),
        ..Default::default()
      }],
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn flat_script_round_trips_through_a_synthetic_scene() {
    let store = store().await;
    let id = store.publish_script(&flat_script(), Some("teacher-1")).await.unwrap();
    let s = store.fetch_script(&id).await.unwrap();

    assert_eq!(s.scenes.len(), 1);
    assert_eq!(s.scenes[0].title, LEGACY_SCENE_TITLE);
    assert_eq!(s.scenes[0].summary, LEGACY_SCENE_SUMMARY);
    assert_eq!(s.curriculum.knowledge_points, vec!["丝绸之路".to_string()]);
    assert_eq!(s.quiz.len(), 1);
    assert_eq!(s.quiz[0].correct_answer, Some(0));

    let tasks = s.playable_tasks();
    let clues = s.playable_clues();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| !t.is_completed));
    assert!(clues.iter().all(|c| !c.is_found));

    // Remapped references still resolve.
    assert!(s.dangling_references().is_empty());
    assert_eq!(tasks[1].assignee_id.as_deref(), Some(s.roles[0].id.as_str()));
    assert_ne!(s.roles[0].id, "r1");
    let rewards = tasks[0].reward_clue_ids();
    assert_eq!(rewards, vec![clues[0].id.clone(), clues[1].id.clone()]);
  }

  #[tokio::test]
  async fn dangling_reference_writes_nothing() {
    let store = store().await;
    let mut bad = flat_script();
    bad.tasks[0].reward_clue_id = Some("c404".into());
    let err = store.publish_script(&bad, None).await.unwrap_err();
    assert!(matches!(err, StoreError::DanglingReference { kind: "reward clue", ref id } if id == "c404"));
    assert!(store.list_scripts(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn failed_insert_rolls_back_the_whole_publish() {
    let store = store().await;
    // Quiz rows go in last, after every other row is written.
    sqlx::query("CREATE TRIGGER no_quiz BEFORE INSERT ON quizzes BEGIN SELECT RAISE(ABORT, 'quiz rejected'); END")
      .execute(&store.pool)
      .await
      .unwrap();
    assert!(matches!(store.publish_script(&flat_script(), None).await, Err(StoreError::Database(_))));
    assert!(store.list_scripts(None).await.unwrap().is_empty());
    let (scenes,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scenes").fetch_one(&store.pool).await.unwrap();
    assert_eq!(scenes, 0);
  }

  #[tokio::test]
  async fn listing_is_scoped_to_official_and_own() {
    let store = store().await;
    let official = store.publish_script(&flat_script(), None).await.unwrap();
    let mine = store.publish_script(&flat_script(), Some("alice")).await.unwrap();
    let _theirs = store.publish_script(&flat_script(), Some("bob")).await.unwrap();

    let ids: Vec<String> = store.list_scripts(Some("alice")).await.unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![mine, official.clone()]);

    let anon = store.list_scripts(None).await.unwrap();
    assert_eq!(anon.len(), 1);
    assert!(anon[0].is_official);
    assert_eq!(anon[0].id, official);
  }

  #[tokio::test]
  async fn scene_scripts_keep_their_order() {
    let store = store().await;
    let mut s = flat_script();
    let (tasks, clues) = (std::mem::take(&mut s.tasks), std::mem::take(&mut s.clues));
    s.scenes = vec![
      ScriptScene { id: "a".into(), title: "出关".into(), tasks, ..Default::default() },
      ScriptScene { id: "b".into(), title: "西域".into(), clues, associated_role_ids: vec!["r1".into()], ..Default::default() },
    ];
    let id = store.publish_script(&s, None).await.unwrap();
    let back = store.fetch_script(&id).await.unwrap();
    let titles: Vec<&str> = back.scenes.iter().map(|sc| sc.title.as_str()).collect();
    assert_eq!(titles, vec!["出关", "西域"]);
    assert_eq!(back.scenes[1].act_id, "1");
    assert_eq!(back.scenes[1].associated_role_ids, vec![back.roles[0].id.clone()]);
    assert!(back.dangling_references().is_empty());
  }

  #[tokio::test]
  async fn repeated_generated_ids_publish_per_scene() {
    let store = store().await;
    let act = |title: &str, clue_title: &str| ScriptScene {
      title: title.into(),
      tasks: vec![Task { id: "t1".into(), title: title.into(), reward_clue_id: Some("c1".into()), ..Default::default() }],
      clues: vec![Clue { id: "c1".into(), title: clue_title.into(), ..Default::default() }],
      ..Default::default()
    };
    let mut s = flat_script();
    s.tasks.clear();
    s.clues.clear();
    s.scenes = vec![act("出关", "地图"), act("西域", "文牒")];
    let mut second = s.quiz[0].clone();
    second.question = "终点？".into();
    s.quiz.push(second);

    let id = store.publish_script(&s, None).await.unwrap();
    let back = store.fetch_script(&id).await.unwrap();

    let first = &back.scenes[0];
    let other = &back.scenes[1];
    assert_ne!(first.clues[0].id, other.clues[0].id);
    assert_eq!(first.tasks[0].reward_clue_ids(), vec![first.clues[0].id.clone()]);
    assert_eq!(other.tasks[0].reward_clue_ids(), vec![other.clues[0].id.clone()]);
    assert_eq!(other.clues[0].title, "文牒");

    let questions: Vec<&str> = back.quiz.iter().map(|q| q.question.as_str()).collect();
    assert_eq!(questions, vec!["起点？", "终点？"]);
  }

  #[tokio::test]
  async fn reward_falls_back_to_a_clue_in_another_scene() {
    let store = store().await;
    let mut s = flat_script();
    let (tasks, clues) = (std::mem::take(&mut s.tasks), std::mem::take(&mut s.clues));
    s.scenes = vec![
      ScriptScene { title: "出关".into(), tasks, ..Default::default() },
      ScriptScene { title: "西域".into(), clues, ..Default::default() },
    ];
    let id = store.publish_script(&s, None).await.unwrap();
    let back = store.fetch_script(&id).await.unwrap();
    let clue_ids: Vec<String> = back.scenes[1].clues.iter().map(|c| c.id.clone()).collect();
    assert_eq!(back.scenes[0].tasks[0].reward_clue_ids(), clue_ids);
  }

  #[tokio::test]
  async fn progress_needs_a_user() {
    let store = store().await;
    let record = ProgressRecord {
      script_id: "silk".into(),
      quiz_score: 3,
      transcript: vec!["[张骞]: 出发".into()],
      ai_report: None,
      completed_at: Utc::now(),
    };
    store.save_progress(None, &record).await.unwrap();
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_progress").fetch_one(&store.pool).await.unwrap();
    assert_eq!(n, 0);

    store.save_progress(Some("alice"), &record).await.unwrap();
    let saved = store.progress_for("alice").await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].transcript, record.transcript);
  }

  #[tokio::test]
  async fn profiles_upsert() {
    let store = store().await;
    assert!(store.ping().await);
    assert_eq!(store.profile("alice").await.unwrap(), None);
    let mut p = Profile { id: "alice".into(), display_name: "Alice".into(), avatar: None };
    store.upsert_profile(&p).await.unwrap();
    p.display_name = "李老师".into();
    store.upsert_profile(&p).await.unwrap();
    assert_eq!(store.profile("alice").await.unwrap(), Some(p));
  }

  #[tokio::test]
  async fn missing_script_is_not_found() {
    let store = store().await;
    assert!(matches!(store.fetch_script("nope").await, Err(StoreError::NotFound(_))));
  }
}
