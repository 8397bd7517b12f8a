//! System-instruction assembly for the workshop pipeline.
//!
//! Block order is fixed: core → stage → structure → subject → closing directive.
//! Later blocks narrow what earlier ones say, so never reorder them.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

/// Workshop pipeline stage whose rule block is looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Analysis,
    Outline,
    Roles,
    Finalize,
    Quiz,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Analysis => "analysis",
            Stage::Outline => "outline",
            Stage::Roles => "roles",
            Stage::Finalize => "finalize",
            Stage::Quiz => "quiz",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        [Stage::Analysis, Stage::Outline, Stage::Roles, Stage::Finalize, Stage::Quiz]
            .into_iter()
            .find(|s| s.as_str() == key)
    }
}

#[derive(Clone, Debug)]
pub struct RuleBook {
    pub core: String,
    pub steps: HashMap<Stage, String>,
    pub structure: String,
    pub subjects: HashMap<String, String>,
    pub closing: String,
}

/// Partial override read from TOML (`[rules]` table). Missing keys keep defaults;
/// map entries are merged per key.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RulesCfg {
    #[serde(default)] pub core: Option<String>,
    #[serde(default)] pub structure: Option<String>,
    #[serde(default)] pub closing: Option<String>,
    /// Keyed by stage name (`analysis`, `outline`, `roles`, `finalize`, `quiz`).
    #[serde(default)] pub steps: HashMap<String, String>,
    #[serde(default)] pub subjects: HashMap<String, String>,
}

impl Default for RuleBook {
    fn default() -> Self {
        let steps = HashMap::from([
            (Stage::Analysis, "【教材解析】提炼单元名称、3-8 个核心知识点、学科核心素养、教学重点与难点。知识点必须来自教材原文，禁止编造。".to_string()),
            (Stage::Outline, "【大纲设计】按“幕”组织剧情，每一幕对应一个知识点和一项可观察的考查内容；各幕时长之和应接近总时长。".to_string()),
            (Stage::Roles, "【角色设计】设计 4-6 个认知角色，每个角色承担不同的认知功能与知识责任，角色之间必须存在协作依赖。输出 JSON 字段 cognitiveRoles。".to_string()),
            (Stage::Finalize, "【剧本渲染】为每一幕生成场景：叙事正文、素材描述与生成提示词、1-3 个任务和相关线索。任务类型只能是 discussion、puzzle、choice、matching。".to_string()),
            (Stage::Quiz, "【习题生成】围绕剧本涉及的知识点生成 5-8 道习题，选择题给出 4 个选项与正确选项下标，简答题给出评分要点。输出 JSON 字段 quiz。".to_string()),
        ]);
        let subjects = HashMap::from([
            ("历史".to_string(), "【历史学科】严格尊重史实，时间、人物、事件不得虚构；虚构角色只能作为视角，不得改变历史结局。".to_string()),
            ("语文".to_string(), "【语文学科】引用原文须准确，注重文本细读与语言品味。".to_string()),
            ("地理".to_string(), "【地理学科】空间位置、气候与地形描述必须准确，鼓励读图分析。".to_string()),
            ("政治".to_string(), "【道德与法治】价值导向正确，案例贴近学生生活。".to_string()),
        ]);
        Self {
            core: "你是“学伴球球”剧本创作引擎，为中小学课堂设计沉浸式角色扮演剧本。剧情服务于教学目标，语言生动但适合学生年龄。".into(),
            steps,
            structure: "【结构规范】所有 id 使用简短英文字符串且在同类中唯一；引用其他对象时只能使用已出现的 id。".into(),
            subjects,
            closing: "【输出纪律】必须严格使用中文。生成的 JSON 必须符合 schema。".into(),
        }
    }
}

impl RuleBook {
    pub fn with_overrides(cfg: &RulesCfg) -> Self {
        let mut book = RuleBook::default();
        if let Some(core) = &cfg.core { book.core = core.clone(); }
        if let Some(structure) = &cfg.structure { book.structure = structure.clone(); }
        if let Some(closing) = &cfg.closing { book.closing = closing.clone(); }
        for (key, text) in &cfg.steps {
            match Stage::from_key(key) {
                Some(stage) => { book.steps.insert(stage, text.clone()); }
                None => warn!(target: "edurealm", %key, "Ignoring rule override for unknown stage"),
            }
        }
        for (subject, text) in &cfg.subjects {
            book.subjects.insert(subject.clone(), text.clone());
        }
        book
    }

    /// Build the system instruction for one pipeline call.
    pub fn system_instruction(&self, stage: Stage, subject: Option<&str>, structured: bool) -> String {
        let mut prompt = String::new();
        push_block(&mut prompt, &self.core);
        if let Some(step) = self.steps.get(&stage) {
            push_block(&mut prompt, step);
        }
        if structured {
            push_block(&mut prompt, &self.structure);
        }
        if let Some(rules) = subject.filter(|s| !s.is_empty()).and_then(|s| self.subjects.get(s)) {
            push_block(&mut prompt, rules);
        }
        prompt.push_str(&self.closing);
        prompt
    }
}

fn push_block(out: &mut String, block: &str) {
    out.push_str(block);
    out.push_str("\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> RuleBook {
        RuleBook {
            core: "CORE".into(),
            steps: HashMap::from([(Stage::Outline, "STEP".to_string())]),
            structure: "STRUCT".into(),
            subjects: HashMap::from([("历史".to_string(), "SUBJ".to_string())]),
            closing: "END".into(),
        }
    }

    #[test]
    fn blocks_appear_in_fixed_order() {
        let p = book().system_instruction(Stage::Outline, Some("历史"), true);
        assert_eq!(p, "CORE\n\nSTEP\n\nSTRUCT\n\nSUBJ\n\nEND");
    }

    #[test]
    fn absent_blocks_are_omitted() {
        let b = book();
        assert_eq!(b.system_instruction(Stage::Quiz, None, false), "CORE\n\nEND");
        assert_eq!(b.system_instruction(Stage::Outline, Some(""), false), "CORE\n\nSTEP\n\nEND");
        assert_eq!(b.system_instruction(Stage::Outline, Some("物理"), true), "CORE\n\nSTEP\n\nSTRUCT\n\nEND");
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let cfg: RulesCfg = toml::from_str(
            r#"
            closing = "OUTPUT JSON"
            [steps]
            quiz = "QUIZ RULES"
            [subjects]
            "物理" = "PHYSICS"
            "#,
        )
        .unwrap();
        let b = RuleBook::with_overrides(&cfg);
        let p = b.system_instruction(Stage::Quiz, Some("物理"), false);
        assert!(p.contains("QUIZ RULES"));
        assert!(p.contains("PHYSICS"));
        assert!(p.ends_with("OUTPUT JSON"));
        // Untouched defaults survive.
        assert!(b.subjects.contains_key("历史"));
        assert!(b.steps.contains_key(&Stage::Analysis));
    }
}
