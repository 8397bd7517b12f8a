//! Built-in scripts that ship with the binary.
//!
//! They are always listed next to stored scripts and keep the app playable with no
//! database. All are trimmed excerpts: enough roles, tasks and clues to exercise every
//! task type, reward chains and plot playback.

use crate::domain::{
  Clue, ClueKind, CurriculumInfo, PlotSlide, QuestionType, QuizQuestion, Role, Script, Task, TaskCategory,
  TaskType,
};

pub const SILK_ROAD_ID: &str = "script_silk_road_001";
pub const SHANG_YANG_ID: &str = "script_shang_yang_002";
pub const WUXU_REFORM_ID: &str = "script_wuxu_003";
pub const OCTOBER_REVOLUTION_ID: &str = "script_oct_rev_004";

pub fn bundled_scripts() -> Vec<Script> {
  vec![silk_road(), shang_yang(), wuxu_reform(), october_revolution()]
}

fn role(id: &str, name: &str, avatar: &str, description: &str, objective: &str) -> Role {
  Role {
    id: id.into(),
    name: name.into(),
    avatar: avatar.into(),
    description: description.into(),
    objective: objective.into(),
    ..Default::default()
  }
}

fn clue(id: &str, title: &str, content: &str, detail: &str) -> Clue {
  Clue {
    id: id.into(),
    title: title.into(),
    content: content.into(),
    knowledge_detail: Some(detail.into()),
    kind: ClueKind::History,
    ..Default::default()
  }
}

fn slide(text: &str) -> PlotSlide {
  PlotSlide { text: text.into(), ..Default::default() }
}

fn choice(id: u32, question: &str, options: [&str; 4], correct: u32, explanation: &str) -> QuizQuestion {
  QuizQuestion {
    id,
    kind: QuestionType::Choice,
    question: question.into(),
    options: Some(options.iter().map(|o| o.to_string()).collect()),
    correct_answer: Some(correct),
    explanation: explanation.into(),
    material: None,
  }
}

fn silk_road() -> Script {
  Script {
    id: SILK_ROAD_ID.into(),
    title: "丝路驼铃：失落的通关文牒".into(),
    description: "西汉汉武帝时期，一支东归商队在玉门关外遭沙尘暴，通关文牒失踪，被守将限期自证清白。".into(),
    curriculum: CurriculumInfo {
      subject: "历史".into(),
      version: "人教版（2024新课标）".into(),
      grade: "七年级上册".into(),
      unit: "第14课 沟通中外文明的“丝绸之路”".into(),
      knowledge_points: vec!["张骞通西域".into(), "丝绸之路的路线".into(), "中外物种交流".into()],
      core_competencies: vec!["时空观念".into(), "史料实证".into()],
      teaching_focus: Some("张骞通西域的历史意义及丝绸之路的影响。".into()),
      teaching_difficulty: None,
    },
    duration: 45,
    min_players: 3,
    max_players: 7,
    difficulty: 3,
    roles: vec![
      role("r1", "张骞随从", "📜", "跟随张骞出使西域多年的记录官。", "利用地理知识证明商队身份，保护汉朝地图不被窃取。"),
      role("r2", "西域向导", "🐫", "祖辈世代为往来商队引路。", "协助辨别货物来源，证明贸易性质。"),
      role("r3", "粟特商人", "💰", "来自中亚粟特城邦的资深商人。", "证明所带物种为西域原产，洗清“销赃”嫌疑。"),
    ],
    intro_slides: vec![slide("玉门关外驿站，风沙未停，地上散落着货物、匈奴兽牙、皮靴印。")],
    initial_scenario: "第一幕：玉门惊变。守将按剑而立：“一炷香内找回文牒并自证清白，否则全员下狱问斩！”".into(),
    tasks: vec![
      Task {
        id: "t1".into(),
        title: "地理之志：丝路起点".into(),
        mission: "说出商队此行的起点城市。".into(),
        description: "《西域山川图志》的首页被风沙磨去了一角：____—河西走廊—西域—中亚。".into(),
        category: TaskCategory::Main,
        kind: TaskType::Puzzle,
        correct_answer: Some("长安".into()),
        reward_clue_id: Some("c_xiyu_atlas".into()),
        plot_update: Some("张骞随从：“出敦煌西至玉门关，再往西域便分南北两道！”守将的神色缓和了几分。".into()),
        knowledge_point: Some("丝绸之路的路线".into()),
        ..Default::default()
      },
      Task {
        id: "t2".into(),
        title: "奇珍辨源".into(),
        mission: "葡萄、石榴、核桃从何处传入中原？".into(),
        category: TaskCategory::Main,
        kind: TaskType::Choice,
        options: Some(vec!["西域".into(), "江南".into(), "岭南".into()]),
        correct_answer: Some("西域".into()),
        reward_clue_id: Some("c_trade_records".into()),
        knowledge_point: Some("中外物种交流".into()),
        ..Default::default()
      },
      Task {
        id: "t3".into(),
        title: "向导的证词".into(),
        mission: "向守将讲述一段你引路时见过的西域风俗。".into(),
        category: TaskCategory::Personal,
        assignee_id: Some("r2".into()),
        kind: TaskType::Discussion,
        ..Default::default()
      },
    ],
    clues: vec![
      clue(
        "c_xiyu_atlas",
        "《西域山川图志》",
        "上面标注着路线：长安—河西走廊—西域—中亚—西亚—欧洲（大秦）。",
        "商队赖以生存的地理向导，记录了张骞开辟的丝路全线。",
      ),
      clue(
        "c_trade_records",
        "商队贸易清单",
        "丝绸、铁器西去，葡萄、石榴、良马东来。",
        "丝绸之路促进了东西方物种与技术的交流。",
      ),
    ],
    quiz: vec![
      choice(1, "张骞出使西域的出发地是？", ["洛阳", "长安", "敦煌", "咸阳"], 1, "西汉都城长安是丝绸之路的起点。"),
      QuizQuestion {
        id: 2,
        kind: QuestionType::Short,
        question: "丝绸之路对汉朝有什么意义？".into(),
        explanation: "促进经济文化交流，加强汉朝与西域的联系。".into(),
        ..Default::default()
      },
    ],
    ..Default::default()
  }
}

fn shang_yang() -> Script {
  Script {
    id: SHANG_YANG_ID.into(),
    title: "铁血秦风：商鞅的抉择".into(),
    description: "战国时期，秦国积贫积弱。秦孝公发布求贤令，商鞅入秦欲行变法，旧贵族百般阻挠。".into(),
    curriculum: CurriculumInfo {
      subject: "历史".into(),
      version: "人教版（2024新课标）".into(),
      grade: "七年级上册".into(),
      unit: "第6课 战国时期的社会变革".into(),
      knowledge_points: vec!["商鞅变法内容".into(), "立木为信".into(), "废井田制".into(), "推行县制".into()],
      core_competencies: vec!["历史解释".into(), "史料分析".into()],
      teaching_focus: Some("商鞅变法的主要内容及其对秦国强盛的作用。".into()),
      teaching_difficulty: Some("变法各项措施之间的内在逻辑联系。".into()),
    },
    duration: 40,
    min_players: 3,
    max_players: 7,
    difficulty: 4,
    roles: vec![
      role("r_sy_1", "法家门徒", "📜", "商鞅的死忠追随者，深信“治世不一道”。", "协助商鞅推行新法，从生产力角度反驳旧贵族。"),
      role("r_sy_2", "秦国老世族", "🦁", "拥有大量封地的旧贵族代表。", "维护世袭特权，质疑变法的合法性。"),
      role("r_sy_3", "新军将领", "⚔️", "渴望通过军功改变命运的平民将领。", "支持军功爵制，打破贵族垄断。"),
    ],
    initial_scenario: "第一幕：廷议变法。商鞅展开竹简，高声宣读变法草案：“废井田、开阡陌……”老世族猛地拍案而起。".into(),
    tasks: vec![
      Task {
        id: "t_sy_1".into(),
        title: "富秦之基：废井田之辩".into(),
        mission: "陈明废除井田制、允许土地买卖何以成为“富秦之基”。".into(),
        category: TaskCategory::Main,
        kind: TaskType::Discussion,
        reward_clue_id: Some("csy1".into()),
        plot_update: Some("秦孝公微微颔首：“耕织者多而粮足，此理审明。”".into()),
        knowledge_point: Some("废井田制".into()),
        ..Default::default()
      },
      Task {
        id: "t_sy_2".into(),
        title: "南门立木".into(),
        mission: "商鞅在国都南门立了一根木头，用什么取信于民？".into(),
        category: TaskCategory::Main,
        kind: TaskType::Puzzle,
        correct_answer: Some("五十金".into()),
        reward_clue_id: Some("csy2".into()),
        knowledge_point: Some("立木为信".into()),
        ..Default::default()
      },
      Task {
        id: "t_sy_3".into(),
        title: "军功之路".into(),
        mission: "说说军功爵制对你这样的平民将领意味着什么。".into(),
        category: TaskCategory::Personal,
        assignee_id: Some("r_sy_3".into()),
        kind: TaskType::Discussion,
        ..Default::default()
      },
    ],
    clues: vec![
      clue("csy1", "《垦草令》核心摘要", "“劝民垦荒，地广则粮足，粮足则兵强。”", "通过法律手段诱导荒地开垦，扩大税基。"),
      clue("csy2", "南门告示", "“能徙此木置北门者，予五十金。”", "立木为信，树立了新法的威信。"),
    ],
    quiz: vec![
      choice(1, "商鞅变法中，直接打击了旧贵族世袭特权的措施是？", ["废除井田制", "奖励军功", "建立县制", "统一度量衡"], 1, "奖励军功，按功授爵，打破贵族特权垄断。"),
      choice(2, "商鞅变法确立的哪项措施加强了中央对地方的管辖？", ["奖励耕织", "废除井田", "推行县制", "统一度量衡"], 2, "县制由国君直接派官治理，加强了中央集权。"),
    ],
    ..Default::default()
  }
}

fn wuxu_reform() -> Script {
  Script {
    id: WUXU_REFORM_ID.into(),
    title: "维新变奏：戊戌年的至暗时刻".into(),
    description: "1898年9月，顽固派疯狂反扑，光绪帝被囚，维新党人命悬一线。你能否保存变法的火种？".into(),
    curriculum: CurriculumInfo {
      subject: "历史".into(),
      version: "人教版".into(),
      grade: "八年级上册".into(),
      unit: "第6课 戊戌变法".into(),
      knowledge_points: vec!["百日维新".into(), "公车上书".into(), "戊戌政变".into()],
      core_competencies: vec!["家国情怀".into(), "历史解释".into()],
      teaching_focus: None,
      teaching_difficulty: None,
    },
    duration: 50,
    min_players: 4,
    max_players: 6,
    difficulty: 5,
    roles: vec![
      role("r_wx_1", "谭嗣同门生", "🎓", "深受谭嗣同教诲的年轻学子。", "保护密诏，尽可能劝说老师撤离。"),
      role("r_wx_2", "光绪帝密使", "🕵️", "手持衣带诏，寻找袁世凯求援。", "辨别谁是真正的盟友，传达皇帝旨意。"),
      role("r_wx_3", "时务报记者", "📰", "记录变法全过程，拥有广泛的情报网。", "记录历史真相，揭露顽固派的阴谋。"),
    ],
    intro_slides: vec![
      slide("1898年，甲午战败的阴云笼罩中华。列强瓜分，国将不国。"),
      slide("光绪皇帝任用康有为、梁启超等人，颁布明定国是诏，史称“百日维新”。"),
    ],
    initial_scenario: "北京城，浏阳会馆深夜。谭嗣同正襟危坐，窗外满是抓捕维新党人的清兵脚步声。".into(),
    tasks: vec![
      Task {
        id: "t_wx_1".into(),
        title: "识别衣带诏".into(),
        mission: "确认皇帝的真实旨意，防止被假情报欺骗。".into(),
        category: TaskCategory::Main,
        kind: TaskType::Choice,
        options: Some(vec!["普通的请安折子".into(), "写在衣带上的血书密诏".into(), "慈禧的手谕".into()]),
        correct_answer: Some("写在衣带上的血书密诏".into()),
        plot_update: Some("密诏确认无疑！形势万分危急，必须立即通知康梁二人撤离北京！".into()),
        ..Default::default()
      },
      Task {
        id: "t_wx_2".into(),
        title: "菜市口诀别".into(),
        mission: "补全谭嗣同的绝命诗：“我自横刀向天笑，去留肝胆____。”".into(),
        category: TaskCategory::Main,
        kind: TaskType::Puzzle,
        correct_answer: Some("两昆仑".into()),
        reward_clue_id: Some("cwx1".into()),
        plot_update: Some("“死得其所，快哉快哉！”谭嗣同英勇就义。他的血唤醒了无数沉睡的国人。".into()),
        knowledge_point: Some("戊戌政变".into()),
        ..Default::default()
      },
    ],
    clues: vec![clue(
      "cwx1",
      "袁世凯的日记",
      "记录了他当晚的真实想法，似乎早已倒向后党。",
      "袁世凯的出卖是变法失败的直接原因之一，也暴露了维新派寄希望于军阀的不可靠。",
    )],
    quiz: vec![choice(
      1,
      "戊戌变法失败的根本原因是？",
      ["袁世凯告密", "光绪帝没有实权", "民族资产阶级力量弱小", "慈禧太后太强大"],
      2,
      "民族资本主义发展不充分，民族资产阶级具有软弱性和妥协性。",
    )],
    ..Default::default()
  }
}

fn october_revolution() -> Script {
  Script {
    id: OCTOBER_REVOLUTION_ID.into(),
    title: "红色风暴：阿芙乐尔的炮声".into(),
    description: "1917年11月6日晚，彼得格勒寒风刺骨。列宁秘密回到彼得格勒，亲自指挥起义。".into(),
    curriculum: CurriculumInfo {
      subject: "历史".into(),
      version: "人教版".into(),
      grade: "九年级下册".into(),
      unit: "第9课 列宁与十月革命".into(),
      knowledge_points: vec!["二月革命".into(), "四月提纲".into(), "彼得格勒武装起义".into(), "苏维埃政权的建立".into()],
      core_competencies: vec!["唯物史观".into(), "时空观念".into()],
      teaching_focus: None,
      teaching_difficulty: None,
    },
    duration: 50,
    min_players: 4,
    max_players: 6,
    difficulty: 4,
    roles: vec![
      role("r_or_1", "赤卫队队长", "🚩", "彼得格勒普提洛夫工厂的工人领袖。", "指挥工人赤卫队占领关键据点。"),
      role("r_or_2", "阿芙乐尔号水兵", "⚓", "波罗的海舰队的水兵，激进的布尔什维克。", "控制军舰，等待开炮信号。"),
      role("r_or_3", "前线回来的士兵", "🔫", "从一战前线溃退回来的士兵，厌恶战争。", "说服卫戍部队倒戈支持起义。"),
    ],
    intro_slides: vec![
      slide("1917年，第一次世界大战让俄国陷入崩溃边缘。前线溃败，后方饥荒。"),
      slide("11月6日晚（俄历10月24日），起义的风暴在涅瓦河畔爆发。"),
    ],
    initial_scenario: "彼得格勒，涅瓦河畔。斯莫尔尼宫灯火通明，起义部队正在集结，但通往市中心的桥梁被封锁。".into(),
    tasks: vec![
      Task {
        id: "t_or_1".into(),
        title: "炮打冬宫".into(),
        mission: "阿芙乐尔号准备开炮震慑冬宫，这一炮是实弹还是空包弹？".into(),
        category: TaskCategory::Main,
        kind: TaskType::Choice,
        options: Some(vec!["实弹".into(), "空包弹".into()]),
        correct_answer: Some("空包弹".into()),
        reward_clue_id: Some("cor1".into()),
        plot_update: Some("“轰！”一声巨响划破夜空。赤卫队向冬宫发起了总攻。".into()),
        ..Default::default()
      },
      Task {
        id: "t_or_2".into(),
        title: "颁布法令".into(),
        mission: "列宁宣读了《和平法令》和另一项关于农民土地问题的法令：《____法令》。".into(),
        category: TaskCategory::Main,
        kind: TaskType::Puzzle,
        correct_answer: Some("土地".into()),
        plot_update: Some("苏维埃政权建立了。第一个无产阶级专政的国家诞生了！".into()),
        knowledge_point: Some("苏维埃政权的建立".into()),
        ..Default::default()
      },
      Task {
        id: "t_or_3".into(),
        title: "战壕来信".into(),
        mission: "向卫戍部队讲述前线的见闻，说服他们倒戈。".into(),
        category: TaskCategory::Personal,
        assignee_id: Some("r_or_3".into()),
        kind: TaskType::Discussion,
        ..Default::default()
      },
    ],
    clues: vec![clue(
      "cor1",
      "列宁的手稿",
      "上面写满了关于起义的具体部署。",
      "列宁的《四月提纲》指明了从资产阶级民主革命向社会主义革命转变的方向。",
    )],
    quiz: vec![choice(
      1,
      "十月革命的性质是？",
      ["资产阶级民主革命", "社会主义革命", "农民起义", "民族独立战争"],
      1,
      "十月革命是人类历史上第一次胜利的社会主义革命。",
    )],
    ..Default::default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bundled_scripts_are_self_consistent() {
    for s in bundled_scripts() {
      assert!(s.dangling_references().is_empty(), "{} has dangling references", s.id);
      assert!(!s.roles.is_empty());
      assert!(!s.initial_scenario.is_empty());
    }
  }

  #[test]
  fn silk_road_carries_the_changan_puzzle() {
    let s = bundled_scripts().into_iter().find(|s| s.id == SILK_ROAD_ID).unwrap();
    let t = s.tasks.iter().find(|t| t.correct_answer.as_deref() == Some("长安")).unwrap();
    assert_eq!(t.kind, TaskType::Puzzle);
    assert_eq!(t.reward_clue_ids(), vec!["c_xiyu_atlas".to_string()]);
  }

  #[test]
  fn catalogue_lists_every_bundled_script() {
    let ids: Vec<String> = bundled_scripts().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![SILK_ROAD_ID, SHANG_YANG_ID, WUXU_REFORM_ID, OCTOBER_REVOLUTION_ID]);
  }
}
