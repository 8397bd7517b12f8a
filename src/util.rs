//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Split a comma-separated id list ("c1, c2,,c3") into trimmed, non-empty ids.
pub fn split_ids(list: &str) -> Vec<String> {
  list
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

/// Log-safe truncation for large strings, on a char boundary.
pub fn trunc_for_log(s: &str, max_chars: usize) -> String {
  let count = s.chars().count();
  if count <= max_chars {
    s.to_string()
  } else {
    let head: String = s.chars().take(max_chars).collect();
    format!("{}… ({} chars total)", head, count)
  }
}

/// Wall-clock "HH:MM" used on timeline entries.
pub fn clock_hhmm() -> String {
  chrono::Local::now().format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn split_ids_trims_and_drops_empty() {
    assert_eq!(split_ids("csy4,csy5"), vec!["csy4", "csy5"]);
    assert_eq!(split_ids(" c1 , ,c2 "), vec!["c1", "c2"]);
    assert!(split_ids("").is_empty());
  }

  #[test]
  fn template_fills_known_keys_only() {
    let out = fill_template("为《{unit}》设计大纲，时长{duration}min {other}", &[("unit", "第6课"), ("duration", "40")]);
    assert_eq!(out, "为《第6课》设计大纲，时长40min {other}");
  }

  #[test]
  fn truncation_respects_multibyte_chars() {
    assert_eq!(trunc_for_log("长安城", 5), "长安城");
    assert!(trunc_for_log("长安城的西市", 2).starts_with("长安…"));
  }
}
