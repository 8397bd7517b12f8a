//! Turning raw model text into JSON.
//!
//! Models asked for JSON still like to wrap it in Markdown fences or chat around it.
//! We strip fences, then look for a balanced `{...}` span using a scanner that knows
//! about string literals and escapes, so braces inside values don't end the object early
//! and braces in surrounding prose don't start one. If no balanced span parses we fall
//! back to the widest first-`{`/last-`}` slice.

use serde::de::DeserializeOwned;

use crate::error::ParseError;

const FENCE: &str = "```";

/// Remove every code-fence marker (and a language tag glued to it, e.g. ```` ```json ````).
pub fn strip_fences(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut rest = text;
  while let Some(pos) = rest.find(FENCE) {
    out.push_str(&rest[..pos]);
    rest = &rest[pos + FENCE.len()..];
    let tag_len = rest
      .find(|c: char| !c.is_ascii_alphanumeric())
      .unwrap_or(rest.len());
    rest = &rest[tag_len..];
  }
  out.push_str(rest);
  out.trim().to_string()
}

/// Byte index of the `}` closing the object opened at `start`, if any.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
  let mut depth = 0usize;
  let mut in_string = false;
  let mut escaped = false;

  for (i, ch) in text[start..].char_indices() {
    if in_string {
      if escaped {
        escaped = false;
      } else if ch == '\\' {
        escaped = true;
      } else if ch == '"' {
        in_string = false;
      }
      continue;
    }
    match ch {
      '"' => in_string = true,
      '{' => depth += 1,
      '}' => {
        depth = depth.saturating_sub(1);
        if depth == 0 {
          return Some(start + i);
        }
      }
      _ => {}
    }
  }
  None
}

/// Extract the JSON object text from a model response.
pub fn sanitize(text: &str) -> Result<String, ParseError> {
  let cleaned = strip_fences(text);

  for (start, _) in cleaned.match_indices('{') {
    if let Some(end) = balanced_end(&cleaned, start) {
      let span = &cleaned[start..=end];
      if matches!(serde_json::from_str::<serde_json::Value>(span), Ok(v) if v.is_object()) {
        return Ok(span.to_string());
      }
    }
  }

  // Legacy heuristic: first '{' .. last '}'.
  let (Some(first), Some(last)) = (cleaned.find('{'), cleaned.rfind('}')) else {
    return Err(ParseError::NoJsonObject);
  };
  if last < first {
    return Err(ParseError::NoJsonObject);
  }
  let span = &cleaned[first..=last];
  serde_json::from_str::<serde_json::Value>(span)?;
  Ok(span.to_string())
}

/// Sanitize then deserialize into the stage's result type.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
  let span = sanitize(text)?;
  Ok(serde_json::from_str::<T>(&span)?)
}
