//! Tolerant parsing of free-form model output into a [`SkillExtraction`].
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::SkillExtraction;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:json)?").expect("code fence pattern is valid"));

/// Strip surrounding code fences and cut out the first balanced `{...}`
/// object. Falls back to the trimmed text when no balanced object exists.
pub fn extract_json_candidate(text: &str) -> String {
    let mut candidate = text.trim().to_string();
    if candidate.starts_with("```") {
        candidate = CODE_FENCE.replace_all(&candidate, "").trim().to_string();
    }
    match first_balanced_object(&candidate) {
        Some(object) => object.to_string(),
        None => candidate,
    }
}

/// Brace matching that ignores braces inside JSON string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
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
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse model output. `None` means the output is unusable: not JSON, or
/// `requiredSkills` missing or not an array.
pub fn parse_model_output(text: &str) -> Option<SkillExtraction> {
    let parsed: Value = serde_json::from_str(&extract_json_candidate(text)).ok()?;
    let skills = parsed.get("requiredSkills")?.as_array()?;

    let required_skills = skills
        .iter()
        .map(|skill| match skill {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let notes = match parsed.get("notes") {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    };

    Some(SkillExtraction {
        required_skills,
        notes,
    })
}
