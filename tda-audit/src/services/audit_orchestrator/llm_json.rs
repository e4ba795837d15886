//! Parsing structured answers out of model completions
//!
//! Models wrap JSON in prose or Markdown fences; the first balanced JSON
//! object or array in the completion is taken.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmOutputError {
    #[error("no JSON value in completion")]
    NoJson,

    #[error("completion JSON does not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Deserialize the first JSON object or array found in `completion`
pub fn parse_llm_json<T: DeserializeOwned>(completion: &str) -> Result<T, LlmOutputError> {
    let raw = extract_json(completion).ok_or(LlmOutputError::NoJson)?;
    Ok(serde_json::from_str(raw)?)
}

fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(|c| c == '{' || c == '[')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
