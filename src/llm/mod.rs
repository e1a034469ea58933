//! OCR through an OpenAI-compatible vision model.

pub mod client;

use serde_json::Value;

use crate::db::normalize_tags;

pub use client::{LlmClient, LlmError};

/// Upper bound on tags suggested per image
pub const MAX_SUGGESTED_TAGS: usize = 5;

/// Text and tag suggestions extracted from one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrResult {
    pub text: String,
    pub suggested_tags: Vec<String>,
}

/// Remove a surrounding ```` ``` ```` fence if the reply is wrapped in one.
pub fn strip_markdown_fence(payload: &str) -> String {
    let trimmed = payload.trim();
    let lines: Vec<&str> = trimmed.lines().collect();

    if lines.len() >= 2
        && lines[0].starts_with("```")
        && lines[lines.len() - 1].starts_with("```")
    {
        return lines[1..lines.len() - 1].join("\n").trim().to_string();
    }

    trimmed.to_string()
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
    )
}

/// Interpret the model's reply.
///
/// A JSON object yields text from `ocr_text` (or `text`) and tags from
/// `suggested_tags` (or `tags`). Anything else is taken verbatim as the text.
pub fn parse_ocr_response(content: &str) -> OcrResult {
    let sanitized = strip_markdown_fence(content);

    let (text, tags) = match serde_json::from_str::<Value>(&sanitized) {
        Ok(Value::Object(map)) => {
            let text = ["ocr_text", "text"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .filter(|text| !text.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| sanitized.clone());
            let tags = string_list(map.get("suggested_tags"))
                .or_else(|| string_list(map.get("tags")))
                .unwrap_or_default();
            (text, tags)
        }
        _ => {
            tracing::debug!("LLM reply is not a JSON object, using raw content");
            (sanitized.clone(), Vec::new())
        }
    };

    let mut suggested_tags = normalize_tags(&tags);
    suggested_tags.truncate(MAX_SUGGESTED_TAGS);

    OcrResult {
        text: text.trim().to_string(),
        suggested_tags,
    }
}
