use serde_json::{Map, Value};

use archbot_core::content_map;

use crate::engine::ModelOutput;

/// Turn a model answer into a JSON object. Never fails.
///
/// Structured answers carrying any of `expected_keys` are returned as-is.
/// A structured answer that only wraps text in `content` is unwrapped and
/// searched like raw text. Raw text is searched with `extract_object`. If
/// nothing parses the result is `{"content": text}`.
pub fn interpret(output: ModelOutput, expected_keys: &[&str]) -> Map<String, Value> {
    match output {
        ModelOutput::Structured(map) => {
            if has_any_key(&map, expected_keys) {
                return map;
            }
            match map.get("content").and_then(Value::as_str) {
                Some(text) => extract_object(text, expected_keys).unwrap_or(map),
                None => map,
            }
        }
        ModelOutput::Raw(text) => match extract_object(&text, expected_keys) {
            Some(obj) => obj,
            None => {
                tracing::debug!(chars = text.len(), "model output is not JSON, keeping as content");
                content_map(text)
            }
        },
    }
}

/// Find a JSON object in free text.
///
/// Candidates are every ```json fenced block, then the whole text, then the
/// outermost `{...}` slice. The first candidate carrying one of
/// `expected_keys` wins; otherwise the first candidate that parsed.
pub fn extract_object(text: &str, expected_keys: &[&str]) -> Option<Map<String, Value>> {
    let mut fallback = None;
    let candidates = fenced_json_blocks(text)
        .into_iter()
        .chain(std::iter::once(text))
        .chain(outer_braces(text));

    for candidate in candidates {
        let Some(obj) = parse_object(candidate) else {
            continue;
        };
        if has_any_key(&obj, expected_keys) {
            return Some(obj);
        }
        if fallback.is_none() {
            fallback = Some(obj);
        }
    }
    fallback
}

fn has_any_key(map: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().any(|k| map.contains_key(*k))
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Bodies of fenced blocks whose info string is `json` (any case).
fn fenced_json_blocks(text: &str) -> Vec<&str> {
    const FENCE: &str = "```";
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(FENCE) {
        let after_fence = &rest[open + FENCE.len()..];
        let tag_len = after_fence
            .find(|c: char| c.is_whitespace())
            .unwrap_or(after_fence.len());
        let tag = &after_fence[..tag_len];
        let body_start = &after_fence[tag_len..];

        let Some(close) = body_start.find(FENCE) else {
            break;
        };
        if tag.eq_ignore_ascii_case("json") {
            blocks.push(&body_start[..close]);
        }
        rest = &body_start[close + FENCE.len()..];
    }

    blocks
}

/// Substring from the first `{` to the last `}`.
fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}
