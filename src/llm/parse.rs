//! Opportunistic extraction of structured JSON from model replies

use serde_json::Value;

/// Find a JSON object in `text`.
///
/// Tries, in order: the whole reply, a fenced ```json block, any fenced
/// block, and finally the outermost `{ ... }` span. Returns `None` when
/// nothing parses; callers keep the plain text either way.
pub fn extract_structured(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }

    for block in fenced_blocks(trimmed) {
        if let Some(value) = parse_object(block) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&trimmed[start..=end])
}

fn parse_object(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

/// Fenced blocks, `json`-tagged ones first
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut tagged = Vec::new();
    let mut untagged = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(line_end) = after.find('\n') else {
            break;
        };
        let tag = after[..line_end].trim();
        let body_start = &after[line_end + 1..];
        let Some(close) = body_start.find("```") else {
            break;
        };
        let body = &body_start[..close];
        if tag.eq_ignore_ascii_case("json") {
            tagged.push(body);
        } else {
            untagged.push(body);
        }
        rest = &body_start[close + 3..];
    }

    tagged.extend(untagged);
    tagged
}
