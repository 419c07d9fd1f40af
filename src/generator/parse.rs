//! Structured parsing of the generation completion.
//!
//! Models are asked for a bare JSON object but regularly wrap it in a Markdown
//! fence or in a sentence of prose. The parser peels those layers off before
//! handing the text to `serde_json`.

use std::borrow::Cow;
use std::collections::BTreeSet;

use super::fallback::unescape;

/// Fields recovered from a JSON reply. `query_text` is already unescaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StructuredReply {
    pub query_text: Option<String>,
    pub entities_used: BTreeSet<String>,
    pub relations_used: BTreeSet<String>,
    pub explanation: Option<String>,
}

/// A fenced Markdown code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FencedBlock<'a> {
    tag: &'a str,
    content: &'a str,
}

const FENCE: &str = "```";

/// All fenced blocks in `text`, in order. An unterminated final fence runs to
/// the end of the text.
fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        let (inner, remainder) = match after_open.find(FENCE) {
            Some(close) => (&after_open[..close], &after_open[close + FENCE.len()..]),
            None => (after_open, ""),
        };

        let block = match inner.split_once('\n') {
            Some((first, body)) if is_fence_tag(first) => FencedBlock {
                tag: first.trim(),
                content: body,
            },
            _ => FencedBlock {
                tag: "",
                content: inner,
            },
        };
        blocks.push(block);
        rest = remainder;
    }
    blocks
}

/// `text` with every fenced block removed, the gaps replaced by newlines.
fn unfenced_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(FENCE) {
        out.push_str(&rest[..open]);
        out.push('\n');
        let after_open = &rest[open + FENCE.len()..];
        rest = match after_open.find(FENCE) {
            Some(close) => &after_open[close + FENCE.len()..],
            None => "",
        };
    }
    out.push_str(rest);
    out
}

/// An info string is a single word such as `json` or `sparql`.
fn is_fence_tag(line: &str) -> bool {
    let line = line.trim();
    line.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// The text that should hold the JSON object: the content of the preferred
/// fenced block if any, otherwise the whole (trimmed) text.
///
/// A block tagged `json` wins over an untagged one, which wins over blocks
/// tagged with anything else.
pub(crate) fn extract_payload(text: &str) -> (&str, bool) {
    let text = text.trim();
    let blocks = fenced_blocks(text);

    let preferred = blocks
        .iter()
        .find(|b| b.tag.eq_ignore_ascii_case("json"))
        .or_else(|| blocks.iter().find(|b| b.tag.is_empty()))
        .or_else(|| blocks.first());

    match preferred {
        Some(block) => (block.content.trim(), true),
        None => (text, false),
    }
}

fn string_set(value: &serde_json::Value) -> BTreeSet<String> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_object(text: &str) -> Option<StructuredReply> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object()?;

    let query_text = obj
        .get("query_text")
        .or_else(|| obj.get("sparql_query"))
        .and_then(|v| v.as_str())
        .map(unescape);

    Some(StructuredReply {
        query_text,
        entities_used: obj.get("entities_used").map(string_set).unwrap_or_default(),
        relations_used: obj.get("relations_used").map(string_set).unwrap_or_default(),
        explanation: obj
            .get("explanation")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    })
}

/// Parse the completion as a JSON object. Returns `None` when no JSON object
/// can be recovered.
pub(crate) fn parse_structured(raw: &str) -> Option<StructuredReply> {
    let (payload, fenced) = extract_payload(raw);
    if let Some(reply) = parse_object(payload) {
        return Some(reply);
    }

    // Object surrounded by prose, or sitting outside the fences: try the
    // outermost braces.
    let outside = if fenced {
        Cow::Owned(unfenced_text(raw))
    } else {
        Cow::Borrowed(payload)
    };
    let start = outside.find('{')?;
    let end = outside.rfind('}')?;
    if end > start {
        return parse_object(&outside[start..=end]);
    }
    None
}
