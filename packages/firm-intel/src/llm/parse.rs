//! LLM response parsing: fence stripping, object location, and repair of
//! truncated JSON.
//!
//! The repair pass is a small pushdown automaton over brace/bracket/string
//! states; no general JSON parser runs before it.

use serde::Deserialize;

use crate::error::{IntelError, Result};

/// The strict response envelope every question is asked to produce.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerEnvelope {
    /// Extracted value; null when the model found nothing
    #[serde(default)]
    pub value: serde_json::Value,

    /// Model-reported confidence, clamped to [0, 1]
    #[serde(default)]
    pub confidence: f64,

    /// Model's reasoning
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Drop a wrapping markdown code fence, if present.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string ("json", "JSON", ...) on the fence line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end_matches('`').trim()
}

/// Locate the outermost JSON object in prose-wrapped text.
///
/// Scans from the first `{` tracking nesting and string state; when the
/// object closes, trailing prose is dropped. A truncated object runs to the
/// end of input and is left for the repair pass.
pub fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' | b'[' if !in_string => depth += 1,
            b'}' | b']' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    Some(&text[start..])
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    /// Object context; `after_colon` is true between a key's `:` and the
    /// following comma.
    Object { after_colon: bool },
    Array,
}

/// Auto-close a truncated JSON value.
///
/// Closes an unterminated string (discarding a partial escape), trims a
/// trailing comma, completes a dangling key or partial literal, and closes
/// every open brace/bracket. Valid input comes back unchanged apart from
/// surrounding whitespace.
pub fn repair_truncated_json(input: &str) -> String {
    let text = input.trim();
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_string = false;
    // Byte offset of a backslash whose escape sequence is still incomplete.
    let mut pending_escape: Option<usize> = None;
    let mut unicode_hex_left = 0u8;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if unicode_hex_left > 0 {
                if ch.is_ascii_hexdigit() {
                    unicode_hex_left -= 1;
                    if unicode_hex_left == 0 {
                        pending_escape = None;
                    }
                } else {
                    // Malformed escape; leave it for the truncation cut.
                    unicode_hex_left = 0;
                }
                continue;
            }
            if pending_escape.is_some() {
                if ch == 'u' {
                    unicode_hex_left = 4;
                } else {
                    pending_escape = None;
                }
                continue;
            }
            match ch {
                '\\' => pending_escape = Some(idx),
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push(Frame::Object { after_colon: false }),
            '[' => stack.push(Frame::Array),
            '}' => {
                if matches!(stack.last(), Some(Frame::Object { .. })) {
                    stack.pop();
                }
            }
            ']' => {
                if stack.last() == Some(&Frame::Array) {
                    stack.pop();
                }
            }
            ':' => {
                if let Some(Frame::Object { after_colon }) = stack.last_mut() {
                    *after_colon = true;
                }
            }
            ',' => {
                if let Some(Frame::Object { after_colon }) = stack.last_mut() {
                    *after_colon = false;
                }
            }
            _ => {}
        }
    }

    let mut repaired = text.to_string();

    if in_string {
        // A partial escape sequence cannot be completed; cut it off.
        if let Some(start) = pending_escape {
            repaired.truncate(start);
        }
        repaired.push('"');

        // A string closed in key position needs its value.
        if let Some(Frame::Object { after_colon: false }) = stack.last() {
            repaired.push_str(": null");
        }
    } else {
        truncate_dangling_tail(&mut repaired, &stack);
    }

    for frame in stack.iter().rev() {
        repaired.push(match frame {
            Frame::Object { .. } => '}',
            Frame::Array => ']',
        });
    }

    repaired
}

/// Clean a non-string tail: trailing commas, partial literals and numbers,
/// and a dangling colon or key.
fn truncate_dangling_tail(text: &mut String, stack: &[Frame]) {
    loop {
        let trimmed = text.trim_end();
        if trimmed.len() != text.len() {
            text.truncate(trimmed.len());
        }

        if text.ends_with(',') {
            text.pop();
            continue;
        }

        // Partial literal: a trailing alpha run that is a strict prefix of
        // true/false/null gets completed.
        let tail_alpha: String = text
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if !tail_alpha.is_empty() {
            for literal in ["true", "false", "null"] {
                if literal.starts_with(&tail_alpha) && tail_alpha != literal {
                    text.push_str(&literal[tail_alpha.len()..]);
                    return;
                }
            }
        }

        // Partial number: trim characters that cannot end one.
        if text.ends_with(['.', 'e', 'E', '+', '-']) {
            text.pop();
            continue;
        }

        break;
    }

    if text.ends_with(':') {
        text.push_str(" null");
    } else if text.ends_with('"') {
        // A complete string in key position still needs its value.
        if let Some(Frame::Object { after_colon: false }) = stack.last() {
            text.push_str(": null");
        }
    }
}

/// Full lenient pipeline: fences → outermost object → repair → decode.
pub fn parse_json_lenient(raw: &str) -> Result<serde_json::Value> {
    let unfenced = strip_markdown_fences(raw);
    let candidate = outermost_object(unfenced)
        .ok_or_else(|| IntelError::Parse("no JSON object in response".into()))?;
    let repaired = repair_truncated_json(candidate);
    serde_json::from_str(&repaired)
        .map_err(|e| IntelError::Parse(format!("after repair: {e}")))
}

/// Decode a response into the answer envelope, clamping confidence.
pub fn parse_envelope(raw: &str) -> Result<AnswerEnvelope> {
    let value = parse_json_lenient(raw)?;
    let mut envelope: AnswerEnvelope =
        serde_json::from_value(value).map_err(|e| IntelError::Parse(e.to_string()))?;
    envelope.confidence = envelope.confidence.clamp(0.0, 1.0);
    Ok(envelope)
}
