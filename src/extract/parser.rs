//! Tolerant parsing of model completion text into record dictionaries
//!
//! Attempts a strict JSON parse first; recovery only runs on input the
//! strict path rejects, so well-formed output is never altered. Recovery
//! steps, in order: strip markdown code fences, extract the outermost
//! balanced bracket/brace span by counting (quote-aware, not regex), and
//! trim trailing separators left before closing brackets.
//!
//! When every recovery step fails the raw text is returned inside a
//! [`ParseFailure`] so the caller can persist it verbatim for triage. An
//! empty JSON array is a successful parse with zero records; the two
//! outcomes are deliberately distinct.

use serde_json::Value;

use crate::models::RawRecord;
use crate::utils::error::ParseFailure;

/// Tolerant extraction-output parser
#[derive(Debug, Default)]
pub struct ExtractionParser;

impl ExtractionParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse raw completion text into an ordered list of record dicts.
    ///
    /// # Errors
    ///
    /// Returns [`ParseFailure`] carrying the raw text when no structure can
    /// be recovered.
    pub fn parse(&self, raw: &str) -> Result<Vec<RawRecord>, ParseFailure> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseFailure::new("empty completion", raw));
        }

        // Strict path: valid output is decoded as-is, recovery untouched
        if let Ok(records) = decode(trimmed) {
            return Ok(records);
        }

        // (a) markdown code fences
        let unfenced = strip_code_fences(trimmed).unwrap_or_else(|| trimmed.to_string());
        if let Ok(records) = decode(&unfenced) {
            return Ok(records);
        }

        // (b) outermost balanced span inside surrounding prose
        if let Some(span) = balanced_span(&unfenced) {
            if let Ok(records) = decode(span) {
                return Ok(records);
            }

            // (c) trailing separator before a closing bracket
            let repaired = remove_trailing_separators(span);
            if let Ok(records) = decode(&repaired) {
                return Ok(records);
            }
        } else {
            // No balanced span: possibly truncated output. Trim a trailing
            // separator and close the opening bracket.
            let repaired = remove_trailing_separators(unfenced.trim_end());
            if let Some(closed) = close_truncated(&repaired) {
                if let Ok(records) = decode(&closed) {
                    return Ok(records);
                }
            }
        }

        Err(ParseFailure::new(
            "no recoverable structure in completion",
            raw,
        ))
    }
}

/// Decode a JSON string into record dicts.
///
/// Accepts a bare array of objects, an object wrapping an array under any
/// key, or a single record object.
fn decode(text: &str) -> Result<Vec<RawRecord>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    value_to_records(value)
}

fn value_to_records(value: Value) -> Result<Vec<RawRecord>, String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(format!("array element is not an object: {other}")),
            })
            .collect(),
        Value::Object(map) => {
            // A wrapper object holds the record list under some key
            if let Some(inner) = map.values().find(|v| v.is_array()).cloned() {
                return value_to_records(inner);
            }
            Ok(vec![map])
        }
        other => Err(format!("completion is not an object or array: {other}")),
    }
}

/// Extract the inner content of a markdown code fence, if one is present
fn strip_code_fences(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the fence line
    let content_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let content = &after_fence[content_start..];
    let end = content.find("```").unwrap_or(content.len());
    Some(content[..end].trim().to_string())
}

/// Locate the outermost balanced bracket/brace span by counting.
///
/// Tracks string literals and escapes so brackets inside values do not
/// affect the depth count.
fn balanced_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let open_idx = text.find(['[', '{'])?;
    let open = bytes[open_idx];
    let close = if open == b'[' { b']' } else { b'}' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open_idx) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open_idx..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Remove separators left dangling before closing brackets (`,]` / `,}`),
/// and a bare trailing separator at end of input. Quote-aware.
fn remove_trailing_separators(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if escaped {
            let ch_len = utf8_len(b);
            out.push_str(&text[i..i + ch_len]);
            escaped = false;
            i += ch_len;
            continue;
        }
        match b {
            b'\\' if in_string => {
                out.push('\\');
                escaped = true;
                i += 1;
            }
            b'"' => {
                in_string = !in_string;
                out.push('"');
                i += 1;
            }
            b',' if !in_string => {
                // Look past whitespace for a closer or end of input
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                if j >= bytes.len() || bytes[j] == b']' || bytes[j] == b'}' {
                    i += 1; // drop the comma
                } else {
                    out.push(',');
                    i += 1;
                }
            }
            _ => {
                // Non-ASCII bytes are copied through verbatim
                let ch_len = utf8_len(b);
                out.push_str(&text[i..i + ch_len]);
                i += ch_len;
            }
        }
    }

    out
}

/// Close a truncated array/object opener so the repair can be decoded
fn close_truncated(text: &str) -> Option<String> {
    match text.as_bytes().first().copied()? {
        b'[' => Some(format!("{text}]")),
        b'{' => Some(format!("{text}}}")),
        _ => None,
    }
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}
