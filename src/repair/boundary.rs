//! Locate (and where possible repair) the JSON object inside a decoded blob.
//!
//! Repair rules, applied in order until one yields an object:
//!
//! 1. Start at the object enclosing `"character":` when that key is present,
//!    otherwise at the first `{`.
//! 2. If the last `"version":` has no `}` after it, cut after its numeric
//!    value and append `}`.  One exporter truncates exactly there.
//! 3. Parse the first complete JSON value from the start; anything after the
//!    closing brace (garbage, stray braces) is ignored.
//! 4. Walk back through every `}}`, then every single `}`, and retry with the
//!    text cut there, closing any braces left open.
//! 5. Close whatever is still open at the end of the text.

use serde_json::{Deserializer, Map, Value};
use std::borrow::Cow;
use thiserror::Error;

/// Wrapper key used by the BackyardAI export shape.
pub const NESTED_KEY: &str = "\"character\":";
const VERSION_KEY: &str = "\"version\":";

#[derive(Error, Debug)]
pub enum JsonBoundaryError {
    #[error("No JSON object start found")]
    NotFound,
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Return the text of the first JSON object in `decoded`, repaired if
/// needed.  The returned text always parses.
pub fn extract_object(decoded: &str) -> Result<String, JsonBoundaryError> {
    extract(decoded).map(|(text, _)| text)
}

/// Like [`extract_object`] but returns the parsed object.
pub fn extract_value(decoded: &str) -> Result<Map<String, Value>, JsonBoundaryError> {
    extract(decoded).map(|(_, value)| value)
}

fn extract(decoded: &str) -> Result<(String, Map<String, Value>), JsonBoundaryError> {
    let start = object_start(decoded).ok_or(JsonBoundaryError::NotFound)?;
    let body: Cow<'_, str> = match repair_version_tail(&decoded[start..]) {
        Some(repaired) => Cow::Owned(repaired),
        None => Cow::Borrowed(&decoded[start..]),
    };

    let first_error = match first_object(&body) {
        Ok(found) => return Ok(found),
        Err(e) => e,
    };

    let doubled = body.rmatch_indices("}}").map(|(at, _)| at + 2);
    let single = body.rmatch_indices('}').map(|(at, _)| at + 1);
    for cut in doubled.chain(single) {
        let candidate = &body[..cut];
        if let Ok(found) = whole_object(candidate) {
            return Ok(found);
        }
        if let Some(found) = close_open(candidate).and_then(|c| whole_object(&c).ok()) {
            return Ok(found);
        }
    }

    if let Some(found) = close_open(&body).and_then(|c| whole_object(&c).ok()) {
        return Ok(found);
    }

    Err(JsonBoundaryError::Parse(first_error))
}

fn object_start(text: &str) -> Option<usize> {
    text.find(NESTED_KEY)
        .and_then(|key| enclosing_open_brace(text, key))
        .or_else(|| text.find('{'))
}

/// Walk backwards from `pos` to the `{` that opens the object containing it.
fn enclosing_open_brace(text: &str, pos: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in text.as_bytes()[..pos].iter().enumerate().rev() {
        match b {
            b'}' => depth += 1,
            b'{' if depth == 0 => return Some(i),
            b'{' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn repair_version_tail(body: &str) -> Option<String> {
    let key_at = body.rfind(VERSION_KEY)?;
    let after_key = key_at + VERSION_KEY.len();
    if body[after_key..].contains('}') {
        return None;
    }

    let rest = &body[after_key..];
    let value_at = after_key + (rest.len() - rest.trim_start().len());
    let digits = body[value_at..]
        .bytes()
        .take_while(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-'))
        .count();

    let cut = if digits > 0 { value_at + digits } else { body.len() };
    let mut repaired = String::with_capacity(cut + 1);
    repaired.push_str(&body[..cut]);
    repaired.push('}');
    Some(repaired)
}

/// First complete value from the start of `text`, trailing bytes ignored.
fn first_object(text: &str) -> Result<(String, Map<String, Value>), serde_json::Error> {
    let mut stream = Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(map))) => {
            let end = stream.byte_offset();
            Ok((text[..end].to_owned(), map))
        }
        Some(Ok(_)) => Err(serde::de::Error::custom("top-level JSON value is not an object")),
        Some(Err(e)) => Err(e),
        None => Err(serde::de::Error::custom("empty JSON input")),
    }
}

fn whole_object(text: &str) -> Result<(String, Map<String, Value>), serde_json::Error> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok((text.to_owned(), map)),
        _ => Err(serde::de::Error::custom("top-level JSON value is not an object")),
    }
}

/// Append the closers for every `{`/`[` still open at the end of `text`.
/// Returns `None` when the text ends inside a string, nothing is open, or
/// the nesting is inconsistent.
fn close_open(text: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for b in text.bytes() {
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
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
            }
            _ => {}
        }
    }

    if in_string || stack.is_empty() {
        return None;
    }
    let mut closed = text.trim_end().trim_end_matches(',').to_owned();
    closed.extend(stack.iter().rev().map(|&b| char::from(b)));
    Some(closed)
}
