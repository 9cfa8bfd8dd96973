//! Minimal JSON scanner.
//!
//! This is not a JSON parser. It walks a document once and hands back the
//! byte span of a single value that sits directly inside the outermost
//! object or array, addressed either by key or by position. Nothing is
//! allocated while scanning; the span borrows from the input.
//!
//! ```text
//! {"id":1,"method":"sum","params":[2,3]}
//!                                 ^^^^^  scan(.., Lookup::Key("params"))
//! ```

use thiserror::Error;

/// How to address a value at depth 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'k> {
    /// Value following the given key of the outermost object.
    Key(&'k str),
    /// N-th value (0-based) of the outermost container.
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsonError {
    #[error("value not found")]
    NotFound,

    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte { offset: usize, byte: u8 },

    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("invalid UTF-8 at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("value is not a quoted string")]
    NotAString,

    #[error("document ends inside a value")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Value,
    Literal,
    String,
    Escape,
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    None,
    Start,
    End,
    StartStruct,
    EndStruct,
}

fn is_literal_terminator(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | b',' | b']' | b'}' | b':')
}

/// Locate a value at depth 1 and return its raw span.
///
/// The span starts at the opening quote, brace, bracket or first literal
/// byte and ends at the matching closing byte, inclusive. Key comparison is
/// byte-for-byte against the raw (still escaped) key text.
pub fn scan<'a>(json: &'a [u8], lookup: Lookup<'_>) -> Result<&'a [u8], JsonError> {
    // In key mode `index` walks 1 (expect key) -> 0 (matched, take value)
    // or 2 (skip next value) -> 1.
    let (key, mut index) = match lookup {
        Lookup::Key(key) => (Some(key.as_bytes()), 1usize),
        Lookup::Index(n) => (None, n),
    };

    let mut state = State::Value;
    let mut depth: isize = 0;
    let mut utf8_pending = 0u8;
    let mut key_start: Option<usize> = None;
    let mut value_start: Option<usize> = None;

    let mut i = 0;
    while i < json.len() {
        let c = json[i];
        let mut action = Action::None;
        // Position the action applies to; a literal ends one byte before the
        // terminator, which is then scanned again in the value state.
        let mut at = i;
        let mut advance = true;

        match state {
            State::Value => match c {
                b' ' | b'\t' | b'\n' | b'\r' | b',' | b':' => {
                    i += 1;
                    continue;
                }
                b'"' => {
                    action = Action::Start;
                    state = State::String;
                }
                b'{' | b'[' => action = Action::StartStruct,
                b'}' | b']' => action = Action::EndStruct,
                b't' | b'f' | b'n' | b'-' | b'0'..=b'9' => {
                    action = Action::Start;
                    state = State::Literal;
                }
                byte => return Err(JsonError::UnexpectedByte { offset: i, byte }),
            },
            State::Literal => {
                if is_literal_terminator(c) {
                    action = Action::End;
                    state = State::Value;
                    at = i - 1;
                    advance = false;
                } else if !(32..=126).contains(&c) || c == b'"' || c == b'\\' {
                    return Err(JsonError::UnexpectedByte { offset: i, byte: c });
                }
            }
            State::String => match c {
                b'"' => {
                    action = Action::End;
                    state = State::Value;
                }
                b'\\' => state = State::Escape,
                0x20..=0x7e => {}
                0xc0..=0xdf => {
                    utf8_pending = 1;
                    state = State::Utf8;
                }
                0xe0..=0xef => {
                    utf8_pending = 2;
                    state = State::Utf8;
                }
                0xf0..=0xf7 => {
                    utf8_pending = 3;
                    state = State::Utf8;
                }
                0x80..=0xbf | 0xf8..=0xff => {
                    return Err(JsonError::InvalidUtf8 { offset: i });
                }
                byte => return Err(JsonError::UnexpectedByte { offset: i, byte }),
            },
            State::Escape => match c {
                b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't' | b'u' => {
                    state = State::String;
                }
                _ => return Err(JsonError::InvalidEscape { offset: i }),
            },
            State::Utf8 => {
                if !(0x80..=0xbf).contains(&c) {
                    return Err(JsonError::InvalidUtf8 { offset: i });
                }
                utf8_pending -= 1;
                if utf8_pending == 0 {
                    state = State::String;
                }
            }
        }

        if action == Action::EndStruct {
            depth -= 1;
        }

        if depth == 1 {
            match action {
                Action::Start | Action::StartStruct => {
                    if index == 0 {
                        value_start = Some(at);
                    } else if key.is_some() && index == 1 {
                        key_start = Some(at);
                    } else {
                        index -= 1;
                    }
                }
                Action::End | Action::EndStruct => {
                    if let (Some(start), 0) = (value_start, index) {
                        return Ok(&json[start..=at]);
                    }
                    if let (Some(key), Some(start)) = (key, key_start.take()) {
                        // Only a quoted string can name a key; anything else
                        // sitting in key position is skipped like a mismatch.
                        let matched = json[start] == b'"' && json.get(start + 1..at) == Some(key);
                        index = if matched { 0 } else { 2 };
                    }
                }
                Action::None => {}
            }
        }

        if action == Action::StartStruct {
            depth += 1;
        }

        if advance {
            i += 1;
        }
    }

    if state != State::Value || depth > 0 || value_start.is_some() || key_start.is_some() {
        return Err(JsonError::Truncated);
    }
    Err(JsonError::NotFound)
}

/// Decode a quoted string span, quotes included.
///
/// Only the single-character escapes are understood; `\uXXXX` is rejected.
pub fn json_unescape(span: &[u8]) -> Result<String, JsonError> {
    let inner = match span {
        [b'"', inner @ .., b'"'] => inner,
        _ => return Err(JsonError::NotAString),
    };

    let mut out = Vec::with_capacity(inner.len());
    let mut bytes = inner.iter().enumerate();
    while let Some((offset, &byte)) = bytes.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        let decoded = match bytes.next() {
            Some((_, b'b')) => 0x08,
            Some((_, b'f')) => 0x0c,
            Some((_, b'n')) => b'\n',
            Some((_, b'r')) => b'\r',
            Some((_, b't')) => b'\t',
            Some((_, b'\\')) => b'\\',
            Some((_, b'/')) => b'/',
            Some((_, b'"')) => b'"',
            _ => return Err(JsonError::InvalidEscape { offset: offset + 1 }),
        };
        out.push(decoded);
    }

    String::from_utf8(out).map_err(|err| JsonError::InvalidUtf8 {
        offset: err.utf8_error().valid_up_to() + 1,
    })
}

/// Quote `s` as a JSON string literal.
pub fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Look up a field and surface it as text.
///
/// Strings are unescaped; any other value (number, literal, object, array)
/// is returned verbatim.
pub fn parse_field(json: &str, lookup: Lookup<'_>) -> Result<String, JsonError> {
    let span = scan(json.as_bytes(), lookup)?;
    if span.first() == Some(&b'"') {
        json_unescape(span)
    } else {
        // Spans never split a multi-byte sequence: they start and end on
        // ASCII bytes.
        Ok(String::from_utf8_lossy(span).into_owned())
    }
}

/// Lossy form of [`parse_field`]: an empty `key` selects by `index`, and
/// any failure yields an empty string.
pub fn json_parse(json: &str, key: &str, index: usize) -> String {
    let lookup = if key.is_empty() {
        Lookup::Index(index)
    } else {
        Lookup::Key(key)
    };
    parse_field(json, lookup).unwrap_or_default()
}
