//! Percent-encoding helpers used by navigation.
//!
//! Inline documents are passed around as `data:text/html,<percent-encoded>`
//! URIs. These functions only cover what the web view needs; they are not a
//! general URL library.

/// Prefix of an inline HTML document URI.
pub const DATA_HTML_PREFIX: &str = "data:text/html,";

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(10 + byte - b'a'),
        b'A'..=b'F' => Some(10 + byte - b'A'),
        _ => None,
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9-_.~]` as lowercase `%xx`.
pub fn url_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for &byte in s.as_bytes() {
        if is_unreserved(byte) {
            encoded.push(byte as char);
        } else {
            encoded.push('%');
            encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            encoded.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
        }
    }
    encoded
}

/// Decode `%XX` sequences and `+` (as space).
///
/// A `%` that is not followed by two hex digits, including one truncated by
/// the end of input, is kept literally. Decoded bytes that do not form valid
/// UTF-8 are replaced with U+FFFD.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let pair = bytes
                    .get(i + 1)
                    .zip(bytes.get(i + 2))
                    .and_then(|(&hi, &lo)| Some((hex_value(hi)?, hex_value(lo)?)));
                match pair {
                    Some((hi, lo)) => {
                        decoded.push(hi << 4 | lo);
                        i += 3;
                        continue;
                    }
                    None => decoded.push(b'%'),
                }
            }
            b'+' => decoded.push(b' '),
            other => decoded.push(other),
        }
        i += 1;
    }
    match String::from_utf8(decoded) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// Extract the HTML document from a `data:text/html,` URI.
///
/// Returns an empty string when `s` does not carry that exact prefix.
pub fn html_from_uri(s: &str) -> String {
    match s.strip_prefix(DATA_HTML_PREFIX) {
        Some(rest) => url_decode(rest),
        None => String::new(),
    }
}
