//! String literal escapes
//!
//! Accepted escapes: `\\ \" \' \n \r \t \b \xHH \uHHHH`. [`quote`] is the inverse used by
//! stringify: it always emits a double-quoted literal that [`unescape`] reads back unchanged.

use std::fmt::Write;

/// A rejected escape sequence, with its byte range relative to the literal body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadEscape {
    pub sequence: String,
    pub start: usize,
    pub end: usize,
}

pub fn unescape(body: &str) -> Result<String, BadEscape> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let bad = |end: usize| BadEscape {
            sequence: body[start..end].to_string(),
            start,
            end,
        };

        let Some((i, e)) = chars.next() else {
            return Err(bad(body.len()));
        };
        let after = i + e.len_utf8();
        match e {
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'b' => out.push('\u{8}'),
            'x' | 'u' => {
                let width = if e == 'x' { 2 } else { 4 };
                let digits: String = body[after..].chars().take(width).collect();
                let end = after + digits.len();
                if digits.len() != width || !digits.chars().all(|d| d.is_ascii_hexdigit()) {
                    return Err(bad(end));
                }
                let decoded = u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| bad(end))?;
                out.push(decoded);
                for _ in 0..width {
                    chars.next();
                }
            }
            _ => return Err(bad(after)),
        }
    }

    Ok(out)
}

/// Render a string as a double-quoted literal
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            c if c.is_control() => {
                // Cc never exceeds U+009F
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
