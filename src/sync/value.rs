// ABOUTME: Literal encoder - turns raw column text into SQL literals for the target dialect
// ABOUTME: Values are compared and written in this encoded form only

use unicode_normalization::UnicodeNormalization;

use crate::db::Dialect;
use crate::schema::{ColumnKind, SqlType};

/// Code points above this are dropped from text values.
const MAX_CODE_POINT: u32 = 1000;

/// Encode a non-NULL raw value of a `sql_type` column as a literal for `target`.
///
/// Unsupported kinds are rejected before fetching, so they are passed
/// through untouched here.
pub fn encode(sql_type: SqlType, raw: &str, target: Dialect) -> String {
    match sql_type.kind() {
        ColumnKind::Text => quote_text(raw, target),
        ColumnKind::DateTime => format!(
            "CAST({} AS {})",
            quote_text(&fix_date_time(raw), target),
            target.temporal_type(sql_type)
        ),
        ColumnKind::Numeric => strip_trailing_zero(raw).to_string(),
        ColumnKind::Boolean => boolean_literal(raw, target),
        ColumnKind::Integer | ColumnKind::Unsupported => raw.to_string(),
    }
}

/// Booleans arrive as `1`/`0` (or a raw BIT byte). Postgres refuses integer
/// literals in boolean columns and gets `TRUE`/`FALSE` instead.
fn boolean_literal(raw: &str, target: Dialect) -> String {
    let value = match raw.trim() {
        "1" | "\u{1}" => Some(true),
        "0" | "\u{0}" => Some(false),
        other if other.eq_ignore_ascii_case("t") || other.eq_ignore_ascii_case("true") => Some(true),
        other if other.eq_ignore_ascii_case("f") || other.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    };
    match (value, target) {
        (Some(true), Dialect::Postgres) => "TRUE".to_string(),
        (Some(false), Dialect::Postgres) => "FALSE".to_string(),
        (Some(true), _) => "1".to_string(),
        (Some(false), _) => "0".to_string(),
        (None, _) => quote_text(raw, target),
    }
}

/// `'text'` with quotes doubled and the text cleaned.
pub fn quote_text(raw: &str, target: Dialect) -> String {
    format!("'{}'", clean_text(raw, target.backslash_escapes()))
}

/// Escape quotes (and backslashes where they escape), drop high code points,
/// recombine stray diaeresis and ring marks, then NFC normalize.
pub fn clean_text(raw: &str, escape_backslash: bool) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    let mut prev: Option<char> = None;

    for c in raw.chars() {
        match c {
            '\u{a8}' | '\u{308}' => {
                let combined = match prev {
                    Some('a') => Some('ä'),
                    Some('o') => Some('ö'),
                    Some('u') => Some('ü'),
                    Some('A') => Some('Ä'),
                    Some('O') => Some('Ö'),
                    Some('U') => Some('Ü'),
                    _ => None,
                };
                match combined {
                    Some(letter) => {
                        out.pop();
                        out.push(letter);
                        prev = Some(letter);
                    }
                    None => {
                        out.push('?');
                        prev = Some('?');
                    }
                }
            }
            '°' if prev == Some('a') => {
                out.pop();
                out.push('å');
                prev = Some('å');
            }
            '\'' => {
                out.push_str("''");
                prev = Some(c);
            }
            '\\' if escape_backslash => {
                out.push_str("\\\\");
                prev = Some(c);
            }
            c if (c as u32) > MAX_CODE_POINT => {}
            c => {
                out.push(c);
                prev = Some(c);
            }
        }
    }

    out.nfc().collect()
}

/// `YYYY-MM-DD HH:MM:SS` becomes `YYYY-MM-DDTHH:MM:SS`, anything else is kept.
pub fn fix_date_time(raw: &str) -> String {
    let b = raw.as_bytes();
    let shaped = b.len() == 19
        && b[4] == b'-'
        && b[7] == b'-'
        && b[10] == b' '
        && b[13] == b':'
        && b[16] == b':';
    if shaped {
        format!("{}T{}", &raw[..10], &raw[11..])
    } else {
        raw.to_string()
    }
}

fn strip_trailing_zero(raw: &str) -> &str {
    raw.strip_suffix(".0").unwrap_or(raw)
}
