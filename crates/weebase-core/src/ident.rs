//! Identifier validation and quoting
//!
//! Values are always bound as parameters. Identifiers cannot be, so every
//! schema, table and column name is validated here and then quoted for the
//! target dialect before it is placed into SQL text.

use crate::{Dialect, Result, WeebaseError};

/// Returns true for a plain identifier: non-empty, `[A-Za-z0-9_]` only, and
/// not starting with a digit.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Like [`is_valid_identifier`] but accepts `schema.table` style names where
/// every dot-separated segment is itself a valid identifier.
pub fn is_valid_qualified_identifier(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_valid_identifier)
}

/// Validate an identifier, naming the offending field in the error
pub fn validate_identifier(kind: &str, s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(WeebaseError::Validation(format!("{} is required", kind)));
    }
    if !is_valid_identifier(s) {
        tracing::debug!(kind = kind, "rejected invalid identifier");
        return Err(WeebaseError::Validation(format!("invalid {}: {:?}", kind, s)));
    }
    Ok(())
}

fn quote_chars(dialect: &Dialect) -> (char, char) {
    match dialect {
        Dialect::MySql => ('`', '`'),
        Dialect::SqlServer => ('[', ']'),
        _ => ('"', '"'),
    }
}

fn quote_segment(segment: &str, open: char, close: char) -> String {
    let mut quoted = String::with_capacity(segment.len() + 2);
    quoted.push(open);
    for c in segment.chars() {
        if c == close {
            quoted.push(close);
        }
        quoted.push(c);
    }
    quoted.push(close);
    quoted
}

/// Quote an identifier for `dialect`, escaping embedded closing quotes by
/// doubling them. Dotted names are quoted segment by segment.
pub fn quote_identifier(dialect: &Dialect, ident: &str) -> String {
    let (open, close) = quote_chars(dialect);
    ident
        .split('.')
        .map(|segment| quote_segment(segment, open, close))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a single name without splitting on dots
pub fn quote_name(dialect: &Dialect, name: &str) -> String {
    let (open, close) = quote_chars(dialect);
    quote_segment(name, open, close)
}

/// Reverse of [`quote_name`], following the dialect's lexer rules.
///
/// Returns `None` when `quoted` is not a single well-formed quoted name.
pub fn unquote_name(dialect: &Dialect, quoted: &str) -> Option<String> {
    let (open, close) = quote_chars(dialect);
    let inner = quoted.strip_prefix(open)?.strip_suffix(close)?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == close {
            // a closing quote inside the name must be doubled
            if chars.next() != Some(close) {
                return None;
            }
        }
        out.push(c);
    }
    Some(out)
}
