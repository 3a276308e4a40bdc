//! CSV row encoding.
//!
//! Follows the conventional quote-non-numeric rule: strings, booleans and
//! the null sentinel are quoted (embedded quotes doubled), numbers are
//! written as their raw JSON lexeme unquoted, and rows end with `\r\n`.
//! Each table's byte stream starts with a UTF-8 BOM so spreadsheet tools
//! pick up the encoding.

use crate::shred::types::{Row, Scalar};

/// UTF-8 byte order mark prefixed to every table stream
pub const BOM: &[u8] = b"\xef\xbb\xbf";

/// Encode a header row from column names
pub fn header_row(columns: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        push_quoted(&mut out, column);
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Encode a value row; `null_sentinel` replaces explicit JSON nulls
pub fn value_row(row: &Row, null_sentinel: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, (_, value)) in row.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        push_field(&mut out, value, null_sentinel);
    }
    out.extend_from_slice(b"\r\n");
    out
}

fn push_field(out: &mut Vec<u8>, value: &Scalar, null_sentinel: &str) {
    match value {
        Scalar::Number(lexeme) => out.extend_from_slice(lexeme.as_bytes()),
        Scalar::String(text) => push_quoted(out, text),
        Scalar::Bool(true) => push_quoted(out, "true"),
        Scalar::Bool(false) => push_quoted(out, "false"),
        Scalar::Null => push_quoted(out, null_sentinel),
    }
}

fn push_quoted(out: &mut Vec<u8>, text: &str) {
    out.push(b'"');
    for &byte in text.as_bytes() {
        if byte == b'"' {
            out.push(b'"');
        }
        out.push(byte);
    }
    out.push(b'"');
}
