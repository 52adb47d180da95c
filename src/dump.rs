//! Text listings of declared and expanded layouts, for logs and the CLI.

use crate::expand::ExpandedStructure;
use crate::schema::{FieldRule, Structure};
use std::fmt::Write;

/// One line per declared field: name, count, type, total size and rule.
///
/// ```text
/// structure point (3 bytes)
///   x          1 x uint8    1
///   y          1 x uint16   2  [0..640]
/// ```
pub fn dump_structure(s: &Structure) -> String {
    let mut out = format!("structure {} ({} bytes)\n", s.name, s.total_size);
    for f in &s.fields {
        let _ = write!(
            out,
            "  {:<10} {} x {:<8} {}",
            f.name,
            f.repeat_count,
            f.field_type.name(),
            f.total_size()
        );
        if let Some(c) = f.constant {
            let _ = write!(out, "  = {}", c);
        }
        match &f.rule {
            Some(FieldRule::Range { lo, hi }) => {
                let _ = write!(out, "  [{}..{}]", lo, hi);
            }
            Some(FieldRule::ValueSet(values)) => {
                let list: Vec<String> = values.iter().map(u32::to_string).collect();
                let _ = write!(out, "  in({})", list.join(", "));
            }
            Some(FieldRule::Deferred(expr)) => {
                let _ = write!(out, "  {{{}}}", expr);
            }
            None => {}
        }
        out.push('\n');
    }
    out
}

/// One line per leaf: offset, size, type, path and current value.
pub fn dump_expanded(s: &ExpandedStructure) -> String {
    let mut out = format!(
        "expanded {} ({} bytes, {} leaves)\n",
        s.name,
        s.total_size,
        s.fields.len()
    );
    for f in &s.fields {
        let _ = writeln!(
            out,
            "  @{:<4} {}  {:<8} {:<20} {}",
            f.offset,
            f.size,
            f.type_name(),
            f.path,
            f.value
        );
    }
    out
}

/// Space-separated lowercase hex, e.g. `01 00 2c 01`.
pub fn hex_string(bytes: &[u8]) -> String {
    let parts: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    parts.join(" ")
}

/// Inverse of [`hex_string`]; accepts spaces, `:` separators and an optional `0x` prefix.
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let digits: String = text
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}
