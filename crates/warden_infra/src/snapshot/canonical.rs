use std::fmt::Write;

use serde_json::Value;

/// Serialize with sorted keys and every non-ASCII character escaped as
/// `\uXXXX` (UTF-16 surrogate pairs above the BMP).
pub fn to_canonical_json(value: &Value) -> String {
    // serde_json's default map is a BTreeMap, so keys come out sorted.
    let compact = value.to_string();
    if compact.is_ascii() {
        return compact;
    }
    let mut out = String::with_capacity(compact.len() + 16);
    let mut units = [0u16; 2];
    for ch in compact.chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        // Non-ASCII only appears inside JSON strings.
        for unit in ch.encode_utf16(&mut units) {
            let _ = write!(out, "\\u{:04x}", unit);
        }
    }
    out
}
