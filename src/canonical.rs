//! Canonical JSON encoding.
//!
//! Deterministic 2-space indented JSON with stable field order (relies on
//! `serde_json`'s `preserve_order` feature so a `Value::Object`'s insertion
//! order round-trips), no HTML escaping, and the trailing newline that
//! `serde_json`'s pretty writer does not emit a leading one for stripped.
//! This matches the reference encoder (`json.NewEncoder` with
//! `SetEscapeHTML(false)` and a two-space indent, output trimmed of its
//! trailing newline).

use serde_json::Value;

/// Encode `value` as canonical JSON bytes.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    // serde_json never HTML-escapes by default, unlike encoding/json.
    serde::Serialize::serialize(value, &mut ser).expect("Value serialization cannot fail");
    buf
}

/// The "JS-binary" pre-image transform used before hashing a message: decode
/// the canonical JSON bytes as UTF-8 text, re-encode each code point as a
/// UTF-16 code unit, and keep only the low byte of each unit.
pub fn to_js_binary(src: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(src);
    let mut out = Vec::with_capacity(text.chars().count() * 2);
    let mut utf16_buf = [0u16; 2];
    for ch in text.chars() {
        for unit in ch.encode_utf16(&mut utf16_buf) {
            out.push((*unit & 0x00ff) as u8);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_preserves_insertion_order() {
        let v = json!({"b": 1, "a": 2});
        let bytes = encode(&v);
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.find("\"b\"").unwrap() < s.find("\"a\"").unwrap());
    }

    #[test]
    fn encode_does_not_html_escape() {
        let v = json!({"html": "<script>&amp;</script>"});
        let s = String::from_utf8(encode(&v)).unwrap();
        assert!(s.contains("<script>"));
    }

    #[test]
    fn js_binary_takes_low_byte_of_each_utf16_unit() {
        // ASCII passes through unchanged: every UTF-16 code unit's low byte
        // equals the original byte.
        let input = b"hello";
        let out = to_js_binary(input);
        assert_eq!(out, b"hello".to_vec());
    }

    #[test]
    fn js_binary_truncates_non_ascii_to_low_byte() {
        // 'é' (U+00E9) encodes to one UTF-16 unit 0x00E9; low byte is 0xE9.
        let out = to_js_binary("é".as_bytes());
        assert_eq!(out, vec![0xE9]);
    }
}
