//! The `{type, value}` wire format.
//!
//! Every value that crosses the boundary is a [`WireValue`]: a [`Tag`] and a
//! textual payload. Value kinds carry a literal encoding; reference kinds
//! carry the decimal id of a registry handle. A wire value never embeds a
//! live pointer.

use crate::error::BridgeResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use tracing::warn;

/// Closed set of value tags understood on both sides of the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tag {
    Nil,
    Boolean,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
    Buffer,
    /// Host object exposed through an indexable proxy.
    HostObject,
    /// Host function exposed through a callable proxy.
    HostFunction,
}

impl Tag {
    /// Parse a tag from its wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "nil" => Some(Tag::Nil),
            "boolean" => Some(Tag::Boolean),
            "number" => Some(Tag::Number),
            "string" => Some(Tag::String),
            "table" => Some(Tag::Table),
            "function" => Some(Tag::Function),
            "userdata" => Some(Tag::Userdata),
            "thread" => Some(Tag::Thread),
            "buffer" => Some(Tag::Buffer),
            "host-object" => Some(Tag::HostObject),
            "host-function" => Some(Tag::HostFunction),
            _ => None,
        }
    }

    /// Wire spelling of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Nil => "nil",
            Tag::Boolean => "boolean",
            Tag::Number => "number",
            Tag::String => "string",
            Tag::Table => "table",
            Tag::Function => "function",
            Tag::Userdata => "userdata",
            Tag::Thread => "thread",
            Tag::Buffer => "buffer",
            Tag::HostObject => "host-object",
            Tag::HostFunction => "host-function",
        }
    }

    /// Marshaled by value.
    pub fn is_value(&self) -> bool {
        matches!(self, Tag::Nil | Tag::Boolean | Tag::Number | Tag::String)
    }

    /// Payload is an engine registry id.
    pub fn is_engine_ref(&self) -> bool {
        matches!(
            self,
            Tag::Table | Tag::Function | Tag::Userdata | Tag::Thread | Tag::Buffer
        )
    }

    /// Payload is a host registry id.
    pub fn is_host_ref(&self) -> bool {
        matches!(self, Tag::HostObject | Tag::HostFunction)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireValue {
    #[serde(rename = "type")]
    pub kind: Tag,
    #[serde(rename = "value")]
    pub payload: String,
}

/// Loosely typed record used when the tag has not been validated yet.
#[derive(Deserialize)]
struct RawWireValue {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: String,
}

impl WireValue {
    pub fn new(kind: Tag, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn nil() -> Self {
        Self::new(Tag::Nil, "nil")
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(Tag::Boolean, if value { "true" } else { "false" })
    }

    pub fn number(value: f64) -> Self {
        Self::new(Tag::Number, format_number(value))
    }

    pub fn string(value: &str) -> Self {
        Self::bytes(value.as_bytes())
    }

    /// Encode an arbitrary byte string. Invalid UTF-8 survives as `\xNN` escapes.
    pub fn bytes(value: &[u8]) -> Self {
        Self::new(Tag::String, escape(value))
    }

    /// Encode a registry handle.
    pub fn reference(kind: Tag, id: u32) -> Self {
        Self::new(kind, id.to_string())
    }

    /// Build from an unvalidated tag. Unknown tags degrade to nil.
    pub fn from_raw(kind: &str, payload: &str) -> Self {
        match Tag::parse(kind) {
            Some(tag) => Self::new(tag, payload),
            None => {
                warn!(kind, "unsupported wire type; decoding as nil");
                Self::nil()
            }
        }
    }

    pub fn is_nil(&self) -> bool {
        self.kind == Tag::Nil
    }

    pub fn as_bool(&self) -> Option<bool> {
        (self.kind == Tag::Boolean).then(|| self.payload == "true")
    }

    pub fn as_number(&self) -> Option<f64> {
        if self.kind != Tag::Number {
            return None;
        }
        parse_number(&self.payload)
    }

    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        (self.kind == Tag::String).then(|| unescape(&self.payload))
    }

    /// String payload decoded lossily into UTF-8.
    pub fn as_string(&self) -> Option<String> {
        self.as_bytes()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Handle id carried by a reference kind.
    pub fn handle(&self) -> Option<u32> {
        if self.kind.is_value() {
            return None;
        }
        self.payload.parse().ok()
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.payload)
    }
}

/// Encode a list of wire values as a JSON array.
pub fn encode_list(values: &[WireValue]) -> BridgeResult<String> {
    Ok(serde_json::to_string(values)?)
}

/// Decode a JSON array of wire records. Unknown tags become nil per element.
pub fn decode_list(json: &str) -> BridgeResult<Vec<WireValue>> {
    let raw: Vec<RawWireValue> = serde_json::from_str(json)?;
    Ok(raw
        .iter()
        .map(|r| WireValue::from_raw(&r.kind, &r.value))
        .collect())
}

/// Shortest text that parses back to exactly `value`.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-6..1e21).contains(&magnitude) {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}

pub fn parse_number(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        other => other.trim().parse().ok(),
    }
}

/// Escape a byte string for embedding in a wire payload.
pub fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {
                    let _ = write!(out, "\\u{:04x}", c as u32);
                }
                c => out.push(c),
            }
        }
        for byte in chunk.invalid() {
            let _ = write!(out, "\\x{byte:02x}");
        }
    }
    out
}

/// Inverse of [`escape`]. Malformed escapes are kept literally.
pub fn unescape(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    let mut buf = [0u8; 4];

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('"') => out.push(b'"'),
            Some('\\') => out.push(b'\\'),
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => {
                        out.extend_from_slice(decoded.encode_utf8(&mut buf).as_bytes())
                    }
                    _ => {
                        out.extend_from_slice(b"\\u");
                        out.extend_from_slice(hex.as_bytes());
                    }
                }
            }
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) if hex.len() == 2 => out.push(byte),
                    _ => {
                        out.extend_from_slice(b"\\x");
                        out.extend_from_slice(hex.as_bytes());
                    }
                }
            }
            Some(other) => {
                out.push(b'\\');
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => out.push(b'\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_number(value: f64) -> f64 {
        WireValue::number(value).as_number().unwrap()
    }

    #[test]
    fn test_tag_spelling() {
        for tag in [
            Tag::Nil,
            Tag::Boolean,
            Tag::Number,
            Tag::String,
            Tag::Table,
            Tag::Function,
            Tag::Userdata,
            Tag::Thread,
            Tag::Buffer,
            Tag::HostObject,
            Tag::HostFunction,
        ] {
            assert_eq!(Tag::parse(tag.as_str()), Some(tag));
            let json = serde_json::to_string(&tag).unwrap();
            assert_eq!(json, format!("\"{}\"", tag.as_str()));
        }
        assert_eq!(Tag::parse("vector"), None);
    }

    #[test]
    fn test_integral_numbers_have_no_fraction() {
        assert_eq!(WireValue::number(5.0).payload, "5");
        assert_eq!(WireValue::number(-12.0).payload, "-12");
        assert_eq!(WireValue::number(0.5).payload, "0.5");
    }

    #[test]
    fn test_edge_floats_roundtrip() {
        for value in [
            0.0,
            1.0 / 3.0,
            0.1 + 0.2,
            f64::MAX,
            f64::MIN_POSITIVE,
            5e-324,
            1e21,
            1e-7,
            -123456789.125,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ] {
            assert_eq!(roundtrip_number(value).to_bits(), value.to_bits(), "{value}");
        }
    }

    #[test]
    fn test_negative_zero_and_nan() {
        assert_eq!(WireValue::number(-0.0).payload, "-0");
        assert!(roundtrip_number(-0.0).is_sign_negative());
        assert_eq!(WireValue::number(f64::NAN).payload, "NaN");
        assert!(roundtrip_number(f64::NAN).is_nan());
    }

    #[test]
    fn test_large_numbers_use_exponent() {
        assert_eq!(format_number(1e300), "1e300");
        assert_eq!(format_number(2.5e-8), "2.5e-8");
    }

    #[test]
    fn test_string_escaping() {
        let wire = WireValue::string("say \"hi\"\\\n\t\r\u{1}");
        assert_eq!(wire.payload, "say \\\"hi\\\"\\\\\\n\\t\\r\\u0001");
        assert_eq!(wire.as_string().unwrap(), "say \"hi\"\\\n\t\r\u{1}");
    }

    #[test]
    fn test_invalid_utf8_roundtrip() {
        let bytes = [b'a', 0xff, 0xfe, b'"', 0x00, b'z'];
        let wire = WireValue::bytes(&bytes);
        assert!(wire.payload.contains("\\xff"));
        assert_eq!(wire.as_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_malformed_escape_kept_literally() {
        assert_eq!(unescape("\\q\\u12"), b"\\q\\u12".to_vec());
    }

    #[test]
    fn test_boolean_payload() {
        assert_eq!(WireValue::boolean(true).as_bool(), Some(true));
        assert_eq!(WireValue::new(Tag::Boolean, "yes").as_bool(), Some(false));
        assert_eq!(WireValue::nil().as_bool(), None);
    }

    #[test]
    fn test_reference_handle() {
        let wire = WireValue::reference(Tag::HostFunction, 12);
        assert_eq!(wire.handle(), Some(12));
        assert_eq!(WireValue::number(12.0).handle(), None);
    }

    #[test]
    fn test_from_raw_unknown_tag_is_nil() {
        assert!(WireValue::from_raw("vector", "1,2,3").is_nil());
        assert_eq!(
            WireValue::from_raw("number", "5"),
            WireValue::new(Tag::Number, "5")
        );
    }

    #[test]
    fn test_list_json() {
        let values = vec![WireValue::number(5.0), WireValue::string("x")];
        let json = encode_list(&values).unwrap();
        assert_eq!(
            json,
            r#"[{"type":"number","value":"5"},{"type":"string","value":"x"}]"#
        );
        assert_eq!(decode_list(&json).unwrap(), values);
    }

    #[test]
    fn test_decode_list_tolerates_unknown_tags() {
        let values =
            decode_list(r#"[{"type":"vector","value":"1"},{"type":"boolean","value":"true"}]"#)
                .unwrap();
        assert!(values[0].is_nil());
        assert_eq!(values[1].as_bool(), Some(true));
    }
}
