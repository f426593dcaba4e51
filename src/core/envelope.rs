//! Key-value envelope codec
//!
//! Several streams carry a string-keyed JSON mapping stored as UTF-16LE
//! text followed by a two-byte NUL terminator. The JSON text uses `", "`
//! and `": "` separators and escapes every non-ASCII character as a
//! lowercase `\uXXXX` sequence (surrogate pairs above the BMP), which is
//! the form existing host tooling writes. Encoded output is therefore pure
//! ASCII before transcoding.
//!
//! Numbers follow the same tooling: integers print in full, and floats use
//! the shortest round-trip digits with Python's `repr` layout (`1e+16`,
//! `1e-05`, `1000000000000000.0`). NaN and infinities have no JSON form and
//! are written as `null`.
//!
//! ```
//! use vmgs_rs::core::envelope::{self, Envelope};
//! use serde_json::json;
//!
//! let mut map = Envelope::new();
//! map.insert("name".into(), json!("vm1"));
//! map.insert("size".into(), json!(1024));
//!
//! let bytes = envelope::encode(&map).unwrap();
//! assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);
//! assert_eq!(envelope::decode(&bytes).unwrap(), map);
//! ```

use crate::error::{Result, VmgsError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::io;

/// Decoded mapping; keys keep their insertion order
pub type Envelope = Map<String, Value>;

const TERMINATOR: [u8; 2] = [0, 0];

/// Compact JSON with spaced separators and ASCII-only output
struct HostFormatter;

impl Formatter for HostFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(float_repr(value)?.as_bytes())
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let bytes = fragment.as_bytes();
        let mut start = 0;
        for (idx, ch) in fragment.char_indices() {
            // Printable ASCII passes through; DEL is escaped too
            if ch.is_ascii() && ch != '\x7f' {
                continue;
            }
            writer.write_all(&bytes[start..idx])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = idx + ch.len_utf8();
        }
        writer.write_all(&bytes[start..])
    }
}

/// Lay out a finite float the way Python's `repr` does
///
/// Positional notation for decimal exponents -4 through 15, otherwise
/// `d.ddde±XX` with at least two exponent digits.
fn float_repr(value: f64) -> io::Result<String> {
    // Rust's `{:e}` already yields the shortest round-trip digits
    let scientific = format!("{:e}", value);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "float without exponent"))?;
    let exponent: i32 = exponent
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad float exponent"))?;

    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|&c| c != '.').collect();

    let mut out = String::from(sign);
    if (-4..16).contains(&exponent) {
        if exponent < 0 {
            out.push_str("0.");
            out.push_str(&"0".repeat((-exponent - 1) as usize));
            out.push_str(&digits);
        } else {
            let point = exponent as usize + 1;
            if digits.len() <= point {
                out.push_str(&digits);
                out.push_str(&"0".repeat(point - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..point]);
                out.push('.');
                out.push_str(&digits[point..]);
            }
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        out.push_str(&format!("e{}{:02}", exp_sign, exponent.abs()));
    }
    Ok(out)
}

/// Serialize any value as ASCII JSON text
fn to_ascii_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut text = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut text, HostFormatter);
    value.serialize(&mut serializer)?;
    Ok(text)
}

/// Encode a mapping as UTF-16LE JSON with a NUL terminator
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let text = to_ascii_json(envelope)?;

    // ASCII maps 1:1 onto UTF-16 code units
    let mut out = Vec::with_capacity(text.len() * 2 + TERMINATOR.len());
    for byte in text {
        out.push(byte);
        out.push(0);
    }
    out.extend_from_slice(&TERMINATOR);
    Ok(out)
}

/// Decode a UTF-16LE JSON payload into a mapping
///
/// Trailing U+0000 characters are stripped before parsing; a payload
/// without a terminator is accepted.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    if bytes.len() % 2 != 0 {
        return Err(VmgsError::EnvelopeDecode(format!(
            "odd payload length {}",
            bytes.len()
        )));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let text = String::from_utf16(&units)
        .map_err(|_| VmgsError::EnvelopeDecode("payload is not valid UTF-16".to_string()))?;

    let value: Value = serde_json::from_str(text.trim_end_matches('\0'))
        .map_err(|e| VmgsError::EnvelopeDecode(format!("invalid JSON: {}", e)))?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(VmgsError::EnvelopeDecode(format!(
            "top-level value must be an object, found {}",
            kind(&other)
        ))),
    }
}

/// Encode a serializable struct or map
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => encode(&map),
        other => Err(VmgsError::EnvelopeDecode(format!(
            "top-level value must be an object, found {}",
            kind(&other)
        ))),
    }
}

/// Decode into a typed value
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let map = decode(bytes)?;
    Ok(serde_json::from_value(Value::Object(map))?)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn utf16le(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn map(value: Value) -> Envelope {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_encode_known_layout() {
        let envelope = map(json!({"name": "vm1", "size": 1024}));
        let bytes = encode(&envelope).unwrap();

        let mut expected = utf16le(r#"{"name": "vm1", "size": 1024}"#);
        expected.extend_from_slice(&[0, 0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_empty_mapping() {
        let bytes = encode(&Envelope::new()).unwrap();
        assert_eq!(bytes, [b'{', 0, b'}', 0, 0, 0]);
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut envelope = Envelope::new();
        envelope.insert("zeta".into(), json!(1));
        envelope.insert("alpha".into(), json!([1, 2]));
        let bytes = encode(&envelope).unwrap();

        let mut expected = utf16le(r#"{"zeta": 1, "alpha": [1, 2]}"#);
        expected.extend_from_slice(&[0, 0]);
        assert_eq!(bytes, expected);

        let keys: Vec<_> = decode(&bytes).unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_non_ascii_escaped() {
        let envelope = map(json!({"k\u{e9}y": "\u{1F600}\u{7f}\n"}));
        let bytes = encode(&envelope).unwrap();

        let mut expected = utf16le(r#"{"k\u00e9y": "\ud83d\ude00\u007f\n"}"#);
        expected.extend_from_slice(&[0, 0]);
        assert_eq!(bytes, expected);
        assert_eq!(decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_float_layout() {
        let cases = [
            (1.5, "1.5"),
            (0.1, "0.1"),
            (123.456, "123.456"),
            (2.0, "2.0"),
            (-0.0, "-0.0"),
            (0.0001, "0.0001"),
            (0.00001, "1e-05"),
            (1.5e-7, "1.5e-07"),
            (1e15, "1000000000000000.0"),
            (1e16, "1e+16"),
            (-2.5e20, "-2.5e+20"),
            (f64::MAX, "1.7976931348623157e+308"),
            (5e-324, "5e-324"),
        ];
        for (value, text) in cases {
            assert_eq!(float_repr(value).unwrap(), text);

            let envelope = map(json!({ "f": value }));
            let bytes = encode(&envelope).unwrap();
            let mut expected = utf16le(&format!("{{\"f\": {}}}", text));
            expected.extend_from_slice(&[0, 0]);
            assert_eq!(bytes, expected);
            assert_eq!(decode(&bytes).unwrap(), envelope);
        }
    }

    #[test]
    fn test_non_finite_floats_become_null() {
        let mut envelope = Envelope::new();
        envelope.insert("nan".into(), Value::from(f64::NAN));
        let bytes = encode(&envelope).unwrap();
        assert_eq!(decode(&bytes).unwrap(), map(json!({ "nan": null })));
    }

    #[test]
    fn test_reencode_is_identical() {
        let envelope = map(json!({
            "nested": {"a": [true, null, 1.5, -3]},
            "text": "caf\u{e9}",
        }));
        let bytes = encode(&envelope).unwrap();
        assert_eq!(encode(&decode(&bytes).unwrap()).unwrap(), bytes);
    }

    #[test]
    fn test_decode_strips_only_trailing_nuls() {
        let mut bytes = utf16le(r#"{"a": 1}"#);
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        assert_eq!(decode(&bytes).unwrap(), map(json!({"a": 1})));

        // No terminator at all
        assert_eq!(
            decode(&utf16le(r#"{"a": 1}"#)).unwrap(),
            map(json!({"a": 1}))
        );

        // A leading NUL is not stripped
        let mut leading = vec![0, 0];
        leading.extend(utf16le(r#"{"a": 1}"#));
        assert!(matches!(decode(&leading), Err(VmgsError::EnvelopeDecode(_))));
    }

    #[test]
    fn test_decode_odd_length() {
        let mut bytes = encode(&map(json!({"a": 1}))).unwrap();
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(VmgsError::EnvelopeDecode(_))));
    }

    #[test]
    fn test_decode_unpaired_surrogate() {
        let mut bytes = utf16le(r#"{"a": ""#);
        bytes.extend_from_slice(&0xD800u16.to_le_bytes());
        bytes.extend(utf16le(r#""}"#));
        assert!(matches!(decode(&bytes), Err(VmgsError::EnvelopeDecode(_))));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        for text in ["[1, 2]", "\"text\"", "42", "null", ""] {
            let mut bytes = utf16le(text);
            bytes.extend_from_slice(&[0, 0]);
            assert!(
                matches!(decode(&bytes), Err(VmgsError::EnvelopeDecode(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        name: String,
        memory_mb: u32,
        secure_boot: bool,
    }

    #[test]
    fn test_typed_round_trip() {
        let settings = Settings {
            name: "guest".to_string(),
            memory_mb: 2048,
            secure_boot: true,
        };
        let bytes = encode_value(&settings).unwrap();
        assert_eq!(decode_value::<Settings>(&bytes).unwrap(), settings);
    }

    #[test]
    fn test_typed_errors() {
        assert!(matches!(
            encode_value(&vec![1, 2, 3]),
            Err(VmgsError::EnvelopeDecode(_))
        ));

        let bytes = encode(&map(json!({"name": "guest"}))).unwrap();
        assert!(matches!(
            decode_value::<Settings>(&bytes),
            Err(VmgsError::Serialization(_))
        ));
    }
}
