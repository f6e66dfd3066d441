//! Canonical JSON form.
//!
//! A [`Document`] is a JSON value that has already been normalized:
//!
//! - every string and object key is Unicode NFC
//! - integral floats inside the `i64` range are stored as integers, `-0` as `0`
//! - duplicate keys (literal or after normalization) are rejected
//! - nesting is bounded by [`MAX_DEPTH`]
//!
//! Emission then only has to sort keys and write without whitespace, so
//! [`canonicalize`] cannot fail and `canonicalize(parse(canonicalize(x)))`
//! always equals `canonicalize(x)`.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use unicode_normalization::UnicodeNormalization;

use crate::error::{EnvelopeError, EnvelopeResult};

/// Maximum nesting depth accepted by the parser.
pub const MAX_DEPTH: usize = 128;

/// A parsed, normalized JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    value: Value,
}

impl Document {
    /// Parses raw bytes into a normalized document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, duplicate keys or excessive depth.
    pub fn parse(bytes: &[u8]) -> EnvelopeResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_slice(bytes);
        let strict = StrictValue::deserialize(&mut deserializer)
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        deserializer
            .end()
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        Self::from_value(strict.0)
    }

    /// Normalizes an in-memory value into a document.
    ///
    /// # Errors
    ///
    /// Returns an error if keys collide after normalization or nesting is too deep.
    pub fn from_value(value: Value) -> EnvelopeResult<Self> {
        Ok(Self {
            value: normalize(value, 0)?,
        })
    }

    /// Returns the normalized value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the document and returns the normalized value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Returns the canonical form as a string.
    #[must_use]
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        emit_value(&self.value, &mut out);
        out
    }
}

/// Parses an envelope payload into a normalized [`Document`].
///
/// # Errors
///
/// See [`Document::parse`].
pub fn parse_envelope(bytes: &[u8]) -> EnvelopeResult<Document> {
    Document::parse(bytes)
}

/// Produces the canonical byte form of a document.
#[must_use]
pub fn canonicalize(document: &Document) -> Vec<u8> {
    document.to_canonical_string().into_bytes()
}

/// Canonicalizes a JSON string.
///
/// # Errors
///
/// See [`Document::parse`].
pub fn to_canonical_string(json: &str) -> EnvelopeResult<String> {
    Document::parse(json.as_bytes()).map(|doc| doc.to_canonical_string())
}

/// Serializes any value straight to canonical bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON or its keys
/// collide after normalization.
pub fn encode_canonical<T: serde::Serialize>(value: &T) -> EnvelopeResult<Vec<u8>> {
    let value =
        serde_json::to_value(value).map_err(|e| EnvelopeError::InvalidField(e.to_string()))?;
    Document::from_value(value).map(|doc| canonicalize(&doc))
}

fn normalize(value: Value, depth: usize) -> EnvelopeResult<Value> {
    if depth > MAX_DEPTH {
        return Err(EnvelopeError::TooDeep(MAX_DEPTH));
    }

    Ok(match value {
        Value::String(s) => Value::String(nfc(s)),
        Value::Number(n) => Value::Number(normalize_number(n)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize(item, depth + 1))
                .collect::<EnvelopeResult<_>>()?,
        ),
        Value::Object(obj) => {
            let mut out = Map::new();
            for (key, val) in obj {
                let key = nfc(key);
                if out.contains_key(&key) {
                    return Err(EnvelopeError::DuplicateKey(key));
                }
                let val = normalize(val, depth + 1)?;
                out.insert(key, val);
            }
            Value::Object(out)
        }
        other => other,
    })
}

fn nfc(s: String) -> String {
    if unicode_normalization::is_nfc(&s) {
        s
    } else {
        s.nfc().collect()
    }
}

// 2^63 as f64; the representable i64 range is [-2^63, 2^63).
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn normalize_number(n: Number) -> Number {
    if n.is_i64() || n.is_u64() {
        return n;
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= -I64_BOUND && f < I64_BOUND => {
            Number::from(f as i64)
        }
        _ => n,
    }
}

fn emit_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => emit_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                emit_value(item, out);
            }
            out.push(']');
        }
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                emit_string(key, out);
                out.push(':');
                emit_value(&obj[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

// Minimal escaping: quote, backslash and C0 controls only.
fn emit_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c <= '\u{001F}' => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// A JSON value deserialized with literal duplicate-key rejection.
struct StrictValue(Value);

impl<'de> Deserialize<'de> for StrictValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(StrictVisitor).map(StrictValue)
    }
}

struct StrictVisitor;

impl<'de> Visitor<'de> for StrictVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Number::from_f64(v)
            .map(Value::Number)
            .ok_or_else(|| E::custom("non-finite number"))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<StrictValue>()? {
            items.push(item.0);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut seen = BTreeSet::new();
        let mut obj = Map::new();
        while let Some(key) = map.next_key::<String>()? {
            if !seen.insert(key.clone()) {
                return Err(de::Error::custom(format!("duplicate key `{key}`")));
            }
            let value = map.next_value::<StrictValue>()?;
            obj.insert(key, value.0);
        }
        Ok(Value::Object(obj))
    }
}
