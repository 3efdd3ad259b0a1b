//! Typed byte-range field codec.
//!
//! Request and response payloads are built from ordered lists of [`Field`]s.
//! A field knows its name, its wire length and how to convert between a
//! high-level [`Value`] and raw bytes. Lengths are usually fixed, but a
//! trailing field may derive its length from the total payload length
//! ("rest of payload" semantics).
//!
//! Decoding fails soft: when the remaining payload is shorter than a field's
//! declared length, parsing of that command stops, already-decoded fields are
//! kept and a warning is logged. This keeps a single malformed field from
//! voiding an otherwise useful response.

use std::collections::HashMap;

use crate::error::{CorebusError, Result};

/// Wire length of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLength {
    /// Fixed number of bytes.
    Fixed(usize),
    /// Total payload length minus `minus` bytes (trailing variable field).
    Remaining { minus: usize },
}

impl FieldLength {
    /// Resolve the length against the total decoded-payload length.
    pub fn resolve(&self, payload_length: usize) -> Option<usize> {
        match self {
            FieldLength::Fixed(length) => Some(*length),
            FieldLength::Remaining { minus } => payload_length.checked_sub(*minus),
        }
    }

    /// The length if statically known.
    pub fn fixed(&self) -> Option<usize> {
        match self {
            FieldLength::Fixed(length) => Some(*length),
            FieldLength::Remaining { .. } => None,
        }
    }
}

/// A decoded or to-be-encoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Unsigned integer (byte, word, u32).
    Int(u64),
    /// Character or textual value (chars, addresses, versions, strings).
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Array of 16-bit words.
    Words(Vec<u16>),
}

impl Value {
    /// The integer content, if this is an [`Value::Int`].
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// The textual content, if this is a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    /// The raw bytes, if this is a [`Value::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(value) => Some(value),
            _ => None,
        }
    }

    /// The word array, if this is a [`Value::Words`].
    pub fn as_words(&self) -> Option<&[u16]> {
        match self {
            Value::Words(value) => Some(value),
            _ => None,
        }
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Value::Int(u64::from(value))
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::Int(u64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(u64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

/// Name-to-value mapping used for requests and responses.
pub type FieldValues = HashMap<&'static str, Value>;

/// The wire representation of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldKind {
    /// Single unsigned byte.
    Byte,
    /// Single printable ASCII character.
    Char,
    /// 16-bit unsigned integer, big endian.
    Word,
    /// 32-bit unsigned integer, big endian.
    UInt32,
    /// Raw byte array of the given length.
    RawBytes(FieldLength),
    /// Fixed-count array of big-endian words.
    WordArray(usize),
    /// Dotted-decimal address of `width` raw bytes (e.g. `"001.002.003.004"`).
    Address(usize),
    /// Dotted firmware version of 3 raw bytes (e.g. `"1.0.12"`).
    Version,
    /// NUL-terminated string covering the rest of the payload.
    CString,
    /// Fixed literal bytes; encodes without a caller-supplied value.
    Literal(Vec<u8>),
    /// Zero padding; parsed but never surfaced.
    Padding(usize),
}

/// Field of a command: a named, typed byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: &'static str,
    kind: FieldKind,
}

impl Field {
    /// Single unsigned byte.
    pub fn byte(name: &'static str) -> Self {
        Field { name, kind: FieldKind::Byte }
    }

    /// Single ASCII character.
    pub fn char(name: &'static str) -> Self {
        Field { name, kind: FieldKind::Char }
    }

    /// 16-bit unsigned integer, big endian.
    pub fn word(name: &'static str) -> Self {
        Field { name, kind: FieldKind::Word }
    }

    /// 32-bit unsigned integer, big endian.
    pub fn uint32(name: &'static str) -> Self {
        Field { name, kind: FieldKind::UInt32 }
    }

    /// Raw byte array of fixed length.
    pub fn raw_bytes(name: &'static str, length: usize) -> Self {
        Field { name, kind: FieldKind::RawBytes(FieldLength::Fixed(length)) }
    }

    /// Raw byte array covering the rest of the payload, minus `minus` bytes.
    pub fn remaining_bytes(name: &'static str, minus: usize) -> Self {
        Field { name, kind: FieldKind::RawBytes(FieldLength::Remaining { minus }) }
    }

    /// Fixed-count array of big-endian words.
    pub fn word_array(name: &'static str, count: usize) -> Self {
        Field { name, kind: FieldKind::WordArray(count) }
    }

    /// Dotted-decimal address of 4 raw bytes.
    pub fn address(name: &'static str) -> Self {
        Field { name, kind: FieldKind::Address(4) }
    }

    /// Dotted firmware version of 3 raw bytes.
    pub fn version(name: &'static str) -> Self {
        Field { name, kind: FieldKind::Version }
    }

    /// NUL-terminated trailing string.
    pub fn string(name: &'static str) -> Self {
        Field { name, kind: FieldKind::CString }
    }

    /// Fixed literal bytes, encoded without a caller-supplied value.
    pub fn literal(data: &[u8]) -> Self {
        Field { name: "literal", kind: FieldKind::Literal(data.to_vec()) }
    }

    /// Zero padding of the given length; decoded value is discarded.
    pub fn padding(length: usize) -> Self {
        Field { name: "padding", kind: FieldKind::Padding(length) }
    }

    /// Field name, the key in a [`FieldValues`] map.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wire length of this field.
    pub fn length(&self) -> FieldLength {
        match &self.kind {
            FieldKind::Byte | FieldKind::Char => FieldLength::Fixed(1),
            FieldKind::Word => FieldLength::Fixed(2),
            FieldKind::UInt32 => FieldLength::Fixed(4),
            FieldKind::RawBytes(length) => *length,
            FieldKind::WordArray(count) => FieldLength::Fixed(count * 2),
            FieldKind::Address(width) => FieldLength::Fixed(*width),
            FieldKind::Version => FieldLength::Fixed(3),
            FieldKind::CString => FieldLength::Remaining { minus: 0 },
            FieldKind::Literal(data) => FieldLength::Fixed(data.len()),
            FieldKind::Padding(length) => FieldLength::Fixed(*length),
        }
    }

    /// Whether this field's decoded value is surfaced to the caller.
    pub fn is_surfaced(&self) -> bool {
        !matches!(self.kind, FieldKind::Padding(_))
    }

    /// Whether this field encodes without a caller-supplied value.
    fn is_implicit(&self) -> bool {
        matches!(self.kind, FieldKind::Literal(_) | FieldKind::Padding(_))
    }

    /// Encode a high-level value into its wire bytes.
    ///
    /// `value` may be `None` for literal and padding fields only.
    pub fn encode(&self, value: Option<&Value>) -> Result<Vec<u8>> {
        if self.is_implicit() {
            return match &self.kind {
                FieldKind::Literal(data) => Ok(data.clone()),
                FieldKind::Padding(length) => Ok(vec![0u8; *length]),
                _ => unreachable!(),
            };
        }
        let value = value.ok_or_else(|| {
            CorebusError::InvalidValue(format!("missing value for field `{}`", self.name))
        })?;
        match &self.kind {
            FieldKind::Byte => {
                let int = self.int_within(value, 0xFF)?;
                Ok(vec![int as u8])
            }
            FieldKind::Char => {
                let text = self.str_value(value)?;
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii() => Ok(vec![c as u8]),
                    _ => Err(CorebusError::InvalidValue(format!(
                        "field `{}` expects a single ASCII character, got `{}`",
                        self.name, text
                    ))),
                }
            }
            FieldKind::Word => {
                let int = self.int_within(value, 0xFFFF)?;
                Ok((int as u16).to_be_bytes().to_vec())
            }
            FieldKind::UInt32 => {
                let int = self.int_within(value, u64::from(u32::MAX))?;
                Ok((int as u32).to_be_bytes().to_vec())
            }
            FieldKind::RawBytes(length) => {
                let data = value.as_bytes().ok_or_else(|| {
                    CorebusError::InvalidValue(format!("field `{}` expects raw bytes", self.name))
                })?;
                if let Some(expected) = length.fixed() {
                    if data.len() != expected {
                        return Err(CorebusError::InvalidValue(format!(
                            "field `{}` expects {} bytes, got {}",
                            self.name,
                            expected,
                            data.len()
                        )));
                    }
                }
                Ok(data.to_vec())
            }
            FieldKind::WordArray(count) => {
                let words = value.as_words().ok_or_else(|| {
                    CorebusError::InvalidValue(format!("field `{}` expects a word array", self.name))
                })?;
                if words.len() != *count {
                    return Err(CorebusError::InvalidValue(format!(
                        "field `{}` expects {} words, got {}",
                        self.name,
                        count,
                        words.len()
                    )));
                }
                Ok(words.iter().flat_map(|word| word.to_be_bytes()).collect())
            }
            FieldKind::Address(width) => {
                let text = self.str_value(value)?;
                encode_dotted(text, *width)
            }
            FieldKind::Version => {
                let text = self.str_value(value)?;
                encode_dotted(text, 3)
            }
            FieldKind::CString => {
                let text = self.str_value(value)?;
                if !text.is_ascii() {
                    return Err(CorebusError::InvalidValue(format!(
                        "field `{}` expects an ASCII string",
                        self.name
                    )));
                }
                let mut data = text.as_bytes().to_vec();
                data.push(0);
                Ok(data)
            }
            FieldKind::Literal(_) | FieldKind::Padding(_) => unreachable!(),
        }
    }

    /// Decode wire bytes into a high-level value.
    ///
    /// `data` is exactly the resolved field length; slicing happens upstream.
    pub fn decode(&self, data: &[u8]) -> Value {
        match &self.kind {
            FieldKind::Byte => Value::Int(u64::from(data[0])),
            FieldKind::Char => Value::Str((data[0] as char).to_string()),
            FieldKind::Word => Value::Int(u64::from(u16::from_be_bytes([data[0], data[1]]))),
            FieldKind::UInt32 => Value::Int(u64::from(u32::from_be_bytes([
                data[0], data[1], data[2], data[3],
            ]))),
            FieldKind::RawBytes(_) | FieldKind::Literal(_) | FieldKind::Padding(_) => {
                Value::Bytes(data.to_vec())
            }
            FieldKind::WordArray(_) => Value::Words(
                data.chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect(),
            ),
            FieldKind::Address(_) => Value::Str(
                data.iter()
                    .map(|byte| format!("{:03}", byte))
                    .collect::<Vec<_>>()
                    .join("."),
            ),
            FieldKind::Version => Value::Str(
                data.iter()
                    .map(|byte| byte.to_string())
                    .collect::<Vec<_>>()
                    .join("."),
            ),
            FieldKind::CString => {
                let end = data.iter().position(|&byte| byte == 0).unwrap_or(data.len());
                Value::Str(String::from_utf8_lossy(&data[..end]).into_owned())
            }
        }
    }

    fn int_within(&self, value: &Value, max: u64) -> Result<u64> {
        let int = value.as_int().ok_or_else(|| {
            CorebusError::InvalidValue(format!("field `{}` expects an integer", self.name))
        })?;
        if int > max {
            return Err(CorebusError::InvalidValue(format!(
                "value `{}` out of limits for field `{}`: 0 <= value <= {}",
                int, self.name, max
            )));
        }
        Ok(int)
    }

    fn str_value<'a>(&self, value: &'a Value) -> Result<&'a str> {
        value.as_str().ok_or_else(|| {
            CorebusError::InvalidValue(format!("field `{}` expects a string", self.name))
        })
    }
}

/// Encode a dotted-decimal string (`"001.002.003.004"`) into `width` raw bytes.
pub fn encode_dotted(text: &str, width: usize) -> Result<Vec<u8>> {
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != width {
        return Err(CorebusError::InvalidAddress(text.to_string(), width));
    }
    let mut data = Vec::with_capacity(width);
    for part in parts {
        let byte: u8 = part
            .parse()
            .map_err(|_| CorebusError::InvalidAddress(text.to_string(), width))?;
        data.push(byte);
    }
    Ok(data)
}

/// Decode an ordered field table from a response payload.
///
/// Stops (with a warning) as soon as the remaining payload is shorter than a
/// field's resolved length; fields decoded so far are returned as-is.
pub fn parse_fields(fields: &[Field], payload: &[u8]) -> FieldValues {
    let payload_length = payload.len();
    let mut remaining = payload;
    let mut result = FieldValues::new();
    for field in fields {
        let length = match field.length().resolve(payload_length) {
            Some(length) => length,
            None => {
                tracing::warn!(
                    field = field.name(),
                    payload_length,
                    "payload too short to resolve field length"
                );
                break;
            }
        };
        if remaining.len() < length {
            tracing::warn!(
                field = field.name(),
                expected = length,
                available = remaining.len(),
                "payload did not contain all the expected data"
            );
            break;
        }
        let (data, rest) = remaining.split_at(length);
        if field.is_surfaced() {
            result.insert(field.name(), field.decode(data));
        }
        remaining = rest;
    }
    result
}
