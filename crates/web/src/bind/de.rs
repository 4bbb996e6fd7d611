//! A lenient serde `Deserializer` over a single parameter value.
//!
//! Parameters mostly arrive as text, so every scalar type accepts both its native JSON
//! representation and a textual one. Integer narrowing wraps instead of failing, the same
//! way a primitive `as` cast does. Structured types (structs, maps, enums) are decoded from
//! JSON text with plain `serde_json` rules.

use serde::de::{self, DeserializeSeed, SeqAccess, Visitor};
use serde::Deserializer;
use serde_json::Value;
use std::borrow::Cow;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeError {
    #[error("invalid {kind} \"{text}\"")]
    Invalid { kind: &'static str, text: String },

    #[error("expected {expected}, found {found}")]
    Mismatch { expected: &'static str, found: &'static str },

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

impl de::Error for DeError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        DeError::Custom(msg.to_string())
    }
}

impl DeError {
    fn invalid(kind: &'static str, text: &str) -> Self {
        DeError::Invalid { kind, text: text.to_owned() }
    }
}

#[derive(Debug, Clone, Copy)]
enum Input<'de> {
    Value(&'de Value),
    /// one element of a comma separated list
    Text(&'de str),
}

/// Deserializes one value of the parameter mapping into any `serde` type.
#[derive(Debug, Clone, Copy)]
pub struct ValueDeserializer<'de> {
    input: Input<'de>,
}

impl<'de> ValueDeserializer<'de> {
    pub fn new(value: &'de Value) -> Self {
        Self { input: Input::Value(value) }
    }

    fn text(&self) -> Option<&'de str> {
        match self.input {
            Input::Text(text) => Some(text),
            Input::Value(Value::String(text)) => Some(text),
            Input::Value(_) => None,
        }
    }

    fn found(&self) -> &'static str {
        match self.input {
            Input::Text(_) | Input::Value(Value::String(_)) => "text",
            Input::Value(Value::Null) => "null",
            Input::Value(Value::Bool(_)) => "boolean",
            Input::Value(Value::Number(_)) => "number",
            Input::Value(Value::Array(_)) => "array",
            Input::Value(Value::Object(_)) => "object",
        }
    }

    fn mismatch(&self, expected: &'static str) -> DeError {
        DeError::Mismatch { expected, found: self.found() }
    }

    #[allow(clippy::cast_possible_truncation, reason = "fractional numbers truncate towards zero")]
    fn integer(&self) -> Result<i128, DeError> {
        if let Some(text) = self.text() {
            return wrapping_integer(text.trim()).ok_or_else(|| DeError::invalid("integer", text));
        }

        match self.input {
            Input::Value(Value::Number(n)) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
                (Some(i), _, _) => Ok(i128::from(i)),
                (None, Some(u), _) => Ok(i128::from(u)),
                (None, None, Some(f)) => Ok(f as i128),
                (None, None, None) => Err(self.mismatch("integer")),
            },
            _ => Err(self.mismatch("integer")),
        }
    }

    fn float(&self) -> Result<f64, DeError> {
        if let Some(text) = self.text() {
            return text.trim().parse::<f64>().map_err(|_| DeError::invalid("float", text));
        }

        match self.input {
            Input::Value(Value::Number(n)) => n.as_f64().ok_or_else(|| self.mismatch("float")),
            _ => Err(self.mismatch("float")),
        }
    }

    fn boolean(&self) -> Result<bool, DeError> {
        if let Some(text) = self.text() {
            return match text.trim() {
                "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
                "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
                _ => Err(DeError::invalid("boolean", text)),
            };
        }

        match self.input {
            Input::Value(Value::Bool(b)) => Ok(*b),
            _ => Err(self.mismatch("boolean")),
        }
    }

    /// The JSON document a structured type is decoded from. Text is parsed first.
    fn document(&self) -> Result<Cow<'de, Value>, DeError> {
        match self.text() {
            Some(text) => Ok(Cow::Owned(serde_json::from_str(text)?)),
            None => match self.input {
                Input::Value(value) => Ok(Cow::Borrowed(value)),
                Input::Text(_) => Err(self.mismatch("json")),
            },
        }
    }
}

/// Parses decimal text modulo 2^128, so any digit count is accepted and later narrowing
/// wraps consistently.
#[allow(clippy::cast_possible_wrap, reason = "the magnitude wraps into two's complement")]
fn wrapping_integer(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let magnitude = digits.bytes().fold(0_u128, |acc, b| acc.wrapping_mul(10).wrapping_add(u128::from(b - b'0')));
    let value = magnitude as i128;
    Some(if negative { value.wrapping_neg() } else { value })
}

macro_rules! deserialize_integer {
    ($($method:ident => $visit:ident($ty:ty),)*) => {$(
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_possible_wrap,
            reason = "out of range values wrap like a primitive cast"
        )]
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
            visitor.$visit(self.integer()? as $ty)
        }
    )*};
}

/// Runs a `serde_json` deserializer method against the value's JSON document.
macro_rules! deserialize_document {
    ($self:ident, $method:ident($($arg:expr),*)) => {
        match $self.document()? {
            Cow::Borrowed(value) => value.$method($($arg),*).map_err(DeError::Json),
            Cow::Owned(value) => value.$method($($arg),*).map_err(DeError::Json),
        }
    };
}

impl<'de> Deserializer<'de> for ValueDeserializer<'de> {
    type Error = DeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        if let Some(text) = self.text() {
            return visitor.visit_borrowed_str(text);
        }

        match self.input {
            Input::Value(Value::Array(items)) => visitor.visit_seq(Elements::Values(items.iter())),
            Input::Value(value) => value.deserialize_any(visitor).map_err(DeError::Json),
            Input::Text(_) => Err(self.mismatch("value")),
        }
    }

    deserialize_integer! {
        deserialize_i8 => visit_i8(i8),
        deserialize_i16 => visit_i16(i16),
        deserialize_i32 => visit_i32(i32),
        deserialize_i64 => visit_i64(i64),
        deserialize_u8 => visit_u8(u8),
        deserialize_u16 => visit_u16(u16),
        deserialize_u32 => visit_u32(u32),
        deserialize_u64 => visit_u64(u64),
        deserialize_u128 => visit_u128(u128),
    }

    fn deserialize_i128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_i128(self.integer()?)
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_bool(self.boolean()?)
    }

    #[allow(clippy::cast_possible_truncation, reason = "f32 fields accept f64 precision input")]
    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_f32(self.float()? as f32)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_f64(self.float()?)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        let text = self.text().ok_or_else(|| self.mismatch("character"))?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(DeError::invalid("character", text)),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        if let Some(text) = self.text() {
            return visitor.visit_borrowed_str(text);
        }

        match self.input {
            Input::Value(Value::Null) => Err(self.mismatch("text")),
            Input::Value(value) => visitor.visit_string(value.to_string()),
            Input::Text(_) => Err(self.mismatch("text")),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match self.text() {
            Some(text) => visitor.visit_borrowed_bytes(text.as_bytes()),
            None => self.deserialize_seq(visitor),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        match self.input {
            Input::Value(Value::Null) => visitor.visit_none(),
            _ if self.text().is_some_and(str::is_empty) => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_newtype_struct(self)
    }

    /// Sequences come from a native array, a JSON array in text or a comma separated list.
    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        if let Some(text) = self.text() {
            if text.trim_start().starts_with('[') {
                let document: Value = serde_json::from_str(text)?;
                return document.deserialize_seq(visitor).map_err(DeError::Json);
            }
            if text.is_empty() {
                return visitor.visit_seq(Elements::Empty);
            }
            return visitor.visit_seq(Elements::Text(text.split(',')));
        }

        match self.input {
            Input::Value(Value::Array(items)) => visitor.visit_seq(Elements::Values(items.iter())),
            _ => Err(self.mismatch("sequence")),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        deserialize_document!(self, deserialize_map(visitor))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        deserialize_document!(self, deserialize_struct(name, fields, visitor))
    }

    /// Plain text names a unit variant, JSON text may carry any variant.
    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DeError> {
        if let Some(text) = self.text()
            && !text.trim_start().starts_with('{')
        {
            return Value::String(text.to_owned()).deserialize_enum(name, variants, visitor).map_err(DeError::Json);
        }
        deserialize_document!(self, deserialize_enum(name, variants, visitor))
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DeError> {
        visitor.visit_unit()
    }
}

enum Elements<'de> {
    Values(std::slice::Iter<'de, Value>),
    Text(std::str::Split<'de, char>),
    Empty,
}

impl<'de> SeqAccess<'de> for Elements<'de> {
    type Error = DeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>, DeError> {
        let input = match self {
            Elements::Values(values) => values.next().map(Input::Value),
            Elements::Text(pieces) => pieces.next().map(Input::Text),
            Elements::Empty => None,
        };

        input.map(|input| seed.deserialize(ValueDeserializer { input })).transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        match self {
            Elements::Values(values) => Some(values.len()),
            Elements::Text(_) => None,
            Elements::Empty => Some(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde::de::DeserializeOwned;
    use serde_json::json;

    fn coerce<T: DeserializeOwned>(value: Value) -> Result<T, DeError> {
        T::deserialize(ValueDeserializer::new(&value))
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Item {
        name: String,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(rename_all = "lowercase")]
    enum State {
        Open,
        Closed,
    }

    #[test]
    fn test_integers_from_text_and_numbers() {
        assert_eq!(coerce::<u32>(json!("123465")).unwrap(), 123_465);
        assert_eq!(coerce::<i16>(json!(-32768)).unwrap(), -32768);
        assert_eq!(coerce::<u64>(json!("9300000000000000001")).unwrap(), 9_300_000_000_000_000_001);
        assert_eq!(coerce::<i64>(json!(" 20 ")).unwrap(), 20);
    }

    #[test]
    fn test_integer_narrowing_wraps() {
        assert_eq!(coerce::<i8>(json!("210")).unwrap(), -46);
        assert_eq!(coerce::<u8>(json!(256)).unwrap(), 0);
    }

    #[test]
    fn test_wide_integers() {
        assert_eq!(coerce::<i128>(json!("-170141183460469231731687303715884105728")).unwrap(), i128::MIN);
        assert_eq!(coerce::<i128>(json!(-5)).unwrap(), -5);
        assert_eq!(coerce::<u128>(json!("340282366920938463463374607431768211455")).unwrap(), u128::MAX);

        // beyond 128 bits the text still wraps
        assert_eq!(coerce::<u8>(json!("340282366920938463463374607431768211457")).unwrap(), 1);
        assert_eq!(coerce::<i64>(json!("+42")).unwrap(), 42);
        assert!(coerce::<i32>(json!("-")).is_err());
        assert!(coerce::<i32>(json!("1.5")).is_err());
    }

    #[test]
    fn test_integer_rejects_text() {
        let err = coerce::<i32>(json!("abc")).unwrap_err();
        assert_eq!(err.to_string(), "invalid integer \"abc\"");

        let err = coerce::<i32>(json!(true)).unwrap_err();
        assert_eq!(err.to_string(), "expected integer, found boolean");
    }

    #[test]
    fn test_floats_and_bools() {
        assert!((coerce::<f32>(json!("10.3")).unwrap() - 10.3).abs() < 1e-5);
        assert!((coerce::<f64>(json!(1_000_000.000_000_01)).unwrap() - 1_000_000.000_000_01).abs() < 1e-9);
        assert!(coerce::<bool>(json!("true")).unwrap());
        assert!(!coerce::<bool>(json!("F")).unwrap());
        assert!(coerce::<bool>(json!(true)).unwrap());
        assert!(coerce::<bool>(json!("yes")).is_err());
    }

    #[test]
    fn test_strings_are_lenient() {
        assert_eq!(coerce::<String>(json!("tom")).unwrap(), "tom");
        assert_eq!(coerce::<String>(json!(12)).unwrap(), "12");
        assert_eq!(coerce::<String>(json!(false)).unwrap(), "false");
        assert!(coerce::<String>(Value::Null).is_err());
    }

    #[test]
    fn test_sequences() {
        assert_eq!(coerce::<Vec<String>>(json!("abc,123,efg")).unwrap(), vec!["abc", "123", "efg"]);
        assert_eq!(coerce::<Vec<i64>>(json!("10,20,30")).unwrap(), vec![10, 20, 30]);
        assert_eq!(coerce::<Vec<i32>>(json!("50")).unwrap(), vec![50]);
        assert_eq!(coerce::<Vec<String>>(json!("")).unwrap(), Vec::<String>::new());
        assert_eq!(coerce::<Vec<u8>>(json!([1, "2"])).unwrap(), vec![1, 2]);
        assert_eq!(coerce::<Vec<i32>>(json!("[1, 2]")).unwrap(), vec![1, 2]);
        assert!(coerce::<Vec<i32>>(json!("1,x")).is_err());
    }

    #[test]
    fn test_options() {
        assert_eq!(coerce::<Option<i32>>(json!("")).unwrap(), None);
        assert_eq!(coerce::<Option<i32>>(Value::Null).unwrap(), None);
        assert_eq!(coerce::<Option<i32>>(json!("7")).unwrap(), Some(7));
    }

    #[test]
    fn test_structured_from_json_text() {
        assert_eq!(coerce::<Item>(json!(r#"{"name":"itemname"}"#)).unwrap(), Item { name: "itemname".into() });
        assert_eq!(coerce::<Option<Box<Item>>>(json!(r#"{"name":"x"}"#)).unwrap(), Some(Box::new(Item { name: "x".into() })));
        assert_eq!(
            coerce::<Vec<Item>>(json!(r#"[{"name":"item1"}, {"name":"item2"}]"#)).unwrap(),
            vec![Item { name: "item1".into() }, Item { name: "item2".into() }]
        );
        assert_eq!(coerce::<Item>(json!({"name": "native"})).unwrap(), Item { name: "native".into() });
        assert!(matches!(coerce::<Item>(json!("{broken")), Err(DeError::Json(_))));
    }

    #[test]
    fn test_enums() {
        assert_eq!(coerce::<State>(json!("open")).unwrap(), State::Open);
        assert_eq!(coerce::<State>(json!("closed")).unwrap(), State::Closed);
        assert!(coerce::<State>(json!("ajar")).is_err());
    }

    #[test]
    fn test_any_keeps_text() {
        assert_eq!(coerce::<Value>(json!("12")).unwrap(), json!("12"));
        assert_eq!(coerce::<Value>(json!({"a": 1})).unwrap(), json!({"a": 1}));
    }
}
