//! Declarative binding of the parameter mapping into typed records.
//!
//! A record implements [`Bind`], usually through `#[derive(Bind)]`. The derive macro reads the
//! `#[web("...")]` attribute of every field and emits a static [`FieldRule`] table:
//!
//! | attribute                | source key         | behavior                              |
//! |--------------------------|--------------------|---------------------------------------|
//! | none                     | lower-cased name   | optional, zero value when missing     |
//! | `#[web("id")]`           | `id`               | optional                              |
//! | `#[web("id,required")]`  | `id`               | missing key fails the binding         |
//! | `#[web(",20")]`          | lower-cased name   | missing key uses the literal `20`     |
//! | `#[web("-")]`            | none               | never read, always `Default`          |
//!
//! Every field is visited, so a failed binding reports all offending keys at once.
//!
//! ```
//! use micro_api::Bind;
//!
//! #[derive(Debug, Bind)]
//! struct GetMessages {
//!     #[web(",20")]
//!     limit: u32,
//!     #[web("q")]
//!     query: Option<String>,
//! }
//!
//! let values = [("q".to_owned(), serde_json::json!("hello"))].into_iter().collect();
//! let args = GetMessages::bind(&values).unwrap();
//! assert_eq!(args.limit, 20);
//! assert_eq!(args.query.as_deref(), Some("hello"));
//! ```

mod de;

pub use de::DeError;
pub use de::ValueDeserializer;

use crate::reply::Failure;
use crate::request::Values;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A record that can be populated from the parameter mapping.
pub trait Bind: Sized {
    /// The rule of every field, in declaration order
    fn rules() -> &'static [FieldRule];

    fn bind(values: &Values) -> Result<Self, BindError>;
}

/// How one field of a [`Bind`] record is read from the parameter mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub field: &'static str,
    pub source_key: &'static str,
    pub required: bool,
    pub default: Option<&'static str>,
    pub ignored: bool,
}

impl FieldRule {
    pub const fn new(field: &'static str, source_key: &'static str) -> Self {
        Self { field, source_key, required: false, default: None, ignored: false }
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub const fn with_default(mut self, literal: &'static str) -> Self {
        self.default = Some(literal);
        self
    }

    #[must_use]
    pub const fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }
}

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("required parameter missing: `{key}`")]
    Missing { key: &'static str },

    #[error("'{key}' {source}")]
    Invalid {
        key: &'static str,
        #[source]
        source: DeError,
    },

    #[error("'{key}' invalid default `{literal}`: {source}")]
    InvalidDefault {
        key: &'static str,
        literal: &'static str,
        #[source]
        source: DeError,
    },
}

impl FieldError {
    pub fn key(&self) -> &'static str {
        match self {
            FieldError::Missing { key } | FieldError::Invalid { key, .. } | FieldError::InvalidDefault { key, .. } => key,
        }
    }
}

/// Every field error of one binding attempt.
#[derive(Debug, Default)]
pub struct BindError {
    errors: Vec<FieldError>,
}

impl BindError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns `value` when no field failed.
    pub fn into_result<T>(self, value: T) -> Result<T, BindError> {
        if self.errors.is_empty() { Ok(value) } else { Err(self) }
    }

    /// `400 {"error":"invalid argument","message":"<field errors>"}`
    pub fn into_failure(self) -> Failure {
        Failure::invalid_argument(self.to_string())
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BindError {}

/// Reads one field following its rule. Failures are collected into `errors` and the field
/// falls back to its `Default` so the remaining fields are still visited.
pub fn bind_field<T>(values: &Values, rule: &FieldRule, errors: &mut BindError) -> T
where
    T: DeserializeOwned + Default,
{
    if rule.ignored {
        return T::default();
    }

    match (values.get(rule.source_key), rule.default) {
        (Some(value), _) => T::deserialize(ValueDeserializer::new(value)).unwrap_or_else(|source| {
            errors.push(FieldError::Invalid { key: rule.source_key, source });
            T::default()
        }),
        (None, _) if rule.required => {
            errors.push(FieldError::Missing { key: rule.source_key });
            T::default()
        }
        (None, Some(literal)) => {
            let value = Value::String(literal.to_owned());
            T::deserialize(ValueDeserializer::new(&value)).unwrap_or_else(|source| {
                errors.push(FieldError::InvalidDefault { key: rule.source_key, literal, source });
                T::default()
            })
        }
        (None, None) => T::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> Values {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    #[test]
    fn test_present_value_is_coerced() {
        let mut errors = BindError::new();
        let id: u32 = bind_field(&values(&[("id", json!("42"))]), &FieldRule::new("id", "id").required(), &mut errors);
        assert_eq!(id, 42);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_missing_required() {
        let mut errors = BindError::new();
        let name: String = bind_field(&values(&[]), &FieldRule::new("name", "name").required(), &mut errors);
        assert_eq!(name, "");
        assert_eq!(errors.to_string(), "required parameter missing: `name`");
        assert_eq!(errors.errors()[0].key(), "name");
    }

    #[test]
    fn test_default_literal_and_zero_value() {
        let mut errors = BindError::new();
        let limit: u32 = bind_field(&values(&[]), &FieldRule::new("limit", "limit").with_default("20"), &mut errors);
        let zero: i64 = bind_field(&values(&[]), &FieldRule::new("zero", "zero"), &mut errors);
        assert_eq!((limit, zero), (20, 0));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_bad_default_literal() {
        let mut errors = BindError::new();
        let _: u32 = bind_field(&values(&[]), &FieldRule::new("limit", "limit").with_default("many"), &mut errors);
        assert_eq!(errors.to_string(), "'limit' invalid default `many`: invalid integer \"many\"");
    }

    #[test]
    fn test_ignored_field_is_never_read() {
        let mut errors = BindError::new();
        let ignored: String = bind_field(&values(&[("secret", json!("x"))]), &FieldRule::new("secret", "secret").ignored(), &mut errors);
        assert_eq!(ignored, "");
        assert!(errors.is_empty());
    }

    #[test]
    fn test_errors_are_aggregated() {
        let vals = values(&[("id", json!("abc"))]);
        let mut errors = BindError::new();
        let _: u32 = bind_field(&vals, &FieldRule::new("id", "id"), &mut errors);
        let _: String = bind_field(&vals, &FieldRule::new("name", "name").required(), &mut errors);

        assert_eq!(errors.errors().len(), 2);
        assert_eq!(errors.to_string(), "'id' invalid integer \"abc\"; required parameter missing: `name`");

        let failure = errors.into_failure();
        assert_eq!(failure.error(), "invalid argument");
        assert_eq!(failure.status(), http::StatusCode::BAD_REQUEST);
    }
}
