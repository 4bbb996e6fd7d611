//! Per request state shared by every pipeline stage.
//!
//! This module contains the core types for working with a request inside the framework:
//! - `RequestContext`: the request head, the raw body, the merged parameter values and
//!   the decoded multipart parts
//! - `Part`: one section of a `multipart/form-data` body
//! - `PathParams`: the variables captured by the matched route pattern
//! - `RequestIds`: the generator of process wide request ids

use crate::bind::{Bind, ValueDeserializer};
use crate::extract::RESERVED_FORM_KEY;
use crate::reply::Failure;
use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Uri, Version};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// The flat parameter name to value mapping assembled from path, query and body.
pub type Values = HashMap<String, Value>;

/// The context of one in-flight request.
///
/// A context is created by the dispatcher once a route matched, owned by that request
/// only and dropped when the response has been produced.
#[derive(Debug)]
pub struct RequestContext {
    request_id: u64,
    head: Parts,
    values: Values,
    raw_body: Bytes,
    multipart: Vec<Part>,
    response_headers: HeaderMap,
}

impl RequestContext {
    /// Creates a new context with the given request id, request head and fully read body
    pub fn new(request_id: u64, head: Parts, raw_body: Bytes) -> Self {
        Self { request_id, head, values: Values::new(), raw_body, multipart: Vec::new(), response_headers: HeaderMap::new() }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Returns the HTTP method of the request
    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// Returns the URI of the request
    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    /// Returns the HTTP version of the request
    pub fn version(&self) -> Version {
        self.head.version
    }

    /// Returns the HTTP headers of the request
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// The body exactly as it was received
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Values {
        &mut self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the value under `key` if it is text
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Returns the value under `key` as an integer, parsing text when needed
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The decoded `multipart/form-data` parts in arrival order
    pub fn multipart(&self) -> &[Part] {
        &self.multipart
    }

    pub(crate) fn push_part(&mut self, part: Part) {
        self.multipart.push(part);
    }

    /// The url-encoded form with every value of a repeated key, if the body was a form
    pub fn post_form(&self) -> Option<HashMap<&str, Vec<&str>>> {
        let Value::Object(form) = self.values.get(RESERVED_FORM_KEY)? else {
            return None;
        };

        let form = form
            .iter()
            .map(|(key, values)| {
                let values: Vec<&str> =
                    values.as_array().map(|values| values.iter().filter_map(Value::as_str).collect()).unwrap_or_default();
                (key.as_str(), values)
            })
            .collect();
        Some(form)
    }

    /// Headers the handler wants written on the response
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    pub(crate) fn take_response_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }

    /// Binds the current values into `T`, mapping binding errors to a `400 invalid argument`
    pub fn bind<T: Bind>(&self) -> Result<T, Failure> {
        T::bind(&self.values).map_err(crate::bind::BindError::into_failure)
    }

    /// Coerces the single value under `key` into `T`
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Result<T, Failure> {
        let value = self.values.get(key).ok_or_else(|| Failure::invalid_argument(format!("'{key}' required parameter missing")))?;
        T::deserialize(ValueDeserializer::new(value)).map_err(|e| Failure::invalid_argument(format!("'{key}' {e}")))
    }
}

/// Named segments captured by the matched route pattern.
///
/// For example, in the pattern "/messages/{id}", "id" is a path parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    inner: Vec<(String, String)>,
}

impl PathParams {
    /// Creates an empty PathParams instance with no parameters
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Gets the value of a path parameter by its name
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/// One section of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct Part {
    form_name: String,
    file_name: Option<String>,
    headers: HeaderMap,
    data: Bytes,
}

impl Part {
    pub fn new(form_name: impl Into<String>, file_name: Option<String>, headers: HeaderMap, data: Bytes) -> Self {
        Self { form_name: form_name.into(), file_name, headers, data }
    }

    /// The `name` parameter of the part's `Content-Disposition`
    pub fn form_name(&self) -> &str {
        &self.form_name
    }

    /// The `filename` parameter, present for file uploads
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_file(&self) -> bool {
        self.file_name.is_some()
    }
}

/// Hands out unique, strictly increasing request ids starting at `1`.
#[derive(Debug, Default)]
pub struct RequestIds {
    last: AtomicU64,
}

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}
