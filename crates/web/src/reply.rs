//! Handler results and the wire failure record.
//!
//! Every handler and middleware produces exactly one [`Reply`]. The reply is a closed
//! sum type, so the status code of a result is a property of the [`Reply::Failure`] and
//! [`Reply::Json`] variants only; raw bytes, text and empty results always answer `200`.
//!
//! Handlers rarely build a [`Reply`] by hand. Instead they return anything that implements
//! [`IntoReply`]: strings, bytes, [`Failure`], [`Message`], [`ResultMap`], [`Json`] or a
//! `Result` of those.

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// The result of dispatching one request, consumed once by the [`Responder`](crate::Responder).
pub enum Reply {
    Empty,
    Bytes(Bytes),
    Text(String),
    Failure(Failure),
    Json(JsonReply),
}

impl Reply {
    /// Wraps a serializable value answering `200`.
    pub fn json<T: Serialize + Send + 'static>(value: T) -> Self {
        Self::json_with_status(value, StatusCode::OK)
    }

    pub fn json_with_status<T: Serialize + Send + 'static>(value: T, status: StatusCode) -> Self {
        Reply::Json(JsonReply { body: Box::new(value), status })
    }

    /// The status code this reply will be written with.
    pub fn status(&self) -> StatusCode {
        match self {
            Reply::Empty | Reply::Bytes(_) | Reply::Text(_) => StatusCode::OK,
            Reply::Failure(failure) => failure.status(),
            Reply::Json(json) => json.status,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Reply::Failure(_))
    }

    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Reply::Failure(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Empty => f.write_str("Empty"),
            Reply::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Reply::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Reply::Failure(failure) => f.debug_tuple("Failure").field(failure).finish(),
            Reply::Json(json) => f.debug_tuple("Json").field(&json.status).finish(),
        }
    }
}

/// Object safe serialization of an arbitrary record.
pub trait ToJson: Send {
    fn to_json(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T: Serialize + Send> ToJson for T {
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// A type erased record waiting to be encoded, plus the status it will be written with.
pub struct JsonReply {
    body: Box<dyn ToJson>,
    status: StatusCode,
}

impl JsonReply {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        self.body.to_json()
    }
}

/// The structured `{error, message}` record returned for every failed request.
///
/// The status is carried alongside the record and is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    error: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    message: String,
    #[serde(skip)]
    status: StatusCode,
}

impl Failure {
    pub fn new(error: impl Into<String>, status: StatusCode) -> Self {
        Self { error: error.into(), message: String::new(), status }
    }

    pub fn with_message(error: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self { error: error.into(), message: message.into(), status }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_message("bad parameter", message, StatusCode::BAD_REQUEST)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message("invalid argument", message, StatusCode::BAD_REQUEST)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::with_message("payload too large", message, StatusCode::PAYLOAD_TOO_LARGE)
    }

    pub fn not_found() -> Self {
        Self::new("not found", StatusCode::NOT_FOUND)
    }

    pub fn method_not_allowed() -> Self {
        Self::new("method not allowed", StatusCode::METHOD_NOT_ALLOWED)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::with_message("server error", message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} ({})", self.error, self.status.as_u16())
        } else {
            write!(f, "{}: {} ({})", self.error, self.message, self.status.as_u16())
        }
    }
}

/// Any error a handler propagates with `?` becomes a `500 server error` carrying its text.
impl<E: std::error::Error> From<E> for Failure {
    fn from(e: E) -> Self {
        Failure::server_error(e.to_string())
    }
}

/// A plain `{"message": ...}` body with its own status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    message: String,
    #[serde(skip)]
    status: StatusCode,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_status(message, StatusCode::OK)
    }

    pub fn with_status(message: impl Into<String>, status: StatusCode) -> Self {
        Self { message: message.into(), status }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// A JSON object result that may embed its own status under [`ResultMap::STATUS_KEY`].
///
/// The status key is removed before the map is serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultMap(Map<String, Value>);

impl ResultMap {
    pub const STATUS_KEY: &'static str = "__code__";

    pub fn new() -> Self {
        Self::default()
    }

    /// `{"result":"ok"}`
    pub fn ok() -> Self {
        Self::new().insert("result", "ok")
    }

    #[must_use]
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_status(self, status: StatusCode) -> Self {
        self.insert(Self::STATUS_KEY, status.as_u16())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Strips the embedded status, falling back to `200` when absent or not a valid code.
    pub fn take_status(&mut self) -> StatusCode {
        self.0
            .remove(Self::STATUS_KEY)
            .and_then(|code| code.as_u64())
            .and_then(|code| u16::try_from(code).ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK)
    }
}

impl From<Map<String, Value>> for ResultMap {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Serializes the wrapped value as the response body.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

/// Conversion of handler return values into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Reply {
        Reply::Empty
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Reply {
        self.map_or(Reply::Empty, IntoReply::into_reply)
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply {
        Reply::Text(self)
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply {
        Reply::Text(self.to_owned())
    }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Reply {
        Reply::Bytes(self)
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Reply {
        Reply::Bytes(Bytes::from(self))
    }
}

impl IntoReply for Failure {
    fn into_reply(self) -> Reply {
        Reply::Failure(self)
    }
}

impl IntoReply for Message {
    fn into_reply(self) -> Reply {
        let status = self.status;
        Reply::json_with_status(self, status)
    }
}

impl IntoReply for ResultMap {
    fn into_reply(mut self) -> Reply {
        let status = self.take_status();
        Reply::json_with_status(self, status)
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Reply {
        Reply::json(self)
    }
}

impl<T: Serialize + Send + 'static> IntoReply for Json<T> {
    fn into_reply(self) -> Reply {
        Reply::json(self.0)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<Failure>,
{
    fn into_reply(self) -> Reply {
        match self {
            Ok(t) => t.into_reply(),
            Err(e) => Reply::Failure(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(reply: &Reply) -> Value {
        match reply {
            Reply::Json(json) => serde_json::from_slice(&json.encode().unwrap()).unwrap(),
            Reply::Failure(failure) => serde_json::to_value(failure).unwrap(),
            other => panic!("not a structured reply: {other:?}"),
        }
    }

    #[test]
    fn test_failure_omits_empty_message() {
        let failure = Failure::new("not found", StatusCode::NOT_FOUND);
        assert_eq!(serde_json::to_value(&failure).unwrap(), json!({"error": "not found"}));

        let failure = Failure::invalid_argument("'id' bad");
        assert_eq!(serde_json::to_value(&failure).unwrap(), json!({"error": "invalid argument", "message": "'id' bad"}));
        assert_eq!(failure.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_plain_error_becomes_server_error() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("disk gone"));
        let reply = result.into_reply();

        assert_eq!(reply.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(encode(&reply), json!({"error": "server error", "message": "disk gone"}));
    }

    #[test]
    fn test_result_map_strips_status_key() {
        let reply = ResultMap::new().insert("id", 7).with_status(StatusCode::CREATED).into_reply();

        assert_eq!(reply.status(), StatusCode::CREATED);
        assert_eq!(encode(&reply), json!({"id": 7}));
    }

    #[test]
    fn test_result_map_invalid_status_falls_back_to_ok() {
        let mut map = ResultMap::ok().insert(ResultMap::STATUS_KEY, "teapot");
        assert_eq!(map.take_status(), StatusCode::OK);
        assert_eq!(map.get("result"), Some(&json!("ok")));
        assert!(map.get(ResultMap::STATUS_KEY).is_none());
    }

    #[test]
    fn test_message_carries_status() {
        let reply = Message::with_status("created", StatusCode::CREATED).into_reply();
        assert_eq!(reply.status(), StatusCode::CREATED);
        assert_eq!(encode(&reply), json!({"message": "created"}));
    }

    #[test]
    fn test_simple_values() {
        assert!(matches!(().into_reply(), Reply::Empty));
        assert!(matches!(None::<String>.into_reply(), Reply::Empty));
        assert!(matches!("hi".into_reply(), Reply::Text(t) if t == "hi"));
        assert!(matches!(vec![1u8, 2].into_reply(), Reply::Bytes(b) if b.as_ref() == [1, 2]));
        assert_eq!(Json(vec![1, 2]).into_reply().status(), StatusCode::OK);
    }
}
