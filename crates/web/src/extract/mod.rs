//! Parameter ingestion: fills a [`RequestContext`]'s value mapping from the request.
//!
//! Sources are merged in a fixed order, each overwriting the previous one:
//! 1. path variables captured by the route pattern
//! 2. the query string, where the first occurrence of a repeated key wins
//! 3. the body, decoded according to its `Content-Type`
//!
//! | content type                          | decoding                                           |
//! |---------------------------------------|----------------------------------------------------|
//! | `application/json`                    | top level object, nested values kept as JSON text  |
//! | `multipart/form-data`                 | parts kept in order, text fields also become values |
//! | url-encoded or none (POST/PUT/DELETE) | repeated keys joined with `,`, full form kept under [`RESERVED_FORM_KEY`] |
//! | anything else                         | left unparsed                                      |

mod extract_body;
mod extract_url;
mod from_request;
mod multipart;

pub use from_request::FromContext;
pub use multipart::MultipartError;
pub use multipart::parse_multipart;

use crate::reply::Failure;
use crate::{PathParams, RequestContext};
use thiserror::Error;

/// The value key under which the complete multi-valued url-encoded form is kept.
pub const RESERVED_FORM_KEY: &str = "_POST_";

/// 20 MiB
pub const DEFAULT_MAX_BODY_SIZE: usize = 20 << 20;

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("{reason}")]
    BadParameter { reason: String },

    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

impl ParamError {
    pub fn bad_parameter(reason: impl Into<String>) -> Self {
        ParamError::BadParameter { reason: reason.into() }
    }

    pub fn into_failure(self) -> Failure {
        match self {
            ParamError::PayloadTooLarge { .. } => Failure::payload_too_large(self.to_string()),
            ParamError::BadParameter { reason } => Failure::bad_request(reason),
            ParamError::Multipart(e) => Failure::bad_request(e.to_string()),
        }
    }
}

/// Merges path variables, query string and body into the context's values.
///
/// The body must already be fully read and capped; this performs no IO.
pub fn parse_params(ctx: &mut RequestContext, path_params: &PathParams) -> Result<(), ParamError> {
    extract_url::ingest_path(ctx, path_params);
    extract_url::ingest_query(ctx)?;
    extract_body::ingest_body(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::{context, typed_context};
    use http::Method;
    use serde_json::json;

    fn post(uri: &str, content_type: &str, body: &'static str) -> RequestContext {
        typed_context(Method::POST, uri, content_type, body)
    }

    #[test]
    fn test_body_wins_over_query_and_path() {
        let mut ctx = post("/users/1?id=2&name=q", "application/x-www-form-urlencoded", "id=3");
        let path_params: PathParams = [("id", "1"), ("kind", "user")].into_iter().collect();

        parse_params(&mut ctx, &path_params).unwrap();

        assert_eq!(ctx.get_str("id"), Some("3"));
        assert_eq!(ctx.get_str("name"), Some("q"));
        assert_eq!(ctx.get_str("kind"), Some("user"));
    }

    #[test]
    fn test_query_wins_over_path() {
        let mut ctx = context(Method::GET, "/users/1?id=2", "");
        let path_params: PathParams = [("id", "1")].into_iter().collect();

        parse_params(&mut ctx, &path_params).unwrap();

        assert_eq!(ctx.get_str("id"), Some("2"));
    }

    #[test]
    fn test_json_body() {
        let mut ctx = post("/messages", "application/json; charset=utf-8", r#"{"message":"hi","remark":"x","n":12,"tags":["a","b"]}"#);

        parse_params(&mut ctx, &PathParams::empty()).unwrap();

        assert_eq!(ctx.get("message"), Some(&json!("hi")));
        assert_eq!(ctx.get("remark"), Some(&json!("x")));
        assert_eq!(ctx.get("n"), Some(&json!("12")));
        assert_eq!(ctx.get("tags"), Some(&json!(r#"["a","b"]"#)));
    }

    #[test]
    fn test_malformed_json_is_bad_parameter() {
        let mut ctx = post("/messages", "application/json", "{not json");

        let err = parse_params(&mut ctx, &PathParams::empty()).unwrap_err();
        assert!(err.to_string().starts_with("not json parameter: "));

        let failure = err.into_failure();
        assert_eq!(failure.status(), http::StatusCode::BAD_REQUEST);
        assert_eq!(failure.error(), "bad parameter");
    }

    #[test]
    fn test_unknown_content_type_is_left_unparsed() {
        let mut ctx = post("/upload?a=1", "application/octet-stream", "b=2");

        parse_params(&mut ctx, &PathParams::empty()).unwrap();

        assert_eq!(ctx.get_str("a"), Some("1"));
        assert_eq!(ctx.get("b"), None);
        assert_eq!(ctx.raw_body().as_ref(), b"b=2");
    }

    #[test]
    fn test_payload_too_large_failure() {
        let failure = ParamError::PayloadTooLarge { limit: DEFAULT_MAX_BODY_SIZE }.into_failure();
        assert_eq!(failure.status(), http::StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(failure.message(), "request body exceeds 20971520 bytes");
    }
}
