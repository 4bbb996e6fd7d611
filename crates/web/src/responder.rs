//! Translation of a [`Reply`] into an HTTP response.
//!
//! The [`Responder`] trait is the last step of the pipeline. [`DefaultResponder`] writes:
//! - `Empty` as `200` with no body
//! - `Bytes` and `Text` as `200` with the body written verbatim
//! - `Failure` and `Json` as their status with a JSON body and
//!   `Content-Type: application/json;charset=utf-8`
//!
//! A record that fails to encode is answered with `500 server error` carrying the encoding
//! error's text.

use crate::reply::{Failure, Reply};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use tracing::error;

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Writes the final reply of a request.
///
/// `headers` are the response headers collected on the context; they are applied first, so
/// a responder may override them.
pub trait Responder: Send + Sync {
    fn respond(&self, headers: HeaderMap, reply: &Reply) -> Response<Bytes>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResponder;

fn build(status: StatusCode, mut headers: HeaderMap, json: bool, body: Bytes) -> Response<Bytes> {
    if json {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    }
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

impl Responder for DefaultResponder {
    fn respond(&self, headers: HeaderMap, reply: &Reply) -> Response<Bytes> {
        let encoded = match reply {
            Reply::Empty => return build(StatusCode::OK, headers, false, Bytes::new()),
            Reply::Bytes(bytes) => return build(StatusCode::OK, headers, false, bytes.clone()),
            Reply::Text(text) => return build(StatusCode::OK, headers, false, Bytes::from(text.clone())),
            Reply::Failure(failure) => serde_json::to_vec(failure).map(|body| (failure.status(), body)),
            Reply::Json(json) => json.encode().map(|body| (json.status(), body)),
        };

        match encoded {
            Ok((status, body)) => build(status, headers, true, Bytes::from(body)),
            Err(e) => {
                error!(cause = %e, "encode response error");
                let failure = Failure::server_error(e.to_string());
                let body = serde_json::to_vec(&failure).unwrap_or_default();
                build(failure.status(), headers, true, Bytes::from(body))
            }
        }
    }
}
