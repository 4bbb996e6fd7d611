//! In-memory `multipart/form-data` decoding.
//!
//! The whole body is already buffered, so every part's data is a zero-copy slice of it.
//! Both `\r\n` and bare `\n` line endings are accepted.

use crate::request::Part;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, header};
use thiserror::Error;

const MAX_PART_HEADERS: usize = 32;

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("multipart boundary missing")]
    MissingBoundary,

    #[error("multipart delimiter not found")]
    MissingDelimiter,

    #[error("malformed multipart part headers: {0}")]
    MalformedHeaders(String),

    #[error("multipart body truncated")]
    Truncated,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Skips the line ending after a delimiter, tolerating trailing whitespace.
fn skip_line_ending(body: &[u8], mut pos: usize) -> Result<usize, MultipartError> {
    while matches!(body.get(pos), Some(b' ' | b'\t')) {
        pos += 1;
    }
    match (body.get(pos), body.get(pos + 1)) {
        (Some(b'\r'), Some(b'\n')) => Ok(pos + 2),
        (Some(b'\n'), _) => Ok(pos + 1),
        (None, _) | (Some(b'\r'), None) => Err(MultipartError::Truncated),
        _ => Err(MultipartError::MalformedHeaders("expected line ending after delimiter".into())),
    }
}

/// Splits `body` into its parts, in order.
pub fn parse_multipart(body: &Bytes, boundary: &str) -> Result<Vec<Part>, MultipartError> {
    if boundary.is_empty() {
        return Err(MultipartError::MissingBoundary);
    }

    let delimiter = format!("--{boundary}").into_bytes();
    let next_delimiter = [b"\n".as_slice(), &delimiter].concat();

    let start = find(body, &delimiter).ok_or(MultipartError::MissingDelimiter)?;
    let mut pos = start + delimiter.len();
    let mut parts = Vec::new();

    loop {
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        pos = skip_line_ending(body, pos)?;

        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
        let (consumed, headers) = match httparse::parse_headers(&body[pos..], &mut headers) {
            Ok(httparse::Status::Complete(parsed)) => parsed,
            Ok(httparse::Status::Partial) => return Err(MultipartError::Truncated),
            Err(e) => return Err(MultipartError::MalformedHeaders(e.to_string())),
        };
        let header_map = to_header_map(headers)?;
        let content_start = pos + consumed;

        let found = find(&body[content_start..], &next_delimiter).ok_or(MultipartError::Truncated)? + content_start;
        let content_end = if found > content_start && body[found - 1] == b'\r' { found - 1 } else { found };

        let (form_name, file_name) = disposition(&header_map);
        parts.push(Part::new(form_name, file_name, header_map, body.slice(content_start..content_end)));

        pos = found + next_delimiter.len();
    }
}

fn to_header_map(headers: &[httparse::Header<'_>]) -> Result<HeaderMap, MultipartError> {
    let mut header_map = HeaderMap::with_capacity(headers.len());
    for h in headers {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|e| MultipartError::MalformedHeaders(e.to_string()))?;
        let value = HeaderValue::from_bytes(h.value).map_err(|e| MultipartError::MalformedHeaders(e.to_string()))?;
        header_map.append(name, value);
    }
    Ok(header_map)
}

/// The `name` and `filename` parameters of a part's `Content-Disposition`.
fn disposition(headers: &HeaderMap) -> (String, Option<String>) {
    let Some(value) = headers.get(header::CONTENT_DISPOSITION).and_then(|v| v.to_str().ok()) else {
        return (String::new(), None);
    };

    let mut form_name = String::new();
    let mut file_name = None;
    for param in value.split(';').skip(1) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        let val = val.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => val.clone_into(&mut form_name),
            "filename" if !val.is_empty() => {
                file_name = Some(val.rsplit(['/', '\\']).next().unwrap_or(val).to_owned());
            }
            _ => {}
        }
    }
    (form_name, file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &'static str, boundary: &str) -> Result<Vec<Part>, MultipartError> {
        parse_multipart(&Bytes::from_static(body.as_bytes()), boundary)
    }

    #[test]
    fn test_crlf_parts_in_order() {
        let body = "preamble\r\n--b1\r\nContent-Disposition: form-data; name=\"field1\"\r\n\r\none\r\n--b1\r\n\
                    Content-Disposition: form-data; name=\"userfile\"; filename=\"dir/photo.png\"\r\n\
                    Content-Type: image/png\r\n\r\n\x01\x02\r\n--b1--\r\n";
        let parts = parse(body, "b1").unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].form_name(), "field1");
        assert_eq!(parts[0].file_name(), None);
        assert_eq!(parts[0].data().as_ref(), b"one");
        assert_eq!(parts[1].form_name(), "userfile");
        assert_eq!(parts[1].file_name(), Some("photo.png"));
        assert_eq!(parts[1].headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(parts[1].data().as_ref(), b"\x01\x02");
    }

    #[test]
    fn test_empty_part_data() {
        let parts = parse("--b\r\nContent-Disposition: form-data; name=\"e\"\r\n\r\n\r\n--b--", "b").unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].data().is_empty());
    }

    #[test]
    fn test_data_may_contain_line_breaks() {
        let parts = parse("--b\nContent-Disposition: form-data; name=\"t\"\n\nline1\nline2\n--b--\n", "b").unwrap();
        assert_eq!(parts[0].data().as_ref(), b"line1\nline2");
    }

    #[test]
    fn test_truncated_part() {
        let err = parse("--b\r\nContent-Disposition: form-data; name=\"t\"\r\n\r\nno closing delimiter", "b").unwrap_err();
        assert!(matches!(err, MultipartError::Truncated));

        let err = parse("--b\r\nContent-Disposition: form-data; name=\"t\"", "b").unwrap_err();
        assert!(matches!(err, MultipartError::Truncated));
    }

    #[test]
    fn test_wrong_boundary() {
        let err = parse("--other\r\n\r\nx\r\n--other--", "b").unwrap_err();
        assert!(matches!(err, MultipartError::MissingDelimiter));
        assert!(matches!(parse("x", ""), Err(MultipartError::MissingBoundary)));
    }
}
