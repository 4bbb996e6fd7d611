//! Body ingestion, branching on the declared content type.

use crate::extract::multipart::parse_multipart;
use crate::extract::{MultipartError, ParamError, RESERVED_FORM_KEY};
use crate::RequestContext;
use http::{Method, header};
use mime::Mime;
use serde_json::{Map, Value};

#[derive(Debug, PartialEq, Eq)]
enum BodyKind {
    Json,
    Multipart { boundary: String },
    Form,
    Raw,
}

fn body_kind(ctx: &RequestContext) -> Result<BodyKind, ParamError> {
    let is_form_method = matches!(*ctx.method(), Method::POST | Method::PUT | Method::DELETE);

    let Some(content_type) = ctx.headers().get(header::CONTENT_TYPE) else {
        return Ok(if is_form_method { BodyKind::Form } else { BodyKind::Raw });
    };
    let content_type = content_type.to_str().unwrap_or_default();

    let Ok(mime) = content_type.parse::<Mime>() else {
        let lowered = content_type.to_ascii_lowercase();
        return Ok(if lowered.contains("application/json") { BodyKind::Json } else { BodyKind::Raw });
    };

    if mime.type_() == mime::APPLICATION && (mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON)) {
        return Ok(BodyKind::Json);
    }

    if mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA {
        let boundary = mime.get_param(mime::BOUNDARY).ok_or(MultipartError::MissingBoundary)?;
        return Ok(BodyKind::Multipart { boundary: boundary.as_str().to_owned() });
    }

    if is_form_method && mime.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() {
        return Ok(BodyKind::Form);
    }

    Ok(BodyKind::Raw)
}

pub(super) fn ingest_body(ctx: &mut RequestContext) -> Result<(), ParamError> {
    if ctx.raw_body().is_empty() {
        return Ok(());
    }

    match body_kind(ctx)? {
        BodyKind::Json => ingest_json(ctx),
        BodyKind::Multipart { boundary } => ingest_multipart(ctx, &boundary),
        BodyKind::Form => ingest_form(ctx),
        BodyKind::Raw => Ok(()),
    }
}

/// Only the top level is unpacked. Strings are stored unquoted, any other value as its JSON text.
fn ingest_json(ctx: &mut RequestContext) -> Result<(), ParamError> {
    let object = serde_json::from_slice::<Map<String, Value>>(ctx.raw_body())
        .map_err(|e| ParamError::bad_parameter(format!("not json parameter: {e}")))?;

    for (key, value) in object {
        let text = match value {
            Value::String(text) => text,
            other => other.to_string(),
        };
        ctx.set(key, text);
    }
    Ok(())
}

fn ingest_multipart(ctx: &mut RequestContext, boundary: &str) -> Result<(), ParamError> {
    let parts = parse_multipart(ctx.raw_body(), boundary)?;

    for part in parts {
        if !part.is_file() {
            let text = String::from_utf8_lossy(part.data()).into_owned();
            ctx.set(part.form_name(), text);
        }
        ctx.push_part(part);
    }
    Ok(())
}

fn ingest_form(ctx: &mut RequestContext) -> Result<(), ParamError> {
    let pairs = serde_urlencoded::from_bytes::<Vec<(String, String)>>(ctx.raw_body())
        .map_err(|e| ParamError::bad_parameter(format!("not querydict parameter: {e}")))?;

    let mut form: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in pairs {
        match form.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => form.push((key, vec![value])),
        }
    }

    let mut reserved = Map::with_capacity(form.len());
    for (key, values) in form {
        ctx.set(key.clone(), values.join(","));
        reserved.insert(key, Value::from(values));
    }
    ctx.set(RESERVED_FORM_KEY, Value::Object(reserved));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::{context, typed_context};
    use indoc::indoc;
    use serde_json::json;

    #[test]
    fn test_body_kind() {
        let kind = |method, content_type| body_kind(&typed_context(method, "/", content_type, "x")).unwrap();

        assert_eq!(kind(Method::POST, "application/json"), BodyKind::Json);
        assert_eq!(kind(Method::GET, "application/problem+json"), BodyKind::Json);
        assert_eq!(kind(Method::POST, "multipart/form-data; boundary=abc"), BodyKind::Multipart { boundary: "abc".into() });
        assert_eq!(kind(Method::PUT, "application/x-www-form-urlencoded; charset=utf-8"), BodyKind::Form);
        assert_eq!(kind(Method::GET, "application/x-www-form-urlencoded"), BodyKind::Raw);
        assert_eq!(kind(Method::POST, "text/plain"), BodyKind::Raw);
        assert_eq!(body_kind(&context(Method::DELETE, "/", "a=1")).unwrap(), BodyKind::Form);
        assert_eq!(body_kind(&context(Method::GET, "/", "a=1")).unwrap(), BodyKind::Raw);
    }

    #[test]
    fn test_multipart_without_boundary() {
        let ctx = typed_context(Method::POST, "/", "multipart/form-data", "x");
        assert!(matches!(body_kind(&ctx), Err(ParamError::Multipart(MultipartError::MissingBoundary))));
    }

    #[test]
    fn test_form_joins_repeated_keys() {
        let mut ctx = typed_context(Method::POST, "/", "application/x-www-form-urlencoded", "tag=a&tag=b&name=tom");
        ingest_body(&mut ctx).unwrap();

        assert_eq!(ctx.get_str("tag"), Some("a,b"));
        assert_eq!(ctx.get_str("name"), Some("tom"));
        assert_eq!(ctx.get(RESERVED_FORM_KEY), Some(&json!({"tag": ["a", "b"], "name": ["tom"]})));
    }

    #[test]
    fn test_json_must_be_an_object() {
        let mut ctx = typed_context(Method::POST, "/", "application/json", "[1, 2]");
        assert!(matches!(ingest_body(&mut ctx), Err(ParamError::BadParameter { .. })));
    }

    #[test]
    fn test_multipart_text_fields_become_values() {
        let body = indoc! {"
            --XyZ
            Content-Disposition: form-data; name=\"field1\"

            one
            --XyZ
            Content-Disposition: form-data; name=\"userfile\"; filename=\"a.txt\"
            Content-Type: text/plain

            file body
            --XyZ--
        "};
        let mut ctx = typed_context(Method::POST, "/upload", "multipart/form-data; boundary=XyZ", body);
        ingest_body(&mut ctx).unwrap();

        assert_eq!(ctx.get_str("field1"), Some("one"));
        assert_eq!(ctx.get("userfile"), None);
        assert_eq!(ctx.multipart().len(), 2);
        assert_eq!(ctx.multipart()[0].form_name(), "field1");
        assert_eq!(ctx.multipart()[1].file_name(), Some("a.txt"));
        assert_eq!(ctx.multipart()[1].data().as_ref(), b"file body");
    }
}
