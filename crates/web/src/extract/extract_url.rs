//! Path variable and query string ingestion.

use crate::extract::ParamError;
use crate::{PathParams, RequestContext};
use std::collections::HashSet;

pub(super) fn ingest_path(ctx: &mut RequestContext, path_params: &PathParams) {
    for (key, value) in path_params.iter() {
        ctx.set(key, value);
    }
}

/// Repeated query keys keep their first value, overwriting any same-named path variable.
pub(super) fn ingest_query(ctx: &mut RequestContext) -> Result<(), ParamError> {
    let Some(query) = ctx.uri().query() else {
        return Ok(());
    };

    let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map_err(|e| ParamError::bad_parameter(format!("not query parameter: {e}")))?;

    let mut seen = HashSet::with_capacity(pairs.len());
    for (key, value) in pairs {
        if seen.insert(key.clone()) {
            ctx.set(key, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::context;
    use http::Method;

    #[test]
    fn test_first_query_value_wins() {
        let mut ctx = context(Method::GET, "/search?tag=a&tag=b&q=hello%20world", "");
        ingest_query(&mut ctx).unwrap();

        assert_eq!(ctx.get_str("tag"), Some("a"));
        assert_eq!(ctx.get_str("q"), Some("hello world"));
    }

    #[test]
    fn test_no_query() {
        let mut ctx = context(Method::GET, "/search", "");
        ingest_query(&mut ctx).unwrap();
        assert!(ctx.values().is_empty());
    }

    #[test]
    fn test_path_values() {
        let mut ctx = context(Method::GET, "/messages/7", "");
        let params: PathParams = [("id", "7")].into_iter().collect();
        ingest_path(&mut ctx, &params);
        assert_eq!(ctx.get_i64("id"), Some(7));
    }
}
