use crate::RequestContext;
use crate::bind::{Bind, BindError, FieldRule};
use crate::reply::Failure;

/// The argument list of a handler, built from the context once middleware has run.
///
/// Implemented for `()` (context only handlers) and `(T,)` where `T: Bind`.
pub trait FromContext: Sized {
    fn from_context(ctx: &RequestContext) -> Result<Self, Failure>;

    /// The field rules of the argument record, if any
    fn rules() -> Option<&'static [FieldRule]> {
        None
    }
}

impl FromContext for () {
    fn from_context(_ctx: &RequestContext) -> Result<Self, Failure> {
        Ok(())
    }
}

impl<T: Bind> FromContext for (T,) {
    fn from_context(ctx: &RequestContext) -> Result<Self, Failure> {
        T::bind(ctx.values()).map(|t| (t,)).map_err(BindError::into_failure)
    }

    fn rules() -> Option<&'static [FieldRule]> {
        Some(T::rules())
    }
}
