use crate::bind::FieldRule;
use crate::extract::FromContext;
use crate::fn_trait::FnTrait;
use crate::reply::{IntoReply, Reply};
use crate::RequestContext;
use std::fmt;
use std::marker::PhantomData;

/// A type erased handler, stored in the route table.
pub trait RequestHandler: Send + Sync {
    /// Binds the argument record, if any, then calls the handler
    fn invoke(&self, ctx: &mut RequestContext) -> Reply;

    /// The rules of the argument record, `None` for context only handlers
    fn arg_rules(&self) -> Option<&'static [FieldRule]>;
}

/// a `FnTrait` holder which represents any handler Fn
pub struct FnHandler<F, Args> {
    f: F,
    _phantom: PhantomData<fn(Args)>,
}

impl<F, Args> FnHandler<F, Args>
where
    F: FnTrait<Args>,
{
    fn new(f: F) -> Self {
        Self { f, _phantom: PhantomData }
    }
}

pub fn handler_fn<F, Args>(f: F) -> FnHandler<F, Args>
where
    F: FnTrait<Args>,
{
    FnHandler::new(f)
}

impl<F, Args> fmt::Debug for FnHandler<F, Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("fn", &std::any::type_name::<F>()).finish()
    }
}

impl<F, Args> RequestHandler for FnHandler<F, Args>
where
    F: FnTrait<Args> + Send + Sync,
    F::Output: IntoReply,
    Args: FromContext,
{
    fn invoke(&self, ctx: &mut RequestContext) -> Reply {
        match Args::from_context(ctx) {
            Ok(args) => self.f.call(ctx, args).into_reply(),
            Err(failure) => Reply::Failure(failure),
        }
    }

    fn arg_rules(&self) -> Option<&'static [FieldRule]> {
        Args::rules()
    }
}
