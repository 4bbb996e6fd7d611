//! Ordered, duplicable chains of cross-cutting request steps.
//!
//! A [`Middleware`] runs before the handler and may stop the request by failing. Middleware
//! that also shapes responses exposes a [`ResponseProcessor`], which runs after the handler in
//! registration order. Faults raised inside either phase are trapped and turned into a
//! `500 server error` failure.
//!
//! # Example
//! ```
//! use micro_api::middleware::{Middlewares, middleware_fn};
//! use micro_api::Failure;
//!
//! let mut chain = Middlewares::new();
//! chain.append(middleware_fn("auth", |ctx| match ctx.headers().get("x-token") {
//!     Some(_) => Ok(()),
//!     None => Err(Failure::new("unauthorized", http::StatusCode::UNAUTHORIZED)),
//! }));
//!
//! // a sub route starts from a snapshot of its parent's chain
//! let mut child = chain.duplicate();
//! child.remove("auth");
//! assert_eq!(chain.names(), ["auth"]);
//! assert!(child.is_empty());
//! ```

use crate::reply::{Failure, Reply};
use crate::RequestContext;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

pub trait Middleware: Send + Sync + 'static {
    /// Identifies the entry within its chain for [`Middlewares::remove`]
    fn name(&self) -> &str;

    /// The pre-phase step. A failure stops the chain and becomes the request result.
    fn serve(&self, ctx: &mut RequestContext) -> Result<(), Failure>;

    /// The post-phase step, if this middleware shapes responses
    fn response_processor(&self) -> Option<&dyn ResponseProcessor> {
        None
    }
}

pub trait ResponseProcessor: Send + Sync {
    fn process_response(&self, ctx: &mut RequestContext, reply: Reply) -> Result<Reply, Failure>;
}

/// Runs `f`, converting a panic into a `500 server error` carrying the panic message.
pub(crate) fn trap_fault<T>(scope: &str, f: impl FnOnce() -> T) -> Result<T, Failure> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let cause = panic_message(payload.as_ref());
        error!(scope, %cause, "trapped panic");
        Failure::server_error(format!("Panic: {cause}"))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// An ordered chain of middleware.
///
/// Cloning (or [`duplicate`](Middlewares::duplicate)) copies the sequence: later changes to
/// either copy never affect the other. Entries themselves are shared.
#[derive(Clone, Default)]
pub struct Middlewares {
    inner: Vec<Arc<dyn Middleware>>,
}

impl Middlewares {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.inner.push(Arc::new(middleware));
        self
    }

    pub fn append_shared(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.inner.push(middleware);
        self
    }

    /// Removes the first entry named `name`, returning whether one was found.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.inner.iter().position(|m| m.name() == name) {
            Some(index) => {
                self.inner.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.inner.iter().map(|m| m.name()).collect()
    }

    /// Runs every pre-phase step in order, stopping at the first failure.
    pub fn serve_middlewares(&self, ctx: &mut RequestContext) -> Result<(), Failure> {
        for middleware in &self.inner {
            trap_fault(middleware.name(), || middleware.serve(ctx))??;
        }
        Ok(())
    }

    /// Passes `reply` through every post-phase step in order. A failure replaces the reply
    /// and ends the phase.
    pub fn process_response(&self, ctx: &mut RequestContext, mut reply: Reply) -> Reply {
        for middleware in &self.inner {
            let Some(processor) = middleware.response_processor() else {
                continue;
            };
            reply = match trap_fault(middleware.name(), || processor.process_response(ctx, reply)) {
                Ok(Ok(next)) => next,
                Ok(Err(failure)) | Err(failure) => return Reply::Failure(failure),
            };
        }
        reply
    }
}

impl fmt::Debug for Middlewares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// A pre-phase only middleware built from a closure.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

pub fn middleware_fn<F>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(&mut RequestContext) -> Result<(), Failure> + Send + Sync + 'static,
{
    FnMiddleware { name: name.into(), f }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware").field("name", &self.name).finish()
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut RequestContext) -> Result<(), Failure> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn serve(&self, ctx: &mut RequestContext) -> Result<(), Failure> {
        (self.f)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::context;
    use http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(name: &'static str, hits: Arc<AtomicUsize>) -> FnMiddleware<impl Fn(&mut RequestContext) -> Result<(), Failure> + Send + Sync> {
        middleware_fn(name, move |_ctx: &mut RequestContext| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    /// Upper-cases text replies and fails on empty ones.
    struct Shout;

    impl Middleware for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn serve(&self, _ctx: &mut RequestContext) -> Result<(), Failure> {
            Ok(())
        }

        fn response_processor(&self) -> Option<&dyn ResponseProcessor> {
            Some(self)
        }
    }

    impl ResponseProcessor for Shout {
        fn process_response(&self, _ctx: &mut RequestContext, reply: Reply) -> Result<Reply, Failure> {
            match reply {
                Reply::Text(text) => Ok(Reply::Text(text.to_uppercase())),
                Reply::Empty => Err(Failure::new("empty", StatusCode::BAD_GATEWAY)),
                other => Ok(other),
            }
        }
    }

    #[test]
    fn test_short_circuit() {
        let first = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));

        let mut chain = Middlewares::new();
        chain
            .append(counting("first", Arc::clone(&first)))
            .append(middleware_fn("deny", |_ctx: &mut RequestContext| Err(Failure::new("denied", StatusCode::FORBIDDEN))))
            .append(counting("last", Arc::clone(&last)));

        let mut ctx = context(Method::GET, "/", "");
        let failure = chain.serve_middlewares(&mut ctx).unwrap_err();

        assert_eq!(failure, Failure::new("denied", StatusCode::FORBIDDEN));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_is_trapped() {
        let mut chain = Middlewares::new();
        chain.append(middleware_fn("boom", |_ctx: &mut RequestContext| panic!("exploded")));

        let mut ctx = context(Method::GET, "/", "");
        let failure = chain.serve_middlewares(&mut ctx).unwrap_err();

        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failure.error(), "server error");
        assert_eq!(failure.message(), "Panic: exploded");
    }

    #[test]
    fn test_duplicate_is_independent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut parent = Middlewares::new();
        parent.append(counting("a", Arc::clone(&hits)));

        let mut child = parent.duplicate();
        child.append(counting("b", Arc::clone(&hits)));
        parent.append(counting("c", Arc::clone(&hits)));

        assert_eq!(parent.names(), ["a", "c"]);
        assert_eq!(child.names(), ["a", "b"]);

        assert!(child.remove("a"));
        assert!(!child.remove("a"));
        assert_eq!(parent.names(), ["a", "c"]);

        parent.clear();
        assert!(parent.is_empty());
        assert_eq!(child.len(), 1);
    }

    #[test]
    fn test_process_response() {
        let mut chain = Middlewares::new();
        chain.append(counting("pre-only", Arc::new(AtomicUsize::new(0)))).append(Shout);

        let mut ctx = context(Method::GET, "/", "");
        let reply = chain.process_response(&mut ctx, Reply::Text("hi".into()));
        assert!(matches!(reply, Reply::Text(text) if text == "HI"));

        let reply = chain.process_response(&mut ctx, Reply::Empty);
        assert_eq!(reply.status(), StatusCode::BAD_GATEWAY);
    }
}
