//! Route registration and lookup.
//!
//! Routes are registered through a [`RouterBuilder`] (the root scope) or a [`SubRouter`]
//! borrowed from it. Every scope owns a middleware chain; registering a route or opening a
//! sub scope takes a snapshot of it, so later changes to the parent never leak into routes
//! that already exist.
//!
//! Patterns use `{name}` for path variables. A pattern ending in `/*` matches every path
//! under that prefix.
//!
//! ```
//! use http::Method;
//! use micro_api::router::{Lookup, RouterBuilder};
//! use micro_api::RequestContext;
//!
//! fn hello(_ctx: &mut RequestContext) -> &'static str {
//!     "hello"
//! }
//!
//! let mut builder = RouterBuilder::new();
//! let mut api = builder.sub_router("/api");
//! api.get("/hello", hello).unwrap();
//! api.get("/files/*", hello).unwrap();
//!
//! let router = builder.build();
//! assert!(matches!(router.at(&Method::GET, "/api/hello"), Lookup::Found { .. }));
//! assert!(matches!(router.at(&Method::GET, "/api/files/a/b.txt"), Lookup::Found { .. }));
//! assert!(matches!(router.at(&Method::POST, "/api/hello"), Lookup::MethodNotAllowed));
//! assert!(matches!(router.at(&Method::GET, "/missing"), Lookup::NotFound));
//! ```

use crate::bind::FieldRule;
use crate::extract::FromContext;
use crate::fn_trait::FnTrait;
use crate::handler::{RequestHandler, handler_fn};
use crate::middleware::{Middleware, Middlewares};
use crate::reply::IntoReply;
use crate::PathParams;
use http::Method;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// The catch-all variable backing prefix routes, never exposed as a path parameter
const REST_PARAM: &str = "__rest";

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("url conflict: {key}")]
    Conflict { key: String },

    #[error("invalid route pattern `{path}`: {reason}")]
    InvalidPattern { path: String, reason: String },

    #[error("resource at `{path}` answers no method")]
    EmptyResource { path: String },
}

/// Several handlers served under one path, one per method.
///
/// Every hook defaults to `None`, which leaves that method unregistered.
pub trait Resource {
    fn get(&self) -> Option<Box<dyn RequestHandler>> {
        None
    }

    fn post(&self) -> Option<Box<dyn RequestHandler>> {
        None
    }

    fn delete(&self) -> Option<Box<dyn RequestHandler>> {
        None
    }

    fn put(&self) -> Option<Box<dyn RequestHandler>> {
        None
    }

    fn options(&self) -> Option<Box<dyn RequestHandler>> {
        None
    }
}

/// One registered route.
pub(crate) struct Route {
    pub(crate) method: Method,
    pub(crate) pattern: String,
    pub(crate) label: String,
    pub(crate) handler: Box<dyn RequestHandler>,
    pub(crate) middlewares: Middlewares,
}

impl Route {
    pub(crate) fn info(&self) -> RouteInfo {
        RouteInfo {
            method: self.method.clone(),
            pattern: self.pattern.clone(),
            label: self.label.clone(),
            middlewares: self.middlewares.names().into_iter().map(str::to_owned).collect(),
            arg_rules: self.handler.arg_rules(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("label", &self.label).field("middlewares", &self.middlewares).finish_non_exhaustive()
    }
}

/// A read only description of a registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    /// the pattern as registered, including a trailing `*` for prefix routes
    pub pattern: String,
    /// `METHOD lowercased-path`, the key used for conflict detection and statistics
    pub label: String,
    pub middlewares: Vec<String>,
    /// the argument record's field rules, `None` for context only handlers
    pub arg_rules: Option<&'static [FieldRule]>,
}

/// The routes of every scope, in registration order.
struct Registry {
    routes: Vec<Route>,
    labels: HashSet<String>,
    matcher: matchit::Router<usize>,
    /// per matcher path, the routes registered for each method
    slots: Vec<Vec<(Method, usize)>>,
    slot_of: HashMap<String, usize>,
}

impl Registry {
    fn insert(&mut self, method: &Method, path: String, handler: Box<dyn RequestHandler>, middlewares: Middlewares) -> Result<&mut Middlewares, RouteError> {
        let (method, matcher_paths, label) = self.route_key(method, &path)?;

        let slot = self.slot(&path, &matcher_paths)?;
        let index = self.routes.len();
        self.slots[slot].push((method.clone(), index));
        self.labels.insert(label.clone());
        self.routes.push(Route { method, pattern: path, label, handler, middlewares });

        Ok(&mut self.routes[index].middlewares)
    }

    /// The normalized method, the matcher paths and the label of a new route, failing when
    /// the label is taken.
    fn route_key(&self, method: &Method, path: &str) -> Result<(Method, Vec<String>, String), RouteError> {
        let method = normalize_method(method);
        let (matcher_paths, prefix) = match path.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') => (vec![format!("{prefix}{{*{REST_PARAM}}}"), prefix.to_owned()], prefix),
            Some(_) => return Err(RouteError::InvalidPattern { path: path.to_owned(), reason: "a wildcard must follow `/`".into() }),
            None => (vec![path.to_owned()], path),
        };

        let label = format!("{method} {}", prefix.to_lowercase());
        if self.labels.contains(&label) {
            return Err(RouteError::Conflict { key: label });
        }
        Ok((method, matcher_paths, label))
    }

    /// Registers every method of `resource` on `path`. All keys are checked first, so a
    /// conflict registers nothing; the methods share one matcher path, so only the first
    /// insert can fail in the matcher.
    fn insert_resource<R: Resource + ?Sized>(&mut self, path: String, resource: &R, middlewares: &Middlewares) -> Result<Vec<Method>, RouteError> {
        let handlers: Vec<(Method, Box<dyn RequestHandler>)> = [
            (Method::GET, resource.get()),
            (Method::POST, resource.post()),
            (Method::DELETE, resource.delete()),
            (Method::PUT, resource.put()),
            (Method::OPTIONS, resource.options()),
        ]
        .into_iter()
        .filter_map(|(method, handler)| handler.map(|handler| (method, handler)))
        .collect();

        if handlers.is_empty() {
            return Err(RouteError::EmptyResource { path });
        }
        for (method, _) in &handlers {
            self.route_key(method, &path)?;
        }

        let mut methods = Vec::with_capacity(handlers.len());
        for (method, handler) in handlers {
            self.insert(&method, path.clone(), handler, middlewares.clone())?;
            methods.push(method);
        }
        Ok(methods)
    }

    /// The slot shared by every method of `matcher_paths`, inserting them on first use.
    fn slot(&mut self, path: &str, matcher_paths: &[String]) -> Result<usize, RouteError> {
        if let Some(&slot) = self.slot_of.get(&matcher_paths[0]) {
            return Ok(slot);
        }

        let slot = self.slots.len();
        let mut inserted: Vec<&String> = Vec::with_capacity(matcher_paths.len());
        for matcher_path in matcher_paths {
            if self.slot_of.contains_key(matcher_path) {
                continue;
            }
            if let Err(e) = self.matcher.insert(matcher_path.as_str(), slot) {
                for rollback in inserted {
                    self.matcher.remove(rollback.as_str());
                    self.slot_of.remove(rollback);
                }
                return Err(RouteError::InvalidPattern { path: path.to_owned(), reason: e.to_string() });
            }
            self.slot_of.insert(matcher_path.clone(), slot);
            inserted.push(matcher_path);
        }
        self.slots.push(Vec::new());
        Ok(slot)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self { routes: Vec::new(), labels: HashSet::new(), matcher: matchit::Router::new(), slots: Vec::new(), slot_of: HashMap::new() }
    }
}

fn normalize_method(method: &Method) -> Method {
    let upper = method.as_str().to_ascii_uppercase();
    if upper == method.as_str() {
        return method.clone();
    }
    Method::from_bytes(upper.as_bytes()).unwrap_or_else(|_| method.clone())
}

/// Joins `path` onto `base` and cleans the result: duplicate slashes and `.` segments are
/// dropped, `..` removes its parent and a trailing slash is removed.
fn join_path(base: &str, path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Generates the registration methods shared by [`RouterBuilder`] and [`SubRouter`].
///
/// The implementing type provides `fn scope(&mut self) -> (&mut Registry, &str, &mut Middlewares)`.
macro_rules! impl_scope {
    ($($ty:tt)+) => {
        impl $($ty)+ {
            /// Appends a middleware to this scope's chain. Only routes and sub scopes created
            /// afterwards inherit it.
            pub fn append<M: Middleware>(&mut self, middleware: M) -> &mut Middlewares {
                let (_, _, middlewares) = self.scope();
                middlewares.append(middleware)
            }

            /// This scope's chain, which later registrations copy
            pub fn middlewares_mut(&mut self) -> &mut Middlewares {
                self.scope().2
            }

            /// Empties this scope's chain
            pub fn clear(&mut self) {
                self.scope().2.clear();
            }

            /// Registers `f` for `method` on `path`, returning the new route's own chain.
            pub fn handle<F, Args>(&mut self, method: Method, path: &str, f: F) -> Result<&mut Middlewares, RouteError>
            where
                F: FnTrait<Args> + Send + Sync + 'static,
                F::Output: IntoReply,
                Args: FromContext + 'static,
            {
                self.handle_with(method, path, handler_fn(f))
            }

            /// Registers an already built handler
            pub fn handle_with<H>(&mut self, method: Method, path: &str, handler: H) -> Result<&mut Middlewares, RouteError>
            where
                H: RequestHandler + 'static,
            {
                let (registry, base, middlewares) = self.scope();
                registry.insert(&method, join_path(base, path), Box::new(handler), middlewares.duplicate())
            }

            pub fn get<F, Args>(&mut self, path: &str, f: F) -> Result<&mut Middlewares, RouteError>
            where
                F: FnTrait<Args> + Send + Sync + 'static,
                F::Output: IntoReply,
                Args: FromContext + 'static,
            {
                self.handle(Method::GET, path, f)
            }

            pub fn post<F, Args>(&mut self, path: &str, f: F) -> Result<&mut Middlewares, RouteError>
            where
                F: FnTrait<Args> + Send + Sync + 'static,
                F::Output: IntoReply,
                Args: FromContext + 'static,
            {
                self.handle(Method::POST, path, f)
            }

            pub fn put<F, Args>(&mut self, path: &str, f: F) -> Result<&mut Middlewares, RouteError>
            where
                F: FnTrait<Args> + Send + Sync + 'static,
                F::Output: IntoReply,
                Args: FromContext + 'static,
            {
                self.handle(Method::PUT, path, f)
            }

            pub fn delete<F, Args>(&mut self, path: &str, f: F) -> Result<&mut Middlewares, RouteError>
            where
                F: FnTrait<Args> + Send + Sync + 'static,
                F::Output: IntoReply,
                Args: FromContext + 'static,
            {
                self.handle(Method::DELETE, path, f)
            }

            /// Registers every method `resource` answers on `path`, returning those methods.
            /// The routes start from one snapshot of this scope's chain.
            pub fn resource<R: Resource + ?Sized>(&mut self, path: &str, resource: &R) -> Result<Vec<Method>, RouteError> {
                let (registry, base, middlewares) = self.scope();
                registry.insert_resource(join_path(base, path), resource, &middlewares.duplicate())
            }

            /// Opens a child scope under `prefix`, starting from a snapshot of this scope's chain.
            pub fn sub_router(&mut self, prefix: &str) -> SubRouter<'_> {
                let (registry, base, middlewares) = self.scope();
                SubRouter { base: join_path(base, prefix), middlewares: middlewares.duplicate(), registry }
            }
        }
    };
}

/// The root registration scope.
#[derive(Default)]
pub struct RouterBuilder {
    registry: Registry,
    middlewares: Middlewares,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope(&mut self) -> (&mut Registry, &str, &mut Middlewares) {
        (&mut self.registry, "/", &mut self.middlewares)
    }

    /// Freezes the registered routes into a [`Router`].
    pub fn build(self) -> Router {
        let Registry { routes, matcher, slots, .. } = self.registry;
        Router { routes, matcher, slots }
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder").field("routes", &self.registry.routes).field("middlewares", &self.middlewares).finish()
    }
}

/// A child scope with its own base path and chain.
pub struct SubRouter<'r> {
    registry: &'r mut Registry,
    base: String,
    middlewares: Middlewares,
}

impl SubRouter<'_> {
    fn scope(&mut self) -> (&mut Registry, &str, &mut Middlewares) {
        (&mut *self.registry, &self.base, &mut self.middlewares)
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

impl fmt::Debug for SubRouter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubRouter").field("base", &self.base).field("middlewares", &self.middlewares).finish()
    }
}

impl_scope!(RouterBuilder);
impl_scope!(SubRouter<'_>);

/// The result of matching a request against the route table.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup {
    /// `index` is the route's registration order
    Found { index: usize, params: PathParams },
    MethodNotAllowed,
    NotFound,
}

/// The frozen route table.
pub struct Router {
    routes: Vec<Route>,
    matcher: matchit::Router<usize>,
    slots: Vec<Vec<(Method, usize)>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Matches `method` and `path`. The method is compared case-insensitively.
    pub fn at(&self, method: &Method, path: &str) -> Lookup {
        let matched = match self.matcher.at(path) {
            Ok(matched) => matched,
            Err(e) => {
                debug!(path, cause = %e, "no route matched");
                return Lookup::NotFound;
            }
        };

        let method = normalize_method(method);
        let Some(&(_, index)) = self.slots[*matched.value].iter().find(|(m, _)| *m == method) else {
            return Lookup::MethodNotAllowed;
        };

        let params = matched.params.iter().filter(|(key, _)| *key != REST_PARAM).collect();
        Lookup::Found { index, params }
    }

    pub(crate) fn route(&self, index: usize) -> Option<&Route> {
        self.routes.get(index)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Descriptions of every route in registration order
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.routes.iter().map(Route::info).collect()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.routes.iter().map(|route| &route.label)).finish()
    }
}
