//! The request pipeline.
//!
//! [`Web`] owns everything a request needs once registration is over: the frozen route
//! table, the statistics, the responder, the optional logger and the id generator. Each
//! request runs synchronously through these steps:
//!
//! 1. the route is matched (`404` and `405` are answered here without touching route stats)
//! 2. a [`RequestContext`] is created and [`parse_params`] fills its values
//! 3. the route's middleware pre-phase runs
//! 4. the handler binds its argument record and is called
//! 5. the post-phase shapes the reply
//! 6. the [`Responder`] writes the response
//! 7. the route's [`RouteStat`] records the outcome exactly once and the logger is called
//!
//! A panic in steps 3 to 6 becomes a `500 server error` reply; the worker keeps serving.

use crate::config::Config;
use crate::extract::{ParamError, parse_params};
use crate::logger::{LogRecord, RequestLogger};
use crate::middleware::trap_fault;
use crate::reply::{Failure, IntoReply, Reply};
use crate::request::RequestIds;
use crate::responder::{DefaultResponder, Responder};
use crate::router::{Lookup, Route, RouteInfo, Router, RouterBuilder};
use crate::stat::{RouteStat, Statistics};
use crate::{PathParams, RequestContext};
use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Request, Response};
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

pub struct Web {
    router: Router,
    statistics: Arc<Statistics>,
    responder: Box<dyn Responder>,
    logger: Option<Box<dyn RequestLogger>>,
    ids: RequestIds,
    config: Config,
}

impl Web {
    pub fn builder() -> WebBuilder {
        WebBuilder::new()
    }

    /// Serves a request whose body has already been read.
    ///
    /// Bodies longer than [`Config::max_body_size`] are answered with `413` before any
    /// parameter is ingested.
    pub fn serve(&self, request: Request<Bytes>) -> Response<Bytes> {
        let (head, body) = request.into_parts();
        let limit = self.config.max_body_size();
        let body = if body.len() > limit { Err(ParamError::PayloadTooLarge { limit }.into_failure()) } else { Ok(body) };
        self.serve_parts(head, body)
    }

    /// Serves a request head with the outcome of reading its body.
    ///
    /// A body failure (too large, timed out) skips ingestion, middleware and handler but is
    /// still responded, counted and logged like any other reply.
    pub fn serve_parts(&self, head: Parts, body: Result<Bytes, Failure>) -> Response<Bytes> {
        let _in_flight = self.statistics.on_serve();
        self.dispatch(head, body)
    }

    fn dispatch(&self, head: Parts, body: Result<Bytes, Failure>) -> Response<Bytes> {
        let start = SystemTime::now();
        let timer = Instant::now();

        let (route, stat, params) = match self.router.at(&head.method, head.uri.path()) {
            Lookup::Found { index, params } => match (self.router.route(index), self.statistics.routes().get(index)) {
                (Some(route), Some(stat)) => (route, stat, params),
                _ => return self.unrouted(Failure::not_found()),
            },
            Lookup::MethodNotAllowed => return self.unrouted(Failure::method_not_allowed()),
            Lookup::NotFound => return self.unrouted(Failure::not_found()),
        };

        let (body, body_failure) = match body {
            Ok(body) => (body, None),
            Err(failure) => (Bytes::new(), Some(failure)),
        };
        let mut ctx = RequestContext::new(self.ids.next_id(), head, body);

        let reply = match body_failure {
            Some(failure) => Reply::Failure(failure),
            None => run_route(route, &mut ctx, &params),
        };

        let response = self.respond(ctx.take_response_headers(), &reply);
        let elapsed = timer.elapsed();
        stat.record(response.status(), elapsed);

        if let Some(logger) = &self.logger {
            let record = LogRecord {
                request_id: ctx.request_id(),
                method: ctx.method().clone(),
                path: ctx.path().to_owned(),
                start,
                elapsed,
                status: response.status(),
            };
            // a failing logger must not change the outcome
            let _ = trap_fault("logger", || logger.on_log(&record, &reply));
        }

        response
    }

    fn unrouted(&self, failure: Failure) -> Response<Bytes> {
        self.respond(HeaderMap::new(), &failure.into_reply())
    }

    /// Runs the responder; a panic while encoding falls back to a default `500` reply.
    fn respond(&self, headers: HeaderMap, reply: &Reply) -> Response<Bytes> {
        let fallback = headers.clone();
        match trap_fault("responder", || self.responder.respond(headers, reply)) {
            Ok(response) => response,
            Err(failure) => DefaultResponder.respond(fallback, &Reply::Failure(failure)),
        }
    }

    /// Descriptions of every registered route in registration order
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.router.routes()
    }

    /// The counters, shareable with handlers that report them
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl fmt::Debug for Web {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Web").field("router", &self.router).field("config", &self.config).finish_non_exhaustive()
    }
}

/// Ingestion, pre-phase, handler and post-phase of one matched route.
fn run_route(route: &Route, ctx: &mut RequestContext, params: &PathParams) -> Reply {
    if let Err(e) = parse_params(ctx, params) {
        return Reply::Failure(e.into_failure());
    }

    if let Err(failure) = route.middlewares.serve_middlewares(ctx) {
        return Reply::Failure(failure);
    }

    let reply = match trap_fault(&route.label, || route.handler.invoke(ctx)) {
        Ok(reply) => reply,
        Err(failure) => return Reply::Failure(failure),
    };

    route.middlewares.process_response(ctx, reply)
}

pub struct WebBuilder {
    router: RouterBuilder,
    responder: Box<dyn Responder>,
    logger: Option<Box<dyn RequestLogger>>,
    config: Config,
}

impl WebBuilder {
    fn new() -> Self {
        Self { router: RouterBuilder::new(), responder: Box::new(DefaultResponder), logger: None, config: Config::default() }
    }

    pub fn router(mut self, router: RouterBuilder) -> Self {
        self.router = router;
        self
    }

    /// Replaces the [`DefaultResponder`]
    pub fn responder(mut self, responder: impl Responder + 'static) -> Self {
        self.responder = Box::new(responder);
        self
    }

    pub fn logger(mut self, logger: impl RequestLogger + 'static) -> Self {
        self.logger = Some(Box::new(logger));
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.config = self.config.with_max_body_size(max_body_size);
        self
    }

    pub fn build(self) -> Web {
        let router = self.router.build();
        let stats = router.iter().map(|route| Arc::new(RouteStat::new(route.label.clone()))).collect();

        Web {
            router,
            statistics: Arc::new(Statistics::new(stats)),
            responder: self.responder,
            logger: self.logger,
            ids: RequestIds::new(),
            config: self.config,
        }
    }
}

impl fmt::Debug for WebBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebBuilder").field("router", &self.router).field("config", &self.config).finish_non_exhaustive()
    }
}
