extern crate self as micro_api;

mod config;
mod dispatch;
mod fn_trait;
mod handler;
mod logger;
mod reply;
mod request;
mod responder;
mod server;

pub mod bind;
pub mod extract;
pub mod middleware;
pub mod router;
pub mod stat;

pub use bind::Bind;
pub use config::Config;
pub use dispatch::Web;
pub use dispatch::WebBuilder;
pub use fn_trait::FnTrait;
pub use handler::FnHandler;
pub use handler::RequestHandler;
pub use handler::handler_fn;
pub use logger::LogRecord;
pub use logger::RequestLogger;
pub use logger::TracingLogger;
pub use micro_api_macros::Bind;
pub use reply::Failure;
pub use reply::IntoReply;
pub use reply::Json;
pub use reply::JsonReply;
pub use reply::Message;
pub use reply::Reply;
pub use reply::ResultMap;
pub use reply::ToJson;
pub use request::Part;
pub use request::PathParams;
pub use request::RequestContext;
pub use request::Values;
pub use responder::DefaultResponder;
pub use responder::JSON_CONTENT_TYPE;
pub use responder::Responder;
pub use router::Router;
pub use router::RouterBuilder;
pub use server::Server;
pub use server::ServerBuildError;
pub use server::ServerBuilder;
pub use server::ServerError;
