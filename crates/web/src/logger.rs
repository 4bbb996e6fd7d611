//! The per request logging hook.

use crate::reply::Reply;
use http::{Method, StatusCode};
use std::time::{Duration, SystemTime};
use tracing::{error, info};

/// What is known about a request once its response has been produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub request_id: u64,
    pub method: Method,
    pub path: String,
    /// wall clock time the request entered the pipeline
    pub start: SystemTime,
    pub elapsed: Duration,
    pub status: StatusCode,
}

/// Receives one call per routed request, after the response has been translated.
///
/// A panicking logger is trapped by the dispatcher and never affects the response.
#[cfg_attr(test, mockall::automock)]
pub trait RequestLogger: Send + Sync {
    fn on_log(&self, record: &LogRecord, reply: &Reply);
}

/// Forwards every record as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl RequestLogger for TracingLogger {
    fn on_log(&self, record: &LogRecord, reply: &Reply) {
        let elapsed_us = u64::try_from(record.elapsed.as_micros()).unwrap_or(u64::MAX);
        let status = record.status.as_u16();

        if record.status.is_server_error() {
            let message = reply.as_failure().map(|failure| failure.message()).unwrap_or_default();
            error!(request_id = record.request_id, method = %record.method, path = %record.path, status, elapsed_us, cause = message, "request failed");
        } else {
            info!(request_id = record.request_id, method = %record.method, path = %record.path, status, elapsed_us, "request served");
        }
    }
}
