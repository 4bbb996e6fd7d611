//! The HTTP/1.1 transport in front of [`Web`].
//!
//! Each accepted socket becomes one connection task. A request body is read completely,
//! bounded by `max_body_size` and `read_timeout`, then the synchronous pipeline runs on a
//! blocking worker so a slow handler never stalls the connection tasks.
//!
//! On shutdown the listener stops accepting, open connections are told to finish their
//! current request and the server waits at most `drain_timeout` for them. Connections still
//! open after that are left running, never aborted.

use crate::config::Config;
use crate::dispatch::Web;
use crate::extract::ParamError;
use crate::reply::{Failure, IntoReply};
use crate::responder::{DefaultResponder, Responder};
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct ServerBuilder {
    web: Option<Web>,
    address: Option<Result<Vec<SocketAddr>, String>>,
    config: Option<Config>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { web: None, address: None, config: None }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        let resolved: Result<Vec<SocketAddr>, String> = address.to_socket_addrs().map(Iterator::collect).map_err(|e| e.to_string());
        self.address = Some(resolved);
        self
    }

    pub fn web(mut self, web: Web) -> Self {
        self.web = Some(web);
        self
    }

    /// Overrides the transport limits; the web's own config is used otherwise
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let web = self.web.ok_or(ServerBuildError::MissingWeb)?;
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?.map_err(ServerBuildError::InvalidAddress)?;
        if address.is_empty() {
            return Err(ServerBuildError::InvalidAddress("address resolved to nothing".into()));
        }
        let config = self.config.unwrap_or_else(|| web.config().clone());
        Ok(Server { web: Arc::new(web), address, config })
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("web must be set")]
    MissingWeb,
    #[error("address must be set")]
    MissingAddress,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("bind server error: {0}")]
    Bind(#[source] io::Error),
}

#[derive(Debug)]
pub struct Server {
    web: Arc<Web>,
    address: Vec<SocketAddr>,
    config: Config,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Serves until Ctrl-C or SIGTERM.
    pub async fn start(self) -> Result<(), ServerError> {
        self.start_with_shutdown(shutdown_signal()).await
    }

    /// Serves until `signal` completes.
    pub async fn start_with_shutdown(self, signal: impl Future<Output = ()>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.address.as_slice()).await.map_err(|e| {
            error!(cause = %e, "bind server error");
            ServerError::Bind(e)
        })?;
        info!(address = ?self.address, "start listening");

        self.serve_listener(listener, signal).await;
        Ok(())
    }

    /// Serves connections from an already bound listener until `signal` completes.
    pub async fn serve_listener(self, listener: TcpListener, signal: impl Future<Output = ()>) {
        let read_timeout = self.config.read_timeout();
        let max_body_size = self.config.max_body_size();
        let graceful = GracefulShutdown::new();
        let mut tasks = JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(stream_and_addr) => stream_and_addr,
                        Err(e) => {
                            warn!(cause = %e, "failed to accept");
                            continue;
                        }
                    };

                    let web = Arc::clone(&self.web);
                    let service = service_fn(move |request: Request<Incoming>| {
                        let web = Arc::clone(&web);
                        async move { Ok::<_, Infallible>(handle(web, request, max_body_size, read_timeout).await) }
                    });

                    let connection = graceful.watch(http1::Builder::new().serve_connection(TokioIo::new(stream), service));
                    tasks.spawn(async move {
                        if let Err(e) = connection.await {
                            warn!(peer = %remote_addr, cause = %e, "connection closed with error");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        if tokio::time::timeout(self.config.drain_timeout(), graceful.shutdown()).await.is_err() {
            // connections still running finish on their own, they are just no longer awaited
            warn!(remaining = tasks.len(), "drain timeout elapsed, leaving connections to finish");
            tasks.detach_all();
        }
        while tasks.join_next().await.is_some() {}

        info!("server stopped");
    }
}

/// Reads the body under both limits, then runs the pipeline on a blocking worker.
async fn handle(web: Arc<Web>, request: Request<Incoming>, max_body_size: usize, read_timeout: Duration) -> Response<Full<Bytes>> {
    let (head, body) = request.into_parts();

    let body = match tokio::time::timeout(read_timeout, Limited::new(body, max_body_size).collect()).await {
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
        Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => Err(ParamError::PayloadTooLarge { limit: max_body_size }.into_failure()),
        Ok(Err(e)) => Err(Failure::bad_request(e.to_string())),
        Err(_) => Err(Failure::with_message("request timeout", "reading the request body timed out", StatusCode::REQUEST_TIMEOUT)),
    };

    let response = match tokio::task::spawn_blocking(move || web.serve_parts(head, body)).await {
        Ok(response) => response,
        Err(e) => {
            error!(cause = %e, "pipeline worker failed");
            DefaultResponder.respond(HeaderMap::new(), &Failure::server_error(e.to_string()).into_reply())
        }
    };

    response.map(Full::new)
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(cause = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(cause = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
