//! A small message board API.
//!
//! ```sh
//! curl -d 'message=hello&remark=first' http://127.0.0.1:8088/api/message
//! curl 'http://127.0.0.1:8088/api/message?id=1'
//! curl 'http://127.0.0.1:8088/api/message/list?limit=10'
//! curl http://127.0.0.1:8088/api/stat
//! ```

use http::StatusCode;
use micro_api::middleware::middleware_fn;
use micro_api::stat::Statistics;
use micro_api::{Bind, Failure, Json, RequestContext, ResultMap, RouterBuilder, Server, TracingLogger, Web};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Serialize)]
struct Message {
    id: i64,
    message: String,
    time: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    remark: String,
}

#[derive(Debug, Default)]
struct Board {
    messages: RwLock<BTreeMap<i64, Message>>,
    counter: AtomicI64,
}

impl Board {
    fn add(&self, message: String, remark: String) -> Result<Message, Failure> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let time = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        let message = Message { id, message, time, remark };

        let mut messages = self.messages.write().map_err(|_poisoned| Failure::server_error("message store poisoned"))?;
        messages.insert(id, message.clone());
        Ok(message)
    }

    fn get(&self, id: i64) -> Result<Option<Message>, Failure> {
        let messages = self.messages.read().map_err(|_poisoned| Failure::server_error("message store poisoned"))?;
        Ok(messages.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<Message>, Failure> {
        let messages = self.messages.read().map_err(|_poisoned| Failure::server_error("message store poisoned"))?;
        Ok(messages.values().cloned().collect())
    }
}

#[derive(Debug, Bind)]
struct PostMessage {
    #[web("message,required")]
    message: String,
    #[web("remark")]
    remark: String,
}

#[derive(Debug, Bind)]
struct GetMessage {
    #[web("id,required")]
    id: i64,
}

#[derive(Debug, Bind)]
struct ListMessages {
    #[web("limit,20")]
    limit: usize,
}

fn routes(board: &Arc<Board>, statistics: &Arc<OnceLock<Arc<Statistics>>>) -> RouterBuilder {
    let mut router = RouterBuilder::new();
    router.append(middleware_fn("request-id", |ctx: &mut RequestContext| {
        let id = ctx.request_id().to_string();
        if let Ok(value) = id.parse() {
            ctx.response_headers_mut().insert("x-request-id", value);
        }
        Ok(())
    }));

    let mut api = router.sub_router("/api");

    let store = Arc::clone(board);
    api.post("/message", move |_ctx: &mut RequestContext, args: PostMessage| store.add(args.message, args.remark).map(Json))
        .map(|_chain| ())
        .unwrap_or_else(|e| error!(cause = %e, "register route error"));

    let store = Arc::clone(board);
    api.get("/message", move |_ctx: &mut RequestContext, args: GetMessage| -> Result<Json<Message>, Failure> {
        match store.get(args.id)? {
            Some(message) => Ok(Json(message)),
            None => Err(Failure::new("msg not found", StatusCode::NOT_FOUND)),
        }
    })
    .map(|_chain| ())
    .unwrap_or_else(|e| error!(cause = %e, "register route error"));

    let store = Arc::clone(board);
    api.get("/message/list", move |_ctx: &mut RequestContext, args: ListMessages| -> Result<ResultMap, Failure> {
        let messages = store.list()?;
        let total = messages.len();
        let page: Vec<_> = messages.into_iter().take(args.limit).collect();
        Ok(ResultMap::new().insert("msgs", serde_json::to_value(page)?).insert("total", total))
    })
    .map(|_chain| ())
    .unwrap_or_else(|e| error!(cause = %e, "register route error"));

    let statistics = Arc::clone(statistics);
    api.get("/stat", move |_ctx: &mut RequestContext| match statistics.get() {
        Some(statistics) => Ok(Json(statistics.snapshot())),
        None => Err(Failure::server_error("statistics unavailable")),
    })
    .map(|_chain| ())
    .unwrap_or_else(|e| error!(cause = %e, "register route error"));

    router
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return;
    }

    let board = Arc::new(Board::default());
    let statistics = Arc::new(OnceLock::new());

    let web = Web::builder().router(routes(&board, &statistics)).logger(TracingLogger).build();
    let _ = statistics.set(Arc::clone(web.statistics()));

    for route in web.routes() {
        info!(route = %route.label, middlewares = ?route.middlewares, "registered");
    }

    let server = match Server::builder().web(web).address("127.0.0.1:8088").build() {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "build server error");
            return;
        }
    };

    if let Err(e) = server.start().await {
        error!(cause = %e, "server error");
    }

    if let Some(statistics) = statistics.get() {
        for route in statistics.top_count() {
            info!("{route}");
        }
    }
}
