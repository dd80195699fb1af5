use maker_web::{EngineHandlerBuilder, Method, Server};
use tokio::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Per-connection request counting now happens inside `EngineConnectionState`
// itself (its `MemoryManager`/`RouteCache` stats track hits and misses), but
// a handler can still keep its own counters by closing over shared state.
#[tokio::main]
async fn main() {
    let total_requests = Arc::new(AtomicUsize::new(0));

    let handler = {
        let total_requests = Arc::clone(&total_requests);
        EngineHandlerBuilder::new()
            .logger()
            .route(Method::Get, "/", move |event| {
                let count = total_requests.fetch_add(1, Ordering::Relaxed) + 1;
                event.set_response_header("Content-Type", "application/json");
                event
                    .send_text(format!(r#"{{"count_request": {count}}}"#))
                    .unwrap();
            })
            .build()
    };

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(handler)
        .build()
        .launch()
        .await;
}
