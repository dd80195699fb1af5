use maker_web::{EngineHandlerBuilder, Method, Server};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let handler = EngineHandlerBuilder::new()
        .logger()
        .route(Method::Get, "/", |event| {
            event.set_response_header("Content-Type", "text/plain");
            event.send_text("Hello, world!").unwrap();
        })
        .build();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(handler)
        .build()
        .launch()
        .await;
}
