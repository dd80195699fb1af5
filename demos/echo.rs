use maker_web::{EngineHandlerBuilder, Method, Server};
use std::str::from_utf8;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let handler = EngineHandlerBuilder::new()
        .logger()
        .route(Method::Post, "/echo", |event| {
            let body = format!(
                r#"{{"path": {:?}, "body": {:?}}}"#,
                from_utf8(event.path()).unwrap_or(""),
                from_utf8(event.body().unwrap_or(&[])).unwrap_or(""),
            );
            event.set_response_header("Content-Type", "application/json");
            event.send_text(body).unwrap();
        })
        .build();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(handler)
        .build()
        .launch()
        .await;
}
