use maker_web::{EngineHandlerBuilder, Method, Server};
use std::str::from_utf8;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let handler = EngineHandlerBuilder::new()
        .logger()
        .route(Method::Get, "/inspect", |event| {
            let user_agent = event
                .get_header(b"user-agent")
                .map(|v| format!(r#", "user_agent": {:?}"#, from_utf8(v).unwrap_or("")))
                .unwrap_or_default();

            let content_type = event
                .get_header(b"content-type")
                .map(|v| format!(r#", "content_type": {:?}"#, from_utf8(v).unwrap_or("")))
                .unwrap_or_default();

            let body = format!(
                r#"{{"method": "{:?}", "path": {:?}{user_agent}{content_type}, "body": {:?}}}"#,
                event.method(),
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
