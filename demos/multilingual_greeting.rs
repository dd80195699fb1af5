use maker_web::{EngineHandlerBuilder, Method, Server};
use tokio::net::TcpListener;

const GREETINGS: &[(&str, &str)] = &[
    ("en", r#"{"lang": "en", "text": "Hello, world!"}"#),
    ("zh", r#"{"lang": "zh", "text": "你好世界！"}"#),
    ("es", r#"{"lang": "es", "text": "¡Hola Mundo!"}"#),
    ("ar", r#"{"lang": "ar", "text": "مرحبا بالعالم!"}"#),
    ("pt", r#"{"lang": "pt", "text": "Olá, mundo!"}"#),
    ("hi", r#"{"lang": "hi", "text": "हैलो वर्ल्ड!"}"#),
    ("ru", r#"{"lang": "ru", "text": "Привет, мир!"}"#),
];

#[tokio::main]
async fn main() {
    let mut builder = EngineHandlerBuilder::new()
        .logger()
        .route(Method::Get, "/api", |event| {
            event.set_response_header("Content-Type", "application/json");
            event
                .send_text(r#"{"supported_lang": ["en", "zh", "es", "ar", "pt", "hi", "ru"]}"#)
                .unwrap();
        });

    for (segment, body) in GREETINGS {
        let pattern = format!("/api/{segment}");
        builder = builder.route(Method::Get, &pattern, move |event| {
            event.set_response_header("Content-Type", "application/json");
            event.send_text(*body).unwrap();
        });
    }

    let handler = builder.build();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(handler)
        .build()
        .launch()
        .await;
}
