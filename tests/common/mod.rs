#![allow(dead_code)]

use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use askweb::config::Config;

pub type Captured = Arc<Mutex<Vec<Value>>>;

pub fn captured() -> Captured {
    Arc::new(Mutex::new(Vec::new()))
}

/// Serves `router` on an ephemeral local port and returns its base url.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn test_config(search_base: &str, completion_base: &str) -> Config {
    Config {
        tavily_api_key: Some("tvly-test-key-123".to_string()),
        openai_api_key: Some("sk-test-key-456".to_string()),
        tavily_api_url: format!("{search_base}/search"),
        openai_base_url: completion_base.to_string(),
        openai_model: "gpt-4o".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        static_dir: "static".to_string(),
        chat_streaming: true,
    }
}

pub fn france_provider_response() -> Value {
    json!({
        "query": "capital of France",
        "results": [{
            "title": "France",
            "url": "https://en.wikipedia.org/wiki/France",
            "content": "Paris is the capital...",
            "raw_content": "Paris is the capital and largest city of France."
        }],
        "images": [{"url": "https://img.example/paris.jpg", "description": "Eiffel tower"}]
    })
}

/// A search provider that records each request body and answers with `response`.
pub fn fake_search_provider(response: Value, requests: Captured) -> Router {
    Router::new().route(
        "/search",
        post(move |Json(body): Json<Value>| {
            let requests = requests.clone();
            let response = response.clone();
            async move {
                requests.lock().unwrap().push(body);
                Json(response)
            }
        }),
    )
}

pub fn failing_provider(path: &'static str, status: StatusCode) -> Router {
    Router::new().route(
        path,
        post(move || async move { (status, "upstream unavailable") }),
    )
}

fn sse_body(fragments: &[&str]) -> Vec<u8> {
    let mut body = String::new();
    body.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
    for fragment in fragments {
        let event = json!({"choices": [{"delta": {"content": fragment}}]});
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

/// A completion provider that answers with `fragments`, streamed as SSE in
/// small chunks that cut through lines, or as one message when not streaming.
pub fn fake_completion_provider(fragments: Vec<&'static str>, requests: Captured) -> Router {
    Router::new().route(
        "/chat/completions",
        post(move |Json(body): Json<Value>| {
            let requests = requests.clone();
            let fragments = fragments.clone();
            async move {
                let streaming = body["stream"].as_bool().unwrap_or(false);
                requests.lock().unwrap().push(body);

                if !streaming {
                    let content: String = fragments.concat();
                    return Json(json!({"choices": [{"message": {"content": content}}]}))
                        .into_response();
                }

                let chunks: Vec<Result<Vec<u8>, Infallible>> = sse_body(&fragments)
                    .chunks(7)
                    .map(|c| Ok(c.to_vec()))
                    .collect();
                (
                    [(CONTENT_TYPE, "text/event-stream")],
                    Body::from_stream(futures::stream::iter(chunks)),
                )
                    .into_response()
            }
        }),
    )
}
