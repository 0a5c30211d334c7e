#![allow(dead_code)]

use httpmock::MockServer;
use prompt_relay::{
    api::{self, AppState},
    config::AppConfig,
    upstream::UpstreamClient,
};
use tokio::net::TcpListener;

pub const API_KEY: &str = "sk-test";

pub fn state_for(upstream: &MockServer) -> AppState {
    let base_url = upstream.base_url();
    let config = AppConfig::from_lookup(|key| match key {
        "OPENROUTER_API_KEY" => Some(API_KEY.to_string()),
        "UPSTREAM_BASE_URL" => Some(base_url.clone()),
        _ => None,
    })
    .expect("config");
    let client = UpstreamClient::new(&config).expect("upstream client");
    AppState::new(client, config.max_tokens)
}

/// Starts the relay on an ephemeral port and returns its base URL.
pub async fn spawn_relay(upstream: &MockServer) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = api::app(state_for(upstream));
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

/// OpenAI-style streaming body emitting `parts` as content deltas.
pub fn upstream_sse(parts: &[&str]) -> String {
    let mut body = String::from(": OPENROUTER PROCESSING\n\n");
    body.push_str(
        "data: {\"id\":\"gen-1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
    );
    for part in parts {
        let chunk = serde_json::json!({
            "id": "gen-1",
            "choices": [{"index": 0, "delta": {"content": part}, "finish_reason": null}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}
