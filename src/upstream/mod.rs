use std::{pin::Pin, time::Duration};

use bytes::Bytes;
use futures_util::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::AppConfig;
use crate::sse::{self, SseDecoder, SseError};

/// Text deltas of one streaming chat completion, in arrival order.
pub type DeltaStream = BoxStream<'static, Result<String, UpstreamError>>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("upstream stream failed: {0}")]
    Provider(String),
    #[error("failed to parse upstream chunk: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed upstream stream: {0}")]
    Frame(#[from] SseError),
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct UpstreamClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ProviderError {
    #[serde(default)]
    message: String,
}

impl UpstreamClient {
    pub fn new(config: &AppConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.upstream_timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url),
            api_key: config.api_key.clone(),
            timeout: config.upstream_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Opens a streaming completion for a single user message.
    ///
    /// Non-success statuses are returned as [`UpstreamError::Status`] before
    /// any delta is produced. The timeout covers the time to response headers
    /// only, a long generation is never cut.
    pub async fn stream_chat(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<DeltaStream, UpstreamError> {
        let body = ChatRequest {
            model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            stream: true,
        };

        debug!(endpoint = self.endpoint.as_str(), model, max_tokens, "opening upstream stream");

        let send = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status,
                message: error_message(status, &text),
            });
        }

        Ok(delta_stream(response.bytes_stream()))
    }
}

enum Record {
    Delta(String),
    Done,
    Skip,
}

struct DeltaState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    eof: bool,
}

/// Turns an upstream SSE byte stream into its non-empty content deltas.
///
/// Ends on `[DONE]` or at end of body. An `error` object inside a chunk ends
/// the stream with [`UpstreamError::Provider`].
pub fn delta_stream<S>(bytes: S) -> DeltaStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = DeltaState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        eof: false,
    };

    Box::pin(stream::try_unfold(state, next_delta))
}

async fn next_delta<S>(
    mut state: DeltaState<S>,
) -> Result<Option<(String, DeltaState<S>)>, UpstreamError>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    loop {
        if let Some(record) = state.decoder.next_record()? {
            match parse_record(&record)? {
                Record::Delta(text) => return Ok(Some((text, state))),
                Record::Done => return Ok(None),
                Record::Skip => continue,
            }
        }

        if state.eof {
            return match state.decoder.finish() {
                Some(record) => match parse_record(&record)? {
                    Record::Delta(text) => Ok(Some((text, state))),
                    Record::Done | Record::Skip => Ok(None),
                },
                None => Ok(None),
            };
        }

        match state.bytes.next().await {
            Some(chunk) => state.decoder.push(&chunk?),
            None => state.eof = true,
        }
    }
}

fn parse_record(record: &str) -> Result<Record, UpstreamError> {
    let Some(data) = sse::record_data(record) else {
        return Ok(Record::Skip);
    };
    if data == sse::DONE_SENTINEL {
        return Ok(Record::Done);
    }

    let chunk: ChatChunk = serde_json::from_str(&data)?;
    if let Some(err) = chunk.error {
        return Err(UpstreamError::Provider(err.message));
    }

    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default();

    if text.is_empty() {
        Ok(Record::Skip)
    } else {
        Ok(Record::Delta(text))
    }
}

/// Best human-readable message from an upstream error body.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        match map.get("error") {
            Some(Value::String(msg)) => return msg.clone(),
            Some(Value::Object(err)) => {
                if let Some(Value::String(msg)) = err.get("message") {
                    return msg.clone();
                }
            }
            _ => {}
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("upstream error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
        )
    }

    async fn collect(parts: Vec<String>) -> Vec<Result<String, UpstreamError>> {
        let bytes = stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<_, reqwest::Error>(Bytes::from(p))),
        );
        delta_stream(bytes).collect().await
    }

    #[tokio::test]
    async fn yields_deltas_until_done() {
        let body = format!(
            ": OPENROUTER PROCESSING\n\n{}{}{}data: [DONE]\n\n{}",
            chunk("Hel"),
            chunk(""),
            chunk("lo"),
            chunk("after done")
        );
        let out = collect(vec![body]).await;
        let texts: Vec<String> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn handles_chunks_split_mid_record() {
        let body = format!("{}{}", chunk("Hel"), chunk("lo"));
        let (a, b) = body.split_at(17);
        let out = collect(vec![a.to_string(), b.to_string()]).await;
        let texts: Vec<String> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn ends_cleanly_at_eof_without_sentinel() {
        let body = format!("{}data: {{\"choices\":[{{\"delta\":{{\"content\":\"!\"}}}}]}}", chunk("Hi"));
        let out = collect(vec![body]).await;
        let texts: Vec<String> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hi", "!"]);
    }

    #[tokio::test]
    async fn surfaces_mid_stream_provider_errors() {
        let body = format!(
            "{}data: {{\"error\":{{\"code\":502,\"message\":\"provider went away\"}}}}\n\n",
            chunk("Hel")
        );
        let out = collect(vec![body]).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "Hel");
        assert!(matches!(&out[1], Err(UpstreamError::Provider(msg)) if msg == "provider went away"));
    }

    #[tokio::test]
    async fn tolerates_null_delta_in_final_chunk() {
        let body = format!(
            "{}data: {{\"choices\":[{{\"index\":0,\"delta\":null,\"finish_reason\":\"stop\"}}]}}\n\n\
             data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":null}}}}]}}\n\n\
             data: [DONE]\n\n",
            chunk("Hel")
        );
        let out = collect(vec![body]).await;
        let texts: Vec<String> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hel"]);
    }

    #[tokio::test]
    async fn oversized_record_ends_the_stream() {
        let body = format!("{}data: {}", chunk("Hel"), "x".repeat(sse::DEFAULT_MAX_RECORD_BYTES + 1));
        let out = collect(vec![body]).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "Hel");
        assert!(matches!(
            &out[1],
            Err(UpstreamError::Frame(SseError::RecordTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn malformed_chunk_is_an_error() {
        let out = collect(vec!["data: {oops\n\n".to_string()]).await;
        assert!(matches!(out.as_slice(), [Err(UpstreamError::Json(_))]));
    }

    #[test]
    fn extracts_error_messages() {
        assert_eq!(
            error_message(
                StatusCode::TOO_MANY_REQUESTS,
                r#"{"error":{"message":"Rate limit exceeded","code":429}}"#
            ),
            "Rate limit exceeded"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"error":"bad model"}"#),
            "bad model"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "  upstream down \n"),
            "upstream down"
        );
        assert_eq!(
            error_message(StatusCode::SERVICE_UNAVAILABLE, ""),
            "Service Unavailable"
        );
    }
}
