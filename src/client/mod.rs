//! Consumer side of `/api/completion`: sends a prompt, follows the event
//! stream and rebuilds the generated text as it arrives.

use futures_util::StreamExt;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{cache_key, ResponseCache};
use crate::error::ErrorBody;
use crate::model::{CompletionRequest, HistoryEntry, TaskKind};
use crate::sse::{self, SseDecoder, StreamEvent};

pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-8b-instruct:free";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("please enter a valid prompt")]
    EmptyPrompt,
    #[error("HTTP error {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response stream ended early ({reason})")]
    Incomplete { partial: String, reason: String },
    #[error("request cancelled")]
    Cancelled { partial: String },
}

impl ClientError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ClientError::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS)
    }

    /// Text received before the stream broke off, if any.
    pub fn partial(&self) -> Option<&str> {
        match self {
            ClientError::Incomplete { partial, .. } | ClientError::Cancelled { partial } => {
                Some(partial)
            }
            _ => None,
        }
    }
}

/// HTTP client for a running proxy.
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl CompletionClient {
    pub fn new(server_url: &str) -> Self {
        Self::with_http(reqwest::Client::new(), server_url)
    }

    pub fn with_http(http: reqwest::Client, server_url: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/api/completion", server_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Streams one completion. `on_update` receives the accumulated text
    /// after every fragment. Resolves with the full text once `[DONE]` is
    /// seen; a body that ends or fails before that is `Incomplete`.
    pub async fn stream_completion<F>(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str),
    {
        let send = self.http.post(&self.endpoint).json(request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled { partial: String::new() }),
            res = send => res.map_err(|err| {
                if closed_mid_response(&err) {
                    ClientError::Incomplete {
                        partial: String::new(),
                        reason: err.to_string(),
                    }
                } else {
                    ClientError::Http(err)
                }
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(ClientError::Status { status, message });
        }

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut accumulated = String::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ClientError::Cancelled { partial: accumulated });
                }
                chunk = body.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(err)) => {
                    return Err(ClientError::Incomplete {
                        partial: accumulated,
                        reason: err.to_string(),
                    });
                }
                None => {
                    return Err(ClientError::Incomplete {
                        partial: accumulated,
                        reason: "stream closed before [DONE]".into(),
                    });
                }
            };

            decoder.push(&bytes);
            loop {
                let record = match decoder.next_record() {
                    Ok(Some(record)) => record,
                    Ok(None) => break,
                    Err(err) => {
                        return Err(ClientError::Incomplete {
                            partial: accumulated,
                            reason: err.to_string(),
                        });
                    }
                };
                match sse::decode_record(&record) {
                    Ok(Some(StreamEvent::Done)) => {
                        debug!(chars = accumulated.len(), "completion stream finished");
                        return Ok(accumulated);
                    }
                    Ok(Some(StreamEvent::Fragment(fragment))) => {
                        accumulated.push_str(&fragment.text);
                        on_update(&accumulated);
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "skipping unparsable record"),
                }
            }
        }
    }
}

/// The server accepted the request and then dropped the connection before a
/// full response arrived. An aborted event stream can surface this way while
/// the response head is still buffered on the server.
fn closed_mid_response(err: &reqwest::Error) -> bool {
    err.is_body() || err.is_decode() || (err.is_request() && !err.is_connect() && !err.is_timeout())
}

/// One user's conversation: formats prompts per task, optionally serves
/// repeats from a [`ResponseCache`], and keeps the history of finished
/// exchanges.
pub struct ChatSession {
    client: CompletionClient,
    cache: Option<ResponseCache>,
    history: Vec<HistoryEntry>,
    lifetime: CancellationToken,
}

impl ChatSession {
    pub fn new(client: CompletionClient) -> Self {
        Self {
            client,
            cache: None,
            history: Vec::new(),
            lifetime: CancellationToken::new(),
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Token cancelled when the session is dropped. Submissions use child
    /// tokens of it, so cancelling it aborts whatever is in flight.
    pub fn lifetime(&self) -> CancellationToken {
        self.lifetime.clone()
    }

    pub async fn submit<F>(
        &mut self,
        input: &str,
        model: &str,
        task: TaskKind,
        on_update: F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str),
    {
        let cancel = self.lifetime.child_token();
        self.submit_with_cancel(input, model, task, &cancel, on_update)
            .await
    }

    pub async fn submit_with_cancel<F>(
        &mut self,
        input: &str,
        model: &str,
        task: TaskKind,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str),
    {
        if input.trim().is_empty() {
            return Err(ClientError::EmptyPrompt);
        }

        let prompt = task.format_prompt(input);
        let key = cache_key(model, task, &prompt);

        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            debug!(model, task = task.as_str(), "serving completion from cache");
            on_update(&cached);
            let mut entry = HistoryEntry::new(prompt, cached.clone(), model.to_string(), task);
            entry.cached = true;
            self.history.push(entry);
            return Ok(cached);
        }

        let request = CompletionRequest::new(prompt.clone(), model);
        let text = self
            .client
            .stream_completion(&request, cancel, on_update)
            .await?;

        if let Some(cache) = &self.cache {
            cache.insert(key, text.clone());
        }
        self.history.push(HistoryEntry::new(
            prompt,
            text.clone(),
            model.to_string(),
            task,
        ));
        Ok(text)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}
