use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatProvider, DeltaStream, ProviderDelta, ProviderRequest};
use crate::config::ProviderEndpoint;
use crate::errors::AppError;
use crate::sse::{SseLineBuffer, DONE_SENTINEL};

/// Provider speaking the OpenAI `/chat/completions` streaming protocol.
/// Used for hosted OpenAI-compatible vendors and for Ollama's `/v1` API.
pub struct OpenAiCompatProvider {
    client: Client,
    endpoint: ProviderEndpoint,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingOption>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ThinkingOption {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

enum ChunkOutcome {
    Deltas { deltas: Vec<ProviderDelta>, finished: bool },
    Failed(String),
    Done,
    Skip,
}

fn parse_chunk(payload: &str) -> ChunkOutcome {
    if payload == DONE_SENTINEL {
        return ChunkOutcome::Done;
    }
    let chunk: CompletionChunk = match serde_json::from_str(payload) {
        Ok(c) => c,
        Err(e) => {
            warn!("Skipping malformed completion chunk: {e}");
            return ChunkOutcome::Skip;
        }
    };
    if let Some(err) = chunk.error {
        return ChunkOutcome::Failed(err.to_string());
    }
    let mut deltas = Vec::new();
    let mut finished = false;
    for choice in chunk.choices {
        finished |= choice.finish_reason.is_some();
        let reasoning = choice.delta.reasoning_content.or(choice.delta.reasoning);
        if let Some(text) = reasoning.filter(|t| !t.is_empty()) {
            deltas.push(ProviderDelta::Reasoning(text));
        }
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            deltas.push(ProviderDelta::Text(text));
        }
    }
    ChunkOutcome::Deltas { deltas, finished }
}

struct DecodeState<S> {
    body: S,
    lines: SseLineBuffer,
    pending: VecDeque<Result<ProviderDelta, AppError>>,
    saw_finish_reason: bool,
    finished: bool,
}

/// Turns a raw SSE body into provider deltas. Ends at `[DONE]` or after the
/// first error. A body that ends before `[DONE]` and without any
/// `finish_reason` was cut off and yields a trailing error.
pub(crate) fn decode_completion_stream<S, B, E>(
    body: S,
) -> impl Stream<Item = Result<ProviderDelta, AppError>> + Send
where
    S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    let state = DecodeState {
        body,
        lines: SseLineBuffer::new(),
        pending: VecDeque::new(),
        saw_finish_reason: false,
        finished: false,
    };
    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for payload in st.lines.push(bytes.as_ref()) {
                        match parse_chunk(&payload) {
                            ChunkOutcome::Deltas { deltas, finished } => {
                                st.saw_finish_reason |= finished;
                                st.pending.extend(deltas.into_iter().map(Ok));
                            }
                            ChunkOutcome::Skip => {}
                            ChunkOutcome::Done => {
                                st.finished = true;
                                break;
                            }
                            ChunkOutcome::Failed(message) => {
                                st.pending.push_back(Err(AppError::provider(message)));
                                st.finished = true;
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    st.finished = true;
                    if !st.saw_finish_reason {
                        warn!("Completion stream closed before [DONE]");
                        st.pending
                            .push_back(Err(AppError::provider("stream ended before completion")));
                    }
                }
            }
        }
    })
}

impl OpenAiCompatProvider {
    pub fn new(endpoint: ProviderEndpoint) -> Self {
        Self { client: Client::new(), endpoint }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn stream_chat(&self, request: ProviderRequest) -> Result<DeltaStream, AppError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage { role: "system", content: &request.system_prompt });
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| WireMessage { role: m.role.as_str(), content: &m.content }),
        );
        let body = CompletionRequest {
            model: &request.model,
            messages,
            stream: true,
            thinking: request.thinking.map(|enabled| ThinkingOption {
                kind: if enabled { "enabled" } else { "disabled" },
            }),
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/'));
        debug!("Streaming completion from {url} with model {}", request.model);

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = self.endpoint.api_key.as_deref() {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_connect() {
                AppError::ProviderUnavailable { host: self.endpoint.base_url.clone() }
            } else {
                AppError::from(e)
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::provider(format!("HTTP {status}: {text}")));
        }

        Ok(Box::pin(decode_completion_stream(Box::pin(resp.bytes_stream()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, AppError>> + Unpin + Send {
        let items: Vec<Result<Vec<u8>, AppError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures_util::stream::iter(items)
    }

    async fn collect(parts: &[&str]) -> Vec<Result<ProviderDelta, AppError>> {
        decode_completion_stream(body(parts)).collect().await
    }

    #[tokio::test]
    async fn decodes_text_and_reasoning_deltas_across_reads() {
        let out = collect(&[
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"let me\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel",
            "lo\"}}]}\n\ndata: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ])
        .await;
        let deltas: Vec<ProviderDelta> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            deltas,
            vec![
                ProviderDelta::Reasoning("let me".into()),
                ProviderDelta::Text("Hello".into()),
            ]
        );
    }

    #[tokio::test]
    async fn skips_malformed_chunks() {
        let out = collect(&[
            "data: {not json}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &ProviderDelta::Text("ok".into()));
    }

    #[tokio::test]
    async fn in_band_error_ends_stream() {
        let out = collect(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"rate limited\"}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
        ])
        .await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(AppError::Provider { .. })));
    }

    #[tokio::test]
    async fn transport_error_is_forwarded_once() {
        let items: Vec<Result<Vec<u8>, AppError>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec()),
            Err(AppError::Transport("reset".into())),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n".to_vec()),
        ];
        let out: Vec<_> = decode_completion_stream(futures_util::stream::iter(items)).collect().await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(AppError::Transport(_))));
    }

    #[tokio::test]
    async fn body_cut_off_before_done_is_an_error() {
        let out = collect(&["data: {\"choices\":[{\"delta\":{\"content\":\"half an ans\"}}]}\n\n"]).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), &ProviderDelta::Text("half an ans".into()));
        assert!(matches!(out[1], Err(AppError::Provider { .. })));
    }

    #[tokio::test]
    async fn finish_reason_without_done_is_complete() {
        let out = collect(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"all\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        ])
        .await;
        assert_eq!(out.len(), 1);
        assert!(out[0].is_ok());
    }
}
