//! Editor actions (improve, translate, summarise, ...) on a text selection.
//! No retrieval and no persistence; the streaming variant uses the same
//! frames as chat turns, `chunk` deltas then `[DONE]` or one `error`.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::{GenerateRequest, MessageRole, TurnMessage};
use crate::prompt::build_editor_system_prompt;
use crate::provider::{ChatProvider, ProviderDelta, ProviderRequest, ProviderRouter};
use crate::sse::{Frame, StreamEvent};

const MAX_CONTENT_LENGTH: usize = 32_000;

/// A validated editor action, ready to run.
pub struct PreparedGeneration {
    provider: Arc<dyn ChatProvider>,
    request: ProviderRequest,
}

#[derive(Clone)]
pub struct EditorService {
    router: ProviderRouter,
}

impl EditorService {
    pub fn new(router: ProviderRouter) -> Self {
        Self { router }
    }

    pub fn prepare(&self, request: GenerateRequest) -> Result<PreparedGeneration, AppError> {
        if request.content.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "content".to_string() });
        }
        if request.content.len() > MAX_CONTENT_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "content".to_string(),
                max_length: MAX_CONTENT_LENGTH,
                actual_length: request.content.len(),
            });
        }
        let (route, provider) = self.router.route(request.model.as_deref())?;
        let action = request.action.unwrap_or_default();
        debug!("Editor action {action:?} on model {}", route.id);
        Ok(PreparedGeneration {
            provider,
            request: ProviderRequest {
                model: route.upstream_model,
                system_prompt: build_editor_system_prompt(action, request.prompt.as_deref()),
                messages: vec![TurnMessage { role: MessageRole::User, content: request.content }],
                thinking: route.supports_thinking.then_some(false),
            },
        })
    }

    /// Runs the action to completion and returns the generated text.
    pub async fn generate(&self, request: GenerateRequest) -> Result<String, AppError> {
        let prepared = self.prepare(request)?;
        let mut stream = prepared.provider.stream_chat(prepared.request).await?;
        let mut content = String::new();
        while let Some(delta) = stream.next().await {
            if let ProviderDelta::Text(text) = delta? {
                content.push_str(&text);
            }
        }
        Ok(content)
    }

    /// Streams the action into `sink`. A closed sink stops the upstream request.
    pub async fn stream(&self, prepared: PreparedGeneration, sink: mpsc::Sender<Frame>) {
        match Self::forward(prepared, &sink).await {
            Ok(()) => {
                let _ = sink.send(Frame::Done).await;
            }
            Err(AppError::Cancelled) => debug!("Editor stream cancelled by client"),
            Err(e) => {
                error!("Editor stream failed: {e}");
                let _ = sink.send(Frame::Event(StreamEvent::Error(e.to_string()))).await;
            }
        }
    }

    async fn forward(prepared: PreparedGeneration, sink: &mpsc::Sender<Frame>) -> Result<(), AppError> {
        let mut stream = tokio::select! {
            biased;
            _ = sink.closed() => return Err(AppError::Cancelled),
            started = prepared.provider.stream_chat(prepared.request) => started?,
        };
        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => return Err(AppError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => return Ok(()),
                Some(Ok(ProviderDelta::Text(text))) => sink
                    .send(Frame::Event(StreamEvent::Chunk(text)))
                    .await
                    .map_err(|_| AppError::Cancelled)?,
                Some(Ok(ProviderDelta::Reasoning(_))) => {}
                Some(Err(e)) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EditorAction;
    use crate::provider::testing::{router, ScriptedProvider, Step};

    fn request(action: Option<EditorAction>, content: &str, prompt: Option<&str>) -> GenerateRequest {
        GenerateRequest {
            action,
            content: content.to_string(),
            prompt: prompt.map(str::to_string),
            model: None,
        }
    }

    #[tokio::test]
    async fn generate_collects_text_with_the_action_prompt() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Step::Reasoning("hmm"),
            Step::Text("Hallo "),
            Step::Text("Welt"),
        ]));
        let editor = EditorService::new(router(provider.clone()));

        let out = editor
            .generate(request(Some(EditorAction::Translate), "Hello world", Some("German")))
            .await
            .unwrap();
        assert_eq!(out, "Hallo Welt");

        let sent = &provider.requests.lock().unwrap()[0];
        assert!(sent.system_prompt.contains("Translate the following text to German"));
        assert_eq!(sent.messages[0].content, "Hello world");
    }

    #[tokio::test]
    async fn stream_ends_with_done_or_a_single_error() {
        let ok = EditorService::new(router(Arc::new(ScriptedProvider::new(vec![Step::Text("short")]))));
        let prepared = ok.prepare(request(Some(EditorAction::MakeShorter), "a long text", None)).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        ok.stream(prepared, tx).await;
        assert_eq!(rx.recv().await, Some(Frame::Event(StreamEvent::Chunk("short".into()))));
        assert_eq!(rx.recv().await, Some(Frame::Done));
        assert_eq!(rx.recv().await, None);

        let failing = EditorService::new(router(Arc::new(ScriptedProvider::new(vec![
            Step::Text("par"),
            Step::Fail("upstream reset"),
        ]))));
        let prepared = failing.prepare(request(None, "text", None)).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        failing.stream(prepared, tx).await;
        assert_eq!(rx.recv().await, Some(Frame::Event(StreamEvent::Chunk("par".into()))));
        assert!(matches!(rx.recv().await, Some(Frame::Event(StreamEvent::Error(_)))));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn rejects_empty_content_and_unknown_models() {
        let editor = EditorService::new(router(Arc::new(ScriptedProvider::new(vec![]))));
        assert!(editor.prepare(request(None, "   ", None)).err().unwrap().is_validation());

        let mut unknown = request(None, "text", None);
        unknown.model = Some("gpt-99".into());
        assert!(editor.prepare(unknown).err().unwrap().is_validation());
    }
}
