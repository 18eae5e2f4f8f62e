use async_trait::async_trait;
use rig::client::Nothing;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use tracing::{error, warn};

use crate::errors::AppError;
use crate::models::{MessageRole, TurnMessage};

const MAX_TITLE_CHARS: usize = 60;
const NO_SEARCH: &str = "NO_SEARCH";

const TITLE_PREAMBLE: &str = "You name chat conversations. \
                              Reply with a title of 5 words or fewer, no punctuation, nothing else.";
const OBJECTIVE_PREAMBLE: &str = "You are a design assistant. The user wants to build a website or \
                                  web application. Restate their request as one clear, actionable \
                                  objective. Reply with the objective only.";
const SEARCH_PREAMBLE: &str = "You turn conversations into web search queries. \
                               If the latest user message needs up-to-date or external facts, reply \
                               with concise search keywords, resolving pronouns from earlier turns. \
                               Otherwise reply with exactly NO_SEARCH.";

/// One-shot, non-streaming completions used around the chat turn
/// (titles, search-query rewriting, design objectives).
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, AppError>;
}

/// [`Completer`] backed by a local Ollama model through rig.
/// A fresh agent is built per call; no conversation state is kept.
#[derive(Clone)]
pub struct OllamaCompleter {
    client: ollama::Client,
    base_url: String,
    model: String,
}

impl OllamaCompleter {
    pub fn new(base_url: &str, model: &str) -> Result<Self, AppError> {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(base_url)
            .build()
            .map_err(|e| AppError::Unexpected(format!("Failed to build Ollama client: {e:?}")))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Completer for OllamaCompleter {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, AppError> {
        let agent = self.client.agent(&self.model).preamble(preamble).build();

        agent
            .chat(prompt, Vec::<RigMessage>::new())
            .await
            .map_err(|e| {
                error!("Ollama completion failed: {e}");
                let msg = e.to_string();
                if msg.contains("Connection refused") || msg.contains("connect") {
                    AppError::ProviderUnavailable { host: self.base_url.clone() }
                } else {
                    AppError::provider(msg)
                }
            })
    }
}

/// Derives a short session title from the first user message.
pub async fn generate_title(completer: &dyn Completer, first_message: &str) -> Result<String, AppError> {
    let raw = completer.complete(TITLE_PREAMBLE, first_message).await?;
    let cleaned: String = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.')
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        return Err(AppError::provider("model returned an empty title"));
    }
    Ok(cleaned)
}

/// Refines a design request into an objective. Falls back to the original
/// message when the model is unavailable.
pub async fn clarify_objective(completer: &dyn Completer, message: &str) -> String {
    match completer.complete(OBJECTIVE_PREAMBLE, message).await {
        Ok(raw) => {
            let objective = raw.replace("```json", "").replace("```", "");
            let objective = objective.trim();
            // models sometimes answer with {"objective": "..."}
            let parsed = serde_json::from_str::<serde_json::Value>(objective)
                .ok()
                .and_then(|v| v.get("objective").and_then(|o| o.as_str()).map(str::to_string));
            match parsed {
                Some(o) if !o.trim().is_empty() => o.trim().to_string(),
                _ if !objective.is_empty() => objective.to_string(),
                _ => message.to_string(),
            }
        }
        Err(e) => {
            warn!("Objective clarification failed, using original message: {e}");
            message.to_string()
        }
    }
}

/// Rewrites the conversation into a web search query; `None` when no search is needed.
pub async fn rewrite_search_query(
    completer: &dyn Completer,
    history: &[TurnMessage],
) -> Result<Option<String>, AppError> {
    let transcript = history
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let who = match m.role {
                MessageRole::User => "Human",
                MessageRole::Assistant => "Assistant",
            };
            format!("[Message {} - {who}]: {}", i + 1, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let prompt = format!(
        "Current date: {}\n\n{transcript}",
        chrono::Utc::now().format("%Y-%m-%d")
    );

    let query = completer.complete(SEARCH_PREAMBLE, &prompt).await?;
    let query = query.trim().trim_matches('"').trim();
    if query.is_empty() || query == NO_SEARCH {
        Ok(None)
    } else {
        Ok(Some(query.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Replays a fixed reply and records prompts.
    pub struct ScriptedCompleter {
        reply: Result<String, String>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompleter {
        pub fn replying(reply: &str) -> Self {
            Self { reply: Ok(reply.to_string()), prompts: Mutex::new(Vec::new()) }
        }

        pub fn failing(message: &str) -> Self {
            Self { reply: Err(message.to_string()), prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Completer for ScriptedCompleter {
        async fn complete(&self, _preamble: &str, prompt: &str) -> Result<String, AppError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            self.reply.clone().map_err(AppError::provider)
        }
    }
}
