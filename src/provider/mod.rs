//! Streaming model providers and model-id routing.

pub mod openai_compat;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;

use crate::config::{AppConfig, ModelRoute, ModelTable, ProviderKind};
use crate::errors::AppError;
use crate::models::TurnMessage;

use self::openai_compat::OpenAiCompatProvider;

/// A single increment of model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderDelta {
    Text(String),
    Reasoning(String),
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ProviderDelta, AppError>> + Send>>;

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Model name as the upstream backend knows it.
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<TurnMessage>,
    /// `None` when the model has no reasoning mode to toggle.
    pub thinking: Option<bool>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Starts a completion and returns its delta stream. Dropping the stream
    /// aborts the upstream request.
    async fn stream_chat(&self, request: ProviderRequest) -> Result<DeltaStream, AppError>;
}

/// Resolves model ids to their provider. Holds no per-request state.
#[derive(Clone)]
pub struct ProviderRouter {
    models: ModelTable,
    providers: HashMap<ProviderKind, Arc<dyn ChatProvider>>,
}

impl ProviderRouter {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut providers: HashMap<ProviderKind, Arc<dyn ChatProvider>> = HashMap::new();
        for (kind, endpoint) in &config.endpoints {
            let mut endpoint = endpoint.clone();
            if *kind == ProviderKind::Ollama {
                // Ollama serves the OpenAI wire format under /v1
                endpoint.base_url = format!("{}/v1", endpoint.base_url.trim_end_matches('/'));
            }
            providers.insert(*kind, Arc::new(OpenAiCompatProvider::new(endpoint)));
        }
        Self { models: config.models.clone(), providers }
    }

    pub fn with_providers(
        models: ModelTable,
        providers: HashMap<ProviderKind, Arc<dyn ChatProvider>>,
    ) -> Self {
        Self { models, providers }
    }

    pub fn models(&self) -> &ModelTable {
        &self.models
    }

    pub fn route(&self, model: Option<&str>) -> Result<(ModelRoute, Arc<dyn ChatProvider>), AppError> {
        let route = self.models.resolve(model)?;
        let provider = self.providers.get(&route.provider).cloned().ok_or_else(|| {
            AppError::Unexpected(format!("no provider registered for {:?}", route.provider))
        })?;
        Ok((route.clone(), provider))
    }
}
