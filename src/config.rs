//! Environment configuration and the model routing table.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use crate::errors::AppError;
use crate::prompt::Persona;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_COMPLETION_MODEL: &str = "llama3.2";
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
const DEFAULT_HISTORY_LIMIT: usize = 10;
const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("model routing table is empty")]
    NoModels,
    #[error("model '{0}' is declared more than once")]
    DuplicateModel(String),
    #[error("default model '{0}' is not in the routing table")]
    UnknownDefault(String),
    #[error("model '{model}' routes to {provider:?} but no endpoint is configured for it")]
    MissingEndpoint { model: String, provider: ProviderKind },
    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: String, value: String },
}

/// Backend family a model id is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    OpenAiCompatible,
    Ollama,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

/// One entry of the routing table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRoute {
    pub id: String,
    pub label: String,
    #[serde(skip)]
    pub provider: ProviderKind,
    #[serde(skip)]
    pub upstream_model: String,
    pub supports_thinking: bool,
}

impl ModelRoute {
    pub fn new(id: &str, label: &str, provider: ProviderKind, supports_thinking: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            provider,
            upstream_model: id.to_string(),
            supports_thinking,
        }
    }
}

/// Explicit model-id → provider routing, validated once at startup.
#[derive(Debug, Clone)]
pub struct ModelTable {
    routes: Vec<ModelRoute>,
    default_model: String,
}

impl ModelTable {
    pub fn new(
        routes: Vec<ModelRoute>,
        default_model: impl Into<String>,
        endpoints: &HashMap<ProviderKind, ProviderEndpoint>,
    ) -> Result<Self, ConfigError> {
        if routes.is_empty() {
            return Err(ConfigError::NoModels);
        }
        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.id.as_str()) {
                return Err(ConfigError::DuplicateModel(route.id.clone()));
            }
            if !endpoints.contains_key(&route.provider) {
                return Err(ConfigError::MissingEndpoint {
                    model: route.id.clone(),
                    provider: route.provider,
                });
            }
        }
        let default_model = default_model.into();
        if !seen.contains(default_model.as_str()) {
            return Err(ConfigError::UnknownDefault(default_model));
        }
        Ok(Self { routes, default_model })
    }

    /// Resolves a requested model id; `None` selects the default model.
    pub fn resolve(&self, model: Option<&str>) -> Result<&ModelRoute, AppError> {
        let id = model.unwrap_or(&self.default_model);
        self.routes
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::UnknownModel { model_id: id.to_string() })
    }

    pub fn routes(&self) -> &[ModelRoute] {
        &self.routes
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

/// Built-in routes. Hosted models are only offered when an OpenAI-compatible
/// endpoint is configured.
pub fn default_routes(endpoints: &HashMap<ProviderKind, ProviderEndpoint>) -> Vec<ModelRoute> {
    let mut routes = Vec::new();
    if endpoints.contains_key(&ProviderKind::OpenAiCompatible) {
        routes.push(ModelRoute::new("glm-4.7-flash", "GLM-4.7", ProviderKind::OpenAiCompatible, true));
        routes.push(ModelRoute::new("deepseek-chat", "DeepSeek", ProviderKind::OpenAiCompatible, false));
        routes.push(ModelRoute::new("MiniMax-M2", "MiniMax M2", ProviderKind::OpenAiCompatible, true));
    }
    routes.push(ModelRoute::new("llama3.2", "Llama 3.2 (local)", ProviderKind::Ollama, false));
    routes.push(ModelRoute::new("qwen3", "Qwen 3 (local)", ProviderKind::Ollama, true));
    routes
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub port: u16,
    pub endpoints: HashMap<ProviderKind, ProviderEndpoint>,
    pub completion_model: String,
    pub embedding_model: String,
    pub serper_api_key: Option<String>,
    pub memory_enabled: bool,
    pub history_limit: usize,
    pub top_k: usize,
    /// Workspace persona (`AI_SOUL`) and reader context (`AI_USER_PROFILE`) for chat prompts.
    pub persona: Persona,
    pub models: ModelTable,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut endpoints = HashMap::new();
        endpoints.insert(
            ProviderKind::Ollama,
            ProviderEndpoint {
                base_url: var("OLLAMA_API_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
                api_key: None,
            },
        );
        if let Some(base_url) = var("OPENAI_API_BASE_URL") {
            endpoints.insert(
                ProviderKind::OpenAiCompatible,
                ProviderEndpoint { base_url, api_key: var("OPENAI_API_KEY") },
            );
        }

        let routes = default_routes(&endpoints);
        let default_model = var("AI_DEFAULT_MODEL").unwrap_or_else(|| routes[0].id.clone());
        let models = ModelTable::new(routes, default_model, &endpoints)?;

        Ok(Self {
            database_url: var("DATABASE_URL"),
            port: parse_or(&var, "PORT", DEFAULT_PORT)?,
            endpoints,
            completion_model: var("AI_COMPLETION_MODEL")
                .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.to_string()),
            embedding_model: var("AI_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            serper_api_key: var("SERPER_API_KEY"),
            memory_enabled: parse_or(&var, "AI_MEMORY_ENABLED", false)?,
            history_limit: parse_or(&var, "AI_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,
            top_k: parse_or(&var, "RAG_TOP_K", DEFAULT_TOP_K)?,
            persona: Persona { soul: var("AI_SOUL"), user_profile: var("AI_USER_PROFILE") },
            models,
        })
    }

    pub fn ollama_base_url(&self) -> &str {
        self.endpoints
            .get(&ProviderKind::Ollama)
            .map(|e| e.base_url.as_str())
            .unwrap_or(DEFAULT_OLLAMA_URL)
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name: name.to_string(), value }),
    }
}
