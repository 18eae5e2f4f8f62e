use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, WebResult, WebSearch};
use crate::errors::AppError;

const SERPER_URL: &str = "https://google.serper.dev/search";
const WEB_RESULT_COUNT: usize = 5;

/// Query embeddings from Ollama's `/api/embeddings`.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let resp = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&EmbeddingRequest { model: &self.model, prompt: text })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AppError::Retrieval(format!("embedding HTTP {}", resp.status().as_u16())));
        }
        let body: EmbeddingResponse = resp.json().await?;
        if body.embedding.is_empty() {
            return Err(AppError::Retrieval("empty embedding".into()));
        }
        Ok(body.embedding)
    }
}

/// Google results through the Serper API.
#[derive(Clone)]
pub struct SerperSearch {
    client: Client,
    api_key: String,
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

impl SerperSearch {
    pub fn new(api_key: &str) -> Self {
        Self { client: Client::new(), api_key: api_key.to_string() }
    }
}

fn organic_results(body: SerperResponse) -> Vec<WebResult> {
    body.organic
        .into_iter()
        .filter(|r| !r.link.is_empty())
        .take(WEB_RESULT_COUNT)
        .map(|r| WebResult { title: r.title, url: r.link, snippet: r.snippet })
        .collect()
}

#[async_trait]
impl WebSearch for SerperSearch {
    async fn search(&self, query: &str) -> Result<Vec<WebResult>, AppError> {
        let resp = self
            .client
            .post(SERPER_URL)
            .header("X-API-KEY", &self.api_key)
            .json(&SerperRequest { q: query, num: WEB_RESULT_COUNT })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AppError::Retrieval(format!("web search HTTP {}", resp.status().as_u16())));
        }
        let results = organic_results(resp.json().await?);
        debug!("Web search returned {} results", results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_linked_organic_results() {
        let body: SerperResponse = serde_json::from_str(
            r#"{"organic":[
                {"title":"A","link":"https://a.dev","snippet":"first"},
                {"title":"no link"},
                {"title":"B","link":"https://b.dev"}
            ],"knowledgeGraph":{}}"#,
        )
        .unwrap();
        let results = organic_results(body);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://a.dev");
        assert_eq!(results[1].snippet, "");
    }

    #[test]
    fn missing_organic_section_is_empty() {
        let body: SerperResponse = serde_json::from_str("{}").unwrap();
        assert!(organic_results(body).is_empty());
    }
}
