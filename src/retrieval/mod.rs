//! Context resolution for a chat turn.
//!
//! Exactly one strategy is active per turn, in priority order: explicitly
//! pinned pages, web search results, semantic similarity search, nothing.

pub mod http;
pub mod pgvector;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::agent::{rewrite_search_query, Completer};
use crate::errors::AppError;
use crate::models::{PageSearchRequest, PageSummary, Scope, Source, TurnMessage};

/// Most pages the context picker lists for one query.
const PAGE_SEARCH_LIMIT: usize = 20;

/// Full text of a page as stored by the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub page_id: String,
    pub title: String,
    pub slug_id: String,
    pub space_id: String,
    pub space_slug: String,
    pub text: String,
}

impl From<&PageContent> for PageSummary {
    fn from(page: &PageContent) -> Self {
        PageSummary {
            page_id: page.page_id.clone(),
            title: page.title.clone(),
            slug_id: page.slug_id.clone(),
            space_id: page.space_id.clone(),
            space_slug: page.space_slug.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Top `top_k` chunks of the workspace ranked by descending similarity.
    async fn search(&self, workspace_id: &str, embedding: &[f32], top_k: usize) -> Result<Vec<Source>, AppError>;
}

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Live pages among `page_ids` in the workspace, in any order.
    async fn find_pages(&self, workspace_id: &str, page_ids: &[String]) -> Result<Vec<PageContent>, AppError>;

    /// Pages of one space whose title contains `query` (case-insensitive), at most `limit`.
    async fn search_titles(
        &self,
        workspace_id: &str,
        space_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PageSummary>, AppError>;
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<WebResult>, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SelectedPages,
    Web,
    Semantic,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub strategy: Strategy,
    pub sources: Vec<Source>,
}

/// What the orchestrator asks the retriever for.
pub struct ContextRequest<'a> {
    pub scope: &'a Scope,
    pub history: &'a [TurnMessage],
    pub selected_page_ids: &'a [String],
    pub web_search: bool,
}

#[derive(Clone)]
pub struct Retriever {
    pages: Arc<dyn PageSource>,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn SimilarityIndex>>,
    web: Option<Arc<dyn WebSearch>>,
    completer: Arc<dyn Completer>,
    top_k: usize,
}

impl Retriever {
    pub fn new(pages: Arc<dyn PageSource>, completer: Arc<dyn Completer>, top_k: usize) -> Self {
        Self { pages, embedder: None, index: None, web: None, completer, top_k }
    }

    pub fn with_semantic(mut self, embedder: Arc<dyn Embedder>, index: Arc<dyn SimilarityIndex>) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    pub fn with_web_search(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = Some(web);
        self
    }

    /// Pages for the context picker: the given ids in request order, else a
    /// title search within one space. Neither means nothing to list.
    pub async fn search_pages(&self, request: PageSearchRequest, scope: &Scope) -> Result<Vec<PageSummary>, AppError> {
        if let Some(ids) = request.page_ids.filter(|ids| !ids.is_empty()) {
            let found = self.pages.find_pages(&scope.workspace_id, &ids).await?;
            return Ok(ids
                .iter()
                .filter_map(|id| found.iter().find(|p| &p.page_id == id))
                .map(PageSummary::from)
                .collect());
        }
        let Some(space_id) = request.space_id.filter(|s| !s.is_empty()) else {
            return Ok(Vec::new());
        };
        let query = request.query.unwrap_or_default();
        self.pages
            .search_titles(&scope.workspace_id, &space_id, query.trim(), PAGE_SEARCH_LIMIT)
            .await
    }

    /// Resolves the context of one turn. Only a failed explicit page lookup
    /// is an error; every other failure degrades to fewer sources.
    pub async fn resolve(&self, request: ContextRequest<'_>) -> Result<Retrieval, AppError> {
        if !request.selected_page_ids.is_empty() {
            let sources = self
                .retrieve_selected_pages(request.selected_page_ids, request.scope)
                .await?;
            return Ok(Retrieval { strategy: Strategy::SelectedPages, sources });
        }

        if request.web_search {
            let sources = self.web_search(request.history).await;
            if !sources.is_empty() {
                return Ok(Retrieval { strategy: Strategy::Web, sources });
            }
        }

        let query = request
            .history
            .iter()
            .rev()
            .find(|m| m.role == crate::models::MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let sources = self.retrieve(query, request.scope, self.top_k).await;
        let strategy = if sources.is_empty() { Strategy::Empty } else { Strategy::Semantic };
        Ok(Retrieval { strategy, sources })
    }

    /// Ranked excerpts by similarity. An unavailable index or embedding
    /// backend yields an empty list.
    pub async fn retrieve(&self, query: &str, scope: &Scope, top_k: usize) -> Vec<Source> {
        let (Some(embedder), Some(index)) = (&self.embedder, &self.index) else {
            return Vec::new();
        };
        if query.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }
        let embedding = match embedder.embed(query).await {
            Ok(e) => e,
            Err(e) => {
                warn!("Embedding failed, continuing without context: {e}");
                return Vec::new();
            }
        };
        match index.search(&scope.workspace_id, &embedding, top_k).await {
            Ok(mut sources) => {
                sources.sort_by(|a, b| {
                    b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal)
                });
                sources.truncate(top_k);
                debug!("Semantic search returned {} chunks", sources.len());
                sources
            }
            Err(e) => {
                warn!("Similarity search failed, continuing without context: {e}");
                Vec::new()
            }
        }
    }

    /// Full-page pseudo-chunks for explicitly pinned pages, in caller order,
    /// with similarity fixed at 1.0.
    pub async fn retrieve_selected_pages(&self, page_ids: &[String], scope: &Scope) -> Result<Vec<Source>, AppError> {
        if page_ids.is_empty() {
            return Ok(Vec::new());
        }
        let found = self
            .pages
            .find_pages(&scope.workspace_id, page_ids)
            .await
            .map_err(|e| AppError::Retrieval(format!("selected page lookup failed: {e}")))?;
        let mut by_id: HashMap<String, PageContent> =
            found.into_iter().map(|p| (p.page_id.clone(), p)).collect();

        let mut seen = HashSet::new();
        let sources: Vec<Source> = page_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| by_id.remove(id))
            .enumerate()
            .map(|(i, page)| Source {
                page_id: page.page_id,
                title: page.title,
                slug_id: page.slug_id,
                space_slug: page.space_slug,
                url: None,
                excerpt: page.text,
                similarity: 1.0,
                chunk_index: i as i32,
            })
            .collect();
        if sources.len() < seen.len() {
            warn!("{} pinned pages were not found", seen.len() - sources.len());
        }
        Ok(sources)
    }

    async fn web_search(&self, history: &[TurnMessage]) -> Vec<Source> {
        let Some(web) = &self.web else {
            debug!("Web search requested but not configured");
            return Vec::new();
        };
        let query = match rewrite_search_query(self.completer.as_ref(), history).await {
            Ok(Some(q)) => q,
            Ok(None) => {
                debug!("Query rewrite decided no search is needed");
                return Vec::new();
            }
            Err(e) => {
                warn!("Query rewrite failed: {e}");
                return Vec::new();
            }
        };
        info!("Web search query: {query}");
        match web.search(&query).await {
            Ok(results) => results
                .into_iter()
                .enumerate()
                .map(|(i, r)| Source {
                    page_id: "web".to_string(),
                    title: r.title,
                    slug_id: String::new(),
                    space_slug: String::new(),
                    url: Some(r.url),
                    excerpt: r.snippet,
                    similarity: 1.0,
                    chunk_index: i as i32,
                })
                .collect(),
            Err(e) => {
                warn!("Web search failed: {e}");
                Vec::new()
            }
        }
    }
}

/// In-process page source used when no database is configured.
#[derive(Default)]
pub struct MemoryPages {
    pages: Vec<(String, PageContent)>,
}

impl MemoryPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, workspace_id: &str, page: PageContent) -> Self {
        self.pages.push((workspace_id.to_string(), page));
        self
    }
}

#[async_trait]
impl PageSource for MemoryPages {
    async fn find_pages(&self, workspace_id: &str, page_ids: &[String]) -> Result<Vec<PageContent>, AppError> {
        Ok(self
            .pages
            .iter()
            .filter(|(ws, p)| ws == workspace_id && page_ids.contains(&p.page_id))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn search_titles(
        &self,
        workspace_id: &str,
        space_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PageSummary>, AppError> {
        let query = query.to_lowercase();
        Ok(self
            .pages
            .iter()
            .filter(|(ws, p)| ws == workspace_id && p.space_id == space_id)
            .filter(|(_, p)| p.title.to_lowercase().contains(&query))
            .take(limit)
            .map(|(_, p)| PageSummary::from(p))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn page(id: &str, text: &str) -> PageContent {
        PageContent {
            page_id: id.to_string(),
            title: format!("Page {id}"),
            slug_id: format!("slug-{id}"),
            space_id: "space-1".to_string(),
            space_slug: "docs".to_string(),
            text: text.to_string(),
        }
    }

    pub struct FailingPages;

    #[async_trait]
    impl PageSource for FailingPages {
        async fn find_pages(&self, _: &str, _: &[String]) -> Result<Vec<PageContent>, AppError> {
            Err(AppError::Unexpected("connection reset".into()))
        }

        async fn search_titles(&self, _: &str, _: &str, _: &str, _: usize) -> Result<Vec<PageSummary>, AppError> {
            Err(AppError::Unexpected("connection reset".into()))
        }
    }

    pub struct FixedEmbedder(pub Result<Vec<f32>, String>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _: &str) -> Result<Vec<f32>, AppError> {
            self.0.clone().map_err(AppError::Retrieval)
        }
    }

    pub struct FixedIndex(pub Vec<Source>);

    #[async_trait]
    impl SimilarityIndex for FixedIndex {
        async fn search(&self, _: &str, _: &[f32], _: usize) -> Result<Vec<Source>, AppError> {
            Ok(self.0.clone())
        }
    }

    pub struct FixedWeb(pub Result<Vec<WebResult>, String>);

    #[async_trait]
    impl WebSearch for FixedWeb {
        async fn search(&self, _: &str) -> Result<Vec<WebResult>, AppError> {
            self.0.clone().map_err(AppError::Transport)
        }
    }

    pub fn chunk(page_id: &str, similarity: f64) -> Source {
        Source {
            page_id: page_id.to_string(),
            title: page_id.to_string(),
            slug_id: String::new(),
            space_slug: String::new(),
            url: None,
            excerpt: format!("excerpt of {page_id}"),
            similarity,
            chunk_index: 0,
        }
    }
}
