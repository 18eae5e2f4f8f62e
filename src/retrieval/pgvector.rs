use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error};

use super::{PageContent, PageSource, SimilarityIndex};
use crate::errors::AppError;
use crate::models::{PageSummary, Source};

/// Page text and chunk embeddings read from the workspace's own tables.
/// Neither table is owned by this service; both are only queried.
#[derive(Clone)]
pub struct PgPageIndex {
    pool: PgPool,
}

impl PgPageIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn embeddings_table_exists(&self) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass('page_embeddings') IS NOT NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::db_query("Failed to check for page_embeddings", e))
    }
}

/// pgvector text literal, e.g. `[0.1,0.2]`.
fn vector_literal(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[async_trait]
impl SimilarityIndex for PgPageIndex {
    async fn search(&self, workspace_id: &str, embedding: &[f32], top_k: usize) -> Result<Vec<Source>, AppError> {
        if !self.embeddings_table_exists().await? {
            debug!("page_embeddings table missing, semantic search disabled");
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT pe.page_id::text AS page_id,
                    COALESCE(p.title, '') AS title,
                    COALESCE(p.slug_id, '') AS slug_id,
                    COALESCE(s.slug, '') AS space_slug,
                    COALESCE(pe.content, '') AS excerpt,
                    (1 - (pe.embedding <=> $1::text::vector))::float8 AS similarity,
                    pe.chunk_index::int4 AS chunk_index
             FROM page_embeddings pe
             JOIN pages p ON p.id = pe.page_id
             LEFT JOIN spaces s ON s.id = p.space_id
             WHERE pe.workspace_id::text = $2 AND p.deleted_at IS NULL
             ORDER BY pe.embedding <=> $1::text::vector
             LIMIT $3",
        )
        .bind(vector_literal(embedding))
        .bind(workspace_id)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Similarity search failed for workspace {workspace_id}: {e}");
            AppError::db_query("Failed to search page embeddings", e)
        })?;

        rows.into_iter()
            .map(|row| {
                Ok(Source {
                    page_id: row.try_get("page_id").map_err(|e| AppError::db_query("Failed to read page_id", e))?,
                    title: row.try_get("title").map_err(|e| AppError::db_query("Failed to read title", e))?,
                    slug_id: row.try_get("slug_id").map_err(|e| AppError::db_query("Failed to read slug_id", e))?,
                    space_slug: row
                        .try_get("space_slug")
                        .map_err(|e| AppError::db_query("Failed to read space_slug", e))?,
                    url: None,
                    excerpt: row.try_get("excerpt").map_err(|e| AppError::db_query("Failed to read excerpt", e))?,
                    similarity: row
                        .try_get("similarity")
                        .map_err(|e| AppError::db_query("Failed to read similarity", e))?,
                    chunk_index: row
                        .try_get("chunk_index")
                        .map_err(|e| AppError::db_query("Failed to read chunk_index", e))?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PageSource for PgPageIndex {
    async fn find_pages(&self, workspace_id: &str, page_ids: &[String]) -> Result<Vec<PageContent>, AppError> {
        let rows = sqlx::query(
            "SELECT p.id::text AS page_id,
                    COALESCE(p.title, '') AS title,
                    COALESCE(p.slug_id, '') AS slug_id,
                    COALESCE(p.space_id::text, '') AS space_id,
                    COALESCE(s.slug, '') AS space_slug,
                    COALESCE(p.text_content, '') AS text
             FROM pages p
             LEFT JOIN spaces s ON s.id = p.space_id
             WHERE p.id::text = ANY($1) AND p.workspace_id::text = $2 AND p.deleted_at IS NULL",
        )
        .bind(page_ids)
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load pinned pages for workspace {workspace_id}: {e}");
            AppError::db_query("Failed to load pages", e)
        })?;

        rows.into_iter()
            .map(|row| {
                Ok(PageContent {
                    page_id: row.try_get("page_id").map_err(|e| AppError::db_query("Failed to read page_id", e))?,
                    title: row.try_get("title").map_err(|e| AppError::db_query("Failed to read title", e))?,
                    slug_id: row.try_get("slug_id").map_err(|e| AppError::db_query("Failed to read slug_id", e))?,
                    space_id: row.try_get("space_id").map_err(|e| AppError::db_query("Failed to read space_id", e))?,
                    space_slug: row
                        .try_get("space_slug")
                        .map_err(|e| AppError::db_query("Failed to read space_slug", e))?,
                    text: row.try_get("text").map_err(|e| AppError::db_query("Failed to read text", e))?,
                })
            })
            .collect()
    }

    async fn search_titles(
        &self,
        workspace_id: &str,
        space_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PageSummary>, AppError> {
        let rows = sqlx::query(
            "SELECT p.id::text AS page_id,
                    COALESCE(p.title, '') AS title,
                    COALESCE(p.slug_id, '') AS slug_id,
                    p.space_id::text AS space_id,
                    COALESCE(s.slug, '') AS space_slug
             FROM pages p
             LEFT JOIN spaces s ON s.id = p.space_id
             WHERE p.space_id::text = $1 AND p.workspace_id::text = $2 AND p.deleted_at IS NULL
               AND COALESCE(p.title, '') ILIKE $3
             ORDER BY p.updated_at DESC
             LIMIT $4",
        )
        .bind(space_id)
        .bind(workspace_id)
        .bind(title_pattern(query))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::db_query("Failed to search pages", e))?;

        rows.into_iter()
            .map(|row| {
                Ok(PageSummary {
                    page_id: row.try_get("page_id").map_err(|e| AppError::db_query("Failed to read page_id", e))?,
                    title: row.try_get("title").map_err(|e| AppError::db_query("Failed to read title", e))?,
                    slug_id: row.try_get("slug_id").map_err(|e| AppError::db_query("Failed to read slug_id", e))?,
                    space_id: row.try_get("space_id").map_err(|e| AppError::db_query("Failed to read space_id", e))?,
                    space_slug: row
                        .try_get("space_slug")
                        .map_err(|e| AppError::db_query("Failed to read space_slug", e))?,
                })
            })
            .collect()
    }
}

/// `ILIKE` pattern matching `query` anywhere, with its wildcards escaped.
fn title_pattern(query: &str) -> String {
    let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}
