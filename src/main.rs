mod agent;
mod config;
mod db;
mod errors;
mod models;
mod prompt;
mod provider;
mod retrieval;
mod routes;
mod service;
mod sse;
mod state;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::agent::OllamaCompleter;
use crate::config::AppConfig;
use crate::db::memory::MemoryStore;
use crate::db::{ChatStore, PgStore};
use crate::provider::ProviderRouter;
use crate::retrieval::http::{OllamaEmbedder, SerperSearch};
use crate::retrieval::pgvector::PgPageIndex;
use crate::retrieval::{MemoryPages, Retriever};
use crate::service::chat_service::ChatService;
use crate::service::editor::EditorService;
use crate::service::orchestrator::ChatOrchestrator;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workspace_ai=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "Model table loaded: {} models, default '{}'",
        config.models.routes().len(),
        config.models.default_model()
    );

    let completer = Arc::new(OllamaCompleter::new(config.ollama_base_url(), &config.completion_model)?);

    // ── Storage and retrieval ─────────────────────────────────────────────────
    let (store, retriever): (Arc<dyn ChatStore>, Retriever) = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database connection established and migrations applied");

            let index = Arc::new(PgPageIndex::new(pool.clone()));
            let embedder = Arc::new(OllamaEmbedder::new(config.ollama_base_url(), &config.embedding_model));
            let retriever =
                Retriever::new(index.clone(), completer.clone(), config.top_k).with_semantic(embedder, index);
            (Arc::new(PgStore::new(pool)), retriever)
        }
        None => {
            warn!("DATABASE_URL not set, sessions are kept in memory and page retrieval is disabled");
            let retriever = Retriever::new(Arc::new(MemoryPages::new()), completer.clone(), config.top_k);
            (Arc::new(MemoryStore::new()), retriever)
        }
    };
    let retriever = match config.serper_api_key.as_deref() {
        Some(key) => retriever.with_web_search(Arc::new(SerperSearch::new(key))),
        None => retriever,
    };

    // ── Services ──────────────────────────────────────────────────────────────
    let router = ProviderRouter::from_config(&config);
    let state = AppState {
        chat: ChatService::new(store.clone(), completer),
        orchestrator: ChatOrchestrator::new(
            store,
            retriever.clone(),
            router.clone(),
            config.memory_enabled,
            config.history_limit,
        )
        .with_persona(config.persona.clone()),
        editor: EditorService::new(router),
        pages: retriever,
        models: config.models.clone(),
    };
    let app = routes::router(state);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
