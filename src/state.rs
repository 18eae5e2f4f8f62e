use crate::config::ModelTable;
use crate::retrieval::Retriever;
use crate::service::chat_service::ChatService;
use crate::service::editor::EditorService;
use crate::service::orchestrator::ChatOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub orchestrator: ChatOrchestrator,
    pub editor: EditorService,
    /// Page lookups for the context picker.
    pub pages: Retriever,
    pub models: ModelTable,
}
