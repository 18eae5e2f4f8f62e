pub mod chat_service;
pub mod editor;
pub mod orchestrator;
