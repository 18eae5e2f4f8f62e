pub mod artifacts;
pub mod chat;
pub mod sidebar;
