mod agent_stream;
mod api;
mod artifacts;
mod components;
mod grouping;
mod models;
mod sse;
mod state;

use leptos::prelude::*;
use leptos::mount::mount_to_body;

use components::artifacts::ArtifactPanel;
use components::chat::ChatArea;
use components::sidebar::Sidebar;
use state::AppState;

/// Root application component.
#[component]
fn App() -> impl IntoView {
    let state = AppState::provide();

    state.load_models();
    state.load_sessions();

    view! {
        <div class="app-container">
            <Sidebar />
            <ChatArea />
            <ArtifactPanel />
        </div>
    }
}

fn main() {
    console_log::init_with_level(log::Level::Debug).expect("Failed to init logger");
    mount_to_body(App);
}
