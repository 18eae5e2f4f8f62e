use leptos::prelude::*;

use crate::state::AppState;

/// Sidebar showing the session list, "New Chat" and the mode switch.
#[component]
pub fn Sidebar() -> impl IntoView {
    let state = expect_context::<AppState>();

    let on_new = move |_| state.new_chat();

    view! {
        <aside class="sidebar">
            <div class="sidebar-header">
                <h2>"Workspace AI"</h2>
                <button class="new-chat-btn" on:click=on_new>
                    "+ New Chat"
                </button>
                <label class="toggle design-toggle">
                    <input
                        type="checkbox"
                        prop:checked=move || state.design_mode.get()
                        disabled=move || state.is_streaming.get()
                        on:change=move |ev| state.design_mode.set(event_target_checked(&ev))
                    />
                    "Design mode"
                </label>
            </div>
            <div class="session-list">
                {move || {
                    if state.sessions.with(Vec::is_empty) {
                        view! {
                            <div style="padding:1rem;color:var(--text-secondary);font-size:0.85rem">
                                "No sessions yet"
                            </div>
                        }.into_any()
                    } else {
                        view! {
                            <For
                                each=move || state.sessions.get()
                                key=|s| (s.id.clone(), s.title.clone())
                                let:session
                            >
                                {
                                    let id = StoredValue::new(session.id.clone());
                                    view! {
                                        <div
                                            class="session-item"
                                            class:active=move || {
                                                state.active_session.with(|active| {
                                                    active.as_ref().is_some_and(|a| id.with_value(|id| a.id == *id))
                                                })
                                            }
                                            on:click=move |_| state.select_session(id.get_value())
                                        >
                                            <span class="session-title">{session.title.clone()}</span>
                                            <button
                                                class="delete-btn"
                                                title="Delete"
                                                on:click=move |ev| {
                                                    ev.stop_propagation();
                                                    state.delete_session(id.get_value());
                                                }
                                            >
                                                "×"
                                            </button>
                                        </div>
                                    }
                                }
                            </For>
                        }.into_any()
                    }
                }}
            </div>
        </aside>
    }
}
