use leptos::ev;
use leptos::prelude::*;

use crate::agent_stream::TaskState;
use crate::components::artifacts::ArtifactCard;
use crate::grouping::{MessageGroup, Subtask, SubtaskStatus};
use crate::models::{Message, Role, Source, DEFAULT_SESSION_TITLE};
use crate::sse::ChatTurn;
use crate::state::AppState;

/// Main chat area with grouped history, the live turn, and input.
#[component]
pub fn ChatArea() -> impl IntoView {
    let state = expect_context::<AppState>();

    view! {
        <main class="chat-area">
            // Error banner
            {move || {
                state.error.get().map(|err| {
                    view! {
                        <div class="error-banner">{err}</div>
                    }
                })
            }}

            <ChatHeader />

            // Messages
            <div class="messages-container">
                {move || {
                    let groups = state.groups.get();
                    if groups.is_empty() && state.live_turn.with(Option::is_none) {
                        view! {
                            <div class="empty-state">
                                "Send a message to start chatting"
                            </div>
                        }.into_any()
                    } else {
                        view! {
                            {groups
                                .into_iter()
                                .map(|group| view! { <GroupView group=group /> })
                                .collect_view()}
                            {move || state.live_turn.get().map(|turn| view! { <LiveTurn turn=turn /> })}
                        }.into_any()
                    }
                }}
            </div>

            <TaskProgress />
            <ClarificationNotice />
            <ChatInput />
        </main>
    }
}

/// Session title and per-turn options.
#[component]
fn ChatHeader() -> impl IntoView {
    let state = expect_context::<AppState>();

    let title = move || {
        state
            .active_session
            .get()
            .map(|s| s.title)
            .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string())
    };
    let supports_thinking = move || {
        let selected = state.selected_model.get();
        state.models.with(|models| {
            models
                .iter()
                .any(|m| m.supports_thinking && selected.as_deref() == Some(m.id.as_str()))
        })
    };

    view! {
        <div class="chat-header">
            <span class="chat-title">{title}</span>
            <select
                class="model-select"
                on:change=move |ev| state.selected_model.set(Some(event_target_value(&ev)))
            >
                {move || {
                    state.models.get().into_iter().map(|m| {
                        let selected = state.selected_model.get().as_deref() == Some(m.id.as_str());
                        view! { <option value=m.id.clone() selected=selected>{m.label}</option> }
                    }).collect_view()
                }}
            </select>
            <label class="toggle">
                <input
                    type="checkbox"
                    prop:checked=move || state.thinking.get()
                    disabled=move || !supports_thinking()
                    on:change=move |ev| state.thinking.set(event_target_checked(&ev))
                />
                "Thinking"
            </label>
            <label class="toggle">
                <input
                    type="checkbox"
                    prop:checked=move || state.web_search.get()
                    on:change=move |ev| state.web_search.set(event_target_checked(&ev))
                />
                "Web search"
            </label>
        </div>
    }
}

#[component]
fn GroupView(group: MessageGroup) -> impl IntoView {
    let anchor = group.id().to_string();
    let body = match group {
        MessageGroup::Human { messages, .. } => view! {
            <div class="message user">
                {messages.into_iter().map(|m| view! { <UserMessage message=m /> }).collect_view()}
            </div>
        }
        .into_any(),
        MessageGroup::AssistantMessage { messages, .. } => view! {
            <div class="message assistant">
                {messages.into_iter().map(|m| view! { <AssistantText message=m /> }).collect_view()}
            </div>
        }
        .into_any(),
        MessageGroup::Processing { trigger, tool_results, result, .. } => {
            let tools = trigger
                .tool_calls
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            // no reply yet means still running
            let status = if result.is_some() { "done" } else { "working…" };
            view! {
                <div class="message assistant processing">
                    <details>
                        <summary>{format!("Used {tools}")}" "<span class="tool-status">{status}</span></summary>
                        {tool_results
                            .into_iter()
                            .map(|m| view! { <pre class="tool-result">{m.content}</pre> })
                            .collect_view()}
                    </details>
                    {result.map(|m| view! { <AssistantText message=m /> })}
                </div>
            }
            .into_any()
        }
        MessageGroup::Clarification { message, .. } => view! {
            <div class="message assistant clarification">
                <div class="role-label">"question"</div>
                <div>{message.content}</div>
            </div>
        }
        .into_any(),
        MessageGroup::PresentFiles { files, result, .. } => view! {
            <div class="message assistant files">
                {files.into_iter().map(|path| view! { <ArtifactCard path=path /> }).collect_view()}
                {result.map(|m| view! { <AssistantText message=m /> })}
            </div>
        }
        .into_any(),
        MessageGroup::Subagent { tasks, result, .. } => view! {
            <div class="message assistant subagents">
                {tasks.into_iter().map(|task| view! { <SubtaskRow task=task /> }).collect_view()}
                {result.map(|m| view! { <AssistantText message=m /> })}
            </div>
        }
        .into_any(),
    };
    view! { <div class="group" id=anchor>{body}</div> }
}

/// A sent message, editable until the next turn starts.
#[component]
fn UserMessage(message: Message) -> impl IntoView {
    let state = expect_context::<AppState>();
    let editing = RwSignal::new(false);
    let draft = RwSignal::new(message.content.clone());
    let id = StoredValue::new(message.id.clone());
    let content = message.content.clone();

    let resend = move |_| {
        let text = draft.get_untracked().trim().to_string();
        if text.is_empty() {
            return;
        }
        editing.set(false);
        state.edit_and_resend(id.get_value(), text);
    };
    let can_edit = move || !state.is_streaming.get() && !state.design_mode.get();

    view! {
        <Show
            when=move || editing.get()
            fallback=move || view! {
                <div class="user-message">
                    <div class="role-label">"you"</div>
                    <div>{content.clone()}</div>
                    <Show when=can_edit>
                        <button class="edit-btn" on:click=move |_| editing.set(true)>"Edit"</button>
                    </Show>
                </div>
            }
        >
            <div class="user-message editing">
                <textarea
                    prop:value=move || draft.get()
                    on:input=move |ev| draft.set(event_target_value(&ev))
                />
                <button class="send-btn" on:click=resend>"Resend"</button>
                <button on:click=move |_| editing.set(false)>"Cancel"</button>
            </div>
        </Show>
    }
}

#[component]
fn AssistantText(message: Message) -> impl IntoView {
    view! {
        <div class="assistant-message">
            <div class="role-label">"assistant"</div>
            {message.thinking.map(|thinking| view! {
                <details class="thinking">
                    <summary>"Reasoning"</summary>
                    <pre>{thinking}</pre>
                </details>
            })}
            <div class="content">{message.content}</div>
            <SourceList sources=message.sources />
        </div>
    }
}

/// The turn being streamed (assistant typing).
#[component]
fn LiveTurn(turn: ChatTurn) -> impl IntoView {
    let thinking = turn.thinking();
    let memory = turn.memory.filter(|m| m.enabled).map(|m| if m.loaded { "memory loaded" } else { "memory on" });
    view! {
        <div class="message assistant">
            <div class="role-label">"assistant"</div>
            {memory.map(|label| view! { <span class="memory-badge">{label}</span> })}
            {thinking.map(|t| view! { <pre class="thinking live">{t}</pre> })}
            <div class="streaming-cursor">{turn.content}</div>
            <SourceList sources=turn.sources />
        </div>
    }
}

#[component]
fn SourceList(sources: Vec<Source>) -> impl IntoView {
    (!sources.is_empty()).then(|| {
        view! {
            <ol class="sources">
                {sources.into_iter().map(|source| {
                    let label = format!("{} ({:.0}%)", source.title, source.similarity * 100.0);
                    match source.url {
                        Some(url) => view! { <li><a href=url target="_blank">{label}</a></li> }.into_any(),
                        None => view! { <li title=source.excerpt>{label}</li> }.into_any(),
                    }
                }).collect_view()}
            </ol>
        }
    })
}

#[component]
fn SubtaskRow(task: Subtask) -> impl IntoView {
    let (class, label) = match task.status {
        SubtaskStatus::InProgress => ("subtask running", "running"),
        SubtaskStatus::Completed => ("subtask done", "done"),
        SubtaskStatus::Error => ("subtask failed", "failed"),
    };
    view! {
        <details class=class>
            <summary>{format!("{}: {}", task.subagent_type, task.description)}" "<span>{label}</span></summary>
            <pre>{task.prompt}</pre>
            {task.result.map(|r| view! { <pre class="tool-result">{r}</pre> })}
        </details>
    }
}

/// Live sub-task states and the agent's todo list.
#[component]
fn TaskProgress() -> impl IntoView {
    let state = expect_context::<AppState>();
    let todos = move || {
        let todos = state.todos.get();
        (!todos.is_empty()).then(|| {
            view! {
                <ul class="todos">
                    {todos.into_iter().map(|todo| {
                        view! { <li class=format!("todo {}", todo.status)>{todo.content}</li> }
                    }).collect_view()}
                </ul>
            }
        })
    };
    let tasks = move || {
        let progress = state.progress.get();
        (!progress.is_empty()).then(|| {
            view! {
                <ul class="task-progress">
                    {progress.into_iter().map(|(task_id, task_state)| {
                        let label = match task_state {
                            TaskState::Running => "running",
                            TaskState::Complete => "complete",
                            TaskState::Error => "error",
                        };
                        view! { <li>{format!("{task_id}: {label}")}</li> }
                    }).collect_view()}
                </ul>
            }
        })
    };
    view! { {todos} {tasks} }
}

#[component]
fn ClarificationNotice() -> impl IntoView {
    let state = expect_context::<AppState>();
    move || {
        state.clarification.get().map(|c| {
            view! {
                <div class="clarification-banner">
                    <strong>"The agent needs more information: "</strong>
                    {c.question}
                </div>
            }
        })
    }
}

/// Chat input form with textarea and send/stop buttons.
#[component]
fn ChatInput() -> impl IntoView {
    let state = expect_context::<AppState>();
    let (input, set_input) = signal(String::new());

    let is_sending = move || state.is_streaming.get();

    let send = move || {
        let text = input.get_untracked().trim().to_string();
        if text.is_empty() || state.is_streaming.get_untracked() {
            return;
        }
        set_input.set(String::new());
        state.send_message(text);
    };

    let on_keydown = move |ev: ev::KeyboardEvent| {
        if ev.key() == "Enter" && !ev.shift_key() {
            ev.prevent_default();
            send();
        }
    };

    let placeholder = move || {
        if state.clarification.with(Option::is_some) {
            "Answer the agent's question…"
        } else {
            "Type a message… (Enter to send, Shift+Enter for newline)"
        }
    };
    let can_regenerate = move || {
        !is_sending()
            && !state.design_mode.get()
            && state.messages.with(|log| log.last().is_some_and(|m| m.role == Role::Assistant))
    };

    view! {
        <div class="input-area">
            <div class="input-row">
                <textarea
                    rows="1"
                    placeholder=placeholder
                    prop:value=input
                    on:input=move |ev| {
                        set_input.set(event_target_value(&ev));
                    }
                    on:keydown=on_keydown
                    disabled=is_sending
                />
                {move || {
                    if is_sending() {
                        view! {
                            <button class="stop-btn" on:click=move |_| state.stop()>"Stop"</button>
                        }.into_any()
                    } else {
                        view! {
                            <button
                                class="send-btn"
                                on:click=move |_| send()
                                disabled=move || input.get().trim().is_empty()
                            >
                                "Send"
                            </button>
                        }.into_any()
                    }
                }}
                <Show when=can_regenerate>
                    <button class="regenerate-btn" on:click=move |_| state.regenerate()>"Regenerate"</button>
                </Show>
            </div>
        </div>
    }
}
