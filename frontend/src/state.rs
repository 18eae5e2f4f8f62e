use leptos::prelude::*;
use leptos::task::spawn_local;

use crate::agent_stream::{
    run_payload, AgentStreamParser, Clarification, RunInput, RunOptions, Signal, TaskState, ThreadReconciler, Todo,
};
use crate::api::{self, ByteStream, StreamError, StreamHandle};
use crate::grouping::{group_messages, MessageGroup};
use crate::models::{
    ChatRequest, Message, MessageType, ModelInfo, Role, Session, TurnMessage, UpdateSessionRequest,
    DEFAULT_SESSION_TITLE,
};
use crate::sse::{ChatStreamParser, ChatTurn, TurnProgress};

/// Why a turn ended without an answer.
enum TurnFailure {
    Cancelled,
    Error(String),
}

impl From<StreamError> for TurnFailure {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Cancelled => TurnFailure::Cancelled,
            other => TurnFailure::Error(other.to_string()),
        }
    }
}

fn temp_id(prefix: &str) -> String {
    format!("{prefix}-{}", js_sys::Date::now() as u64)
}

/// Shared application state, provided via Leptos context.
#[derive(Clone, Copy)]
pub struct AppState {
    // --- Read signals (for components to subscribe to) ---
    pub sessions: ReadSignal<Vec<Session>>,
    pub active_session: ReadSignal<Option<Session>>,
    pub messages: ReadSignal<Vec<Message>>,
    /// The simple-protocol turn being streamed, if any.
    pub live_turn: ReadSignal<Option<ChatTurn>>,
    /// Agent output of the design-mode run being streamed.
    pub live_agent: ReadSignal<Vec<Message>>,
    pub is_streaming: ReadSignal<bool>,
    pub error: ReadSignal<Option<String>>,
    pub models: ReadSignal<Vec<ModelInfo>>,
    pub artifacts: ReadSignal<Vec<String>>,
    pub progress: ReadSignal<Vec<(String, TaskState)>>,
    pub todos: ReadSignal<Vec<Todo>>,
    pub clarification: ReadSignal<Option<Clarification>>,
    pub groups: Memo<Vec<MessageGroup>>,

    // --- Write signals (for mutating state) ---
    pub set_sessions: WriteSignal<Vec<Session>>,
    pub set_active_session: WriteSignal<Option<Session>>,
    pub set_messages: WriteSignal<Vec<Message>>,
    pub set_live_turn: WriteSignal<Option<ChatTurn>>,
    pub set_live_agent: WriteSignal<Vec<Message>>,
    pub set_is_streaming: WriteSignal<bool>,
    pub set_error: WriteSignal<Option<String>>,
    pub set_models: WriteSignal<Vec<ModelInfo>>,
    pub set_artifacts: WriteSignal<Vec<String>>,
    pub set_progress: WriteSignal<Vec<(String, TaskState)>>,
    pub set_todos: WriteSignal<Vec<Todo>>,
    pub set_clarification: WriteSignal<Option<Clarification>>,

    // --- Composer options ---
    pub selected_model: RwSignal<Option<String>>,
    pub thinking: RwSignal<bool>,
    pub web_search: RwSignal<bool>,
    pub design_mode: RwSignal<bool>,
    pub selected_page_ids: RwSignal<Vec<String>>,

    stream: StoredValue<Option<StreamHandle>, LocalStorage>,
    /// `None` while a run holds it.
    reconciler: StoredValue<Option<ThreadReconciler>>,
}

impl AppState {
    /// Create a new `AppState` and provide it in the current Leptos context.
    pub fn provide() -> Self {
        let (sessions, set_sessions) = signal(Vec::<Session>::new());
        let (active_session, set_active_session) = signal(Some(Session::local(js_sys::Date::now() as u64)));
        let (messages, set_messages) = signal(Vec::<Message>::new());
        let (live_turn, set_live_turn) = signal(None::<ChatTurn>);
        let (live_agent, set_live_agent) = signal(Vec::<Message>::new());
        let (is_streaming, set_is_streaming) = signal(false);
        let (error, set_error) = signal(None::<String>);
        let (models, set_models) = signal(Vec::<ModelInfo>::new());
        let (artifacts, set_artifacts) = signal(Vec::<String>::new());
        let (progress, set_progress) = signal(Vec::<(String, TaskState)>::new());
        let (todos, set_todos) = signal(Vec::<Todo>::new());
        let (clarification, set_clarification) = signal(None::<Clarification>);

        let groups = Memo::new(move |_| {
            let mut log = messages.get();
            log.extend(live_agent.get());
            group_messages(&log)
        });

        let state = Self {
            sessions,
            active_session,
            messages,
            live_turn,
            live_agent,
            is_streaming,
            error,
            models,
            artifacts,
            progress,
            todos,
            clarification,
            groups,
            set_sessions,
            set_active_session,
            set_messages,
            set_live_turn,
            set_live_agent,
            set_is_streaming,
            set_error,
            set_models,
            set_artifacts,
            set_progress,
            set_todos,
            set_clarification,
            selected_model: RwSignal::new(None),
            thinking: RwSignal::new(false),
            web_search: RwSignal::new(false),
            design_mode: RwSignal::new(false),
            selected_page_ids: RwSignal::new(Vec::new()),
            stream: StoredValue::new_local(None),
            reconciler: StoredValue::new(Some(ThreadReconciler::new())),
        };

        provide_context(state);
        state
    }

    fn fail(self, message: String) {
        log::error!("{message}");
        self.set_error.set(Some(message));
    }

    fn is_active(self, session_id: &str) -> bool {
        self.active_session
            .with_untracked(|s| s.as_ref().is_some_and(|s| s.id == session_id))
    }

    /// Load sessions from the backend.
    pub fn load_sessions(self) {
        spawn_local(async move {
            match api::fetch_sessions().await {
                Ok(sessions) => self.set_sessions.set(sessions),
                Err(e) => self.fail(format!("Failed to fetch sessions: {e}")),
            }
        });
    }

    /// Load the model table and preselect the default model.
    pub fn load_models(self) {
        spawn_local(async move {
            match api::fetch_status().await {
                Ok(status) => {
                    if !status.configured {
                        log::warn!("Backend reports no configured models");
                    }
                    self.selected_model.set(Some(status.default_model));
                    self.set_models.set(status.models);
                }
                Err(e) => self.fail(format!("Failed to fetch model status: {e}")),
            }
        });
    }

    fn reset_thread_view(self) {
        self.reconciler.set_value(Some(ThreadReconciler::new()));
        self.set_live_turn.set(None);
        self.set_live_agent.set(Vec::new());
        self.set_artifacts.set(Vec::new());
        self.set_progress.set(Vec::new());
        self.set_todos.set(Vec::new());
        self.set_clarification.set(None);
        self.set_error.set(None);
    }

    /// Switches to an unsaved placeholder session.
    pub fn new_chat(self) {
        self.stop();
        self.reset_thread_view();
        self.set_messages.set(Vec::new());
        self.selected_page_ids.set(Vec::new());
        self.set_active_session
            .set(Some(Session::local(js_sys::Date::now() as u64)));
    }

    /// Select a session and load its messages.
    pub fn select_session(self, id: String) {
        self.stop();
        self.reset_thread_view();
        spawn_local(async move {
            match api::fetch_session(&id).await {
                Ok(found) => {
                    let thread_id = found.session.thread_id.clone();
                    self.selected_page_ids.set(found.session.selected_page_ids.clone());
                    self.set_active_session.set(Some(found.session));
                    self.set_messages.set(found.messages);
                    if let Some(thread_id) = thread_id {
                        self.restore_thread(&id, &thread_id).await;
                    }
                }
                Err(e) => self.fail(format!("Failed to fetch session: {e}")),
            }
        });
    }

    /// Seeds the reconciler from the agent thread so earlier output and
    /// answered clarifications are not replayed by the next run.
    async fn restore_thread(self, session_id: &str, thread_id: &str) {
        match api::fetch_thread_state(thread_id).await {
            Ok(state) => {
                if !self.is_active(session_id) {
                    return;
                }
                let reconciler = ThreadReconciler::restore(state);
                self.set_artifacts.set(reconciler.artifacts().to_vec());
                self.set_todos.set(reconciler.todos().to_vec());
                self.set_clarification.set(reconciler.pending_clarification().cloned());
                self.reconciler.set_value(Some(reconciler));
            }
            Err(e) => log::warn!("Failed to load agent thread {thread_id}: {e}"),
        }
    }

    pub fn delete_session(self, id: String) {
        spawn_local(async move {
            match api::delete_session(&id).await {
                Ok(()) => {
                    self.set_sessions.update(|list| list.retain(|s| s.id != id));
                    if self.is_active(&id) {
                        self.new_chat();
                    }
                }
                Err(e) => self.fail(format!("Failed to delete session: {e}")),
            }
        });
    }

    /// Cancels the stream in flight, if any.
    pub fn stop(self) {
        self.stream.with_value(|handle| {
            if let Some(handle) = handle {
                handle.cancel();
            }
        });
    }

    /// Persists the placeholder session on first use.
    async fn ensure_session(self) -> Result<Session, String> {
        match self.active_session.get_untracked() {
            Some(session) if !session.is_local() => Ok(session),
            _ => {
                let session = api::create_session().await?;
                self.set_active_session.set(Some(session.clone()));
                self.set_sessions.update(|list| list.insert(0, session.clone()));
                Ok(session)
            }
        }
    }

    fn begin_stream(self) -> Result<StreamHandle, String> {
        let handle = StreamHandle::new().map_err(|e| e.to_string())?;
        self.stream.set_value(Some(handle.clone()));
        Ok(handle)
    }

    /// Sends `text` in the current mode.
    pub fn send_message(self, text: String) {
        if self.is_streaming.get_untracked() {
            return;
        }
        self.set_error.set(None);
        self.set_is_streaming.set(true);
        if self.design_mode.get_untracked() {
            spawn_local(self.run_design_turn(text));
        } else {
            spawn_local(self.run_chat_turn(Some(text)));
        }
    }

    /// Rewrites a sent message: the server log is truncated from it and the
    /// edited text is streamed as a fresh turn.
    pub fn edit_and_resend(self, message_id: String, text: String) {
        if self.is_streaming.get_untracked() {
            return;
        }
        let Some(session) = self.active_session.get_untracked().filter(|s| !s.is_local()) else {
            return;
        };
        let Some(pos) = self
            .messages
            .with_untracked(|log| log.iter().position(|m| m.id == message_id))
        else {
            return;
        };
        self.set_error.set(None);
        self.set_is_streaming.set(true);
        spawn_local(async move {
            if let Err(e) = api::truncate_messages(&session.id, &message_id).await {
                self.fail(format!("Failed to truncate session: {e}"));
                self.set_is_streaming.set(false);
                return;
            }
            self.set_messages.update(|log| log.truncate(pos));
            self.run_chat_turn(Some(text)).await;
        });
    }

    /// Streams a new answer to the last user message.
    pub fn regenerate(self) {
        if self.is_streaming.get_untracked() {
            return;
        }
        let Some(session) = self.active_session.get_untracked().filter(|s| !s.is_local()) else {
            return;
        };
        let Some((pos, first_reply)) = self.messages.with_untracked(|log| {
            let last_user = log.iter().rposition(|m| m.role == Role::User)?;
            log.get(last_user + 1).map(|m| (last_user + 1, m.id.clone()))
        }) else {
            return;
        };
        self.set_error.set(None);
        self.set_is_streaming.set(true);
        spawn_local(async move {
            if let Err(e) = api::truncate_messages(&session.id, &first_reply).await {
                self.fail(format!("Failed to truncate session: {e}"));
                self.set_is_streaming.set(false);
                return;
            }
            self.set_messages.update(|log| log.truncate(pos));
            self.run_chat_turn(None).await;
        });
    }

    /// One simple-protocol turn. `None` re-answers the stored user message.
    async fn run_chat_turn(self, text: Option<String>) {
        let before = self.messages.get_untracked();
        let session = match self.ensure_session().await {
            Ok(session) => session,
            Err(e) => {
                self.fail(format!("Failed to create session: {e}"));
                self.set_is_streaming.set(false);
                return;
            }
        };

        let skip_user_persist = text.is_none();
        if let Some(text) = text {
            let user = Message::new(temp_id("user"), session.id.clone(), Role::User, text);
            self.set_messages.update(|log| log.push(user));
        }
        let request = ChatRequest {
            messages: self.messages.with_untracked(|log| {
                log.iter()
                    .filter(|m| m.message_type == MessageType::Chat)
                    .map(TurnMessage::from)
                    .collect()
            }),
            session_id: Some(session.id.clone()),
            model: self.selected_model.get_untracked(),
            thinking: self.thinking.get_untracked(),
            selected_page_ids: self.selected_page_ids.get_untracked(),
            is_web_search_enabled: self.web_search.get_untracked(),
            skip_user_persist,
        };

        let result = match self.begin_stream() {
            Ok(handle) => {
                self.set_live_turn.set(Some(ChatTurn::new()));
                match api::stream_chat(&request, &handle).await {
                    Ok(stream) => consume_chat(stream, self.set_live_turn).await,
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(TurnFailure::Error(e)),
        };
        self.stream.set_value(None);
        self.set_live_turn.set(None);

        match result {
            Ok(turn) => {
                let thinking = turn.thinking();
                let mut reply = Message::new(temp_id("assistant"), session.id.clone(), Role::Assistant, turn.content);
                reply.thinking = thinking;
                reply.sources = turn.sources;
                if self.is_active(&session.id) {
                    self.set_messages.update(|log| log.push(reply));
                }
                self.set_is_streaming.set(false);
                self.after_answer(session, None).await;
            }
            Err(TurnFailure::Cancelled) => {
                log::info!("Chat turn cancelled");
                if self.is_active(&session.id) {
                    self.set_messages.set(before);
                }
                self.set_is_streaming.set(false);
            }
            Err(TurnFailure::Error(e)) => {
                if self.is_active(&session.id) {
                    self.set_messages.set(before);
                }
                self.fail(e);
                self.set_is_streaming.set(false);
            }
        }
    }

    /// One design-mode run against the agent runtime.
    async fn run_design_turn(self, text: String) {
        let before = self.messages.get_untracked();
        let session = match self.ensure_session().await {
            Ok(session) => session,
            Err(e) => {
                self.fail(format!("Failed to create session: {e}"));
                self.set_is_streaming.set(false);
                return;
            }
        };
        let mut taken = None;
        self.reconciler.update_value(|r| taken = r.take());
        let Some(mut reconciler) = taken else {
            self.fail("A design run is already active".to_string());
            self.set_is_streaming.set(false);
            return;
        };

        let input = reconciler.input_for(text.clone());
        let (session, thread_id, input) = match self.prepare_thread(session, input).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.reconciler.set_value(Some(reconciler));
                self.fail(format!("Failed to start agent thread: {e}"));
                self.set_is_streaming.set(false);
                return;
            }
        };
        let user = Message::new(temp_id("user"), session.id.clone(), Role::User, text);
        self.set_messages.update(|log| log.push(user.clone()));
        self.set_clarification.set(None);
        self.set_progress.set(Vec::new());

        reconciler.begin_run();
        let options = RunOptions {
            model_name: self.selected_model.get_untracked(),
            thinking_enabled: self.thinking.get_untracked(),
        };
        let result = match self.begin_stream() {
            Ok(handle) => match api::stream_run(&thread_id, &run_payload(&input, &thread_id, &options), &handle).await {
                Ok(stream) => self.consume_run(stream, &mut reconciler, &session.id).await,
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(TurnFailure::Error(e)),
        };
        self.stream.set_value(None);
        self.set_live_agent.set(Vec::new());

        let outcome = match result {
            Ok(()) => reconciler.finish(&session.id),
            Err(failure) => {
                reconciler.cancel();
                if self.is_active(&session.id) {
                    self.set_messages.set(before);
                }
                match failure {
                    TurnFailure::Cancelled => log::info!("Design run cancelled"),
                    TurnFailure::Error(e) => self.fail(e),
                }
                None
            }
        };

        // a session switch has already installed a fresh reconciler
        if self.is_active(&session.id) {
            self.reconciler.set_value(Some(reconciler));
        }

        let Some(outcome) = outcome else {
            self.set_is_streaming.set(false);
            return;
        };
        if self.is_active(&session.id) {
            self.set_messages.update(|log| log.extend(outcome.messages.iter().cloned()));
            self.set_clarification.set(outcome.clarification);
            self.set_artifacts.set(outcome.artifacts);
        }
        self.set_is_streaming.set(false);

        // the answer is already on screen; storage failures are only logged
        for message in std::iter::once(&user).chain(&outcome.messages) {
            if message.message_type == MessageType::Chat && message.content.trim().is_empty() {
                continue;
            }
            if let Err(e) = api::add_message(&session.id, message).await {
                log::warn!("Failed to persist design message: {e}");
            }
        }
        self.after_answer(session, outcome.title).await;
    }

    /// Binds the session to an agent thread, creating one on first use.
    /// The first message of a new thread is refined into an objective.
    async fn prepare_thread(self, session: Session, input: RunInput) -> Result<(Session, String, RunInput), String> {
        if let Some(thread_id) = session.thread_id.clone() {
            return Ok((session, thread_id, input));
        }
        let thread_id = api::create_thread().await?;
        let update = UpdateSessionRequest { thread_id: Some(thread_id.clone()), ..Default::default() };
        let session = api::update_session(&session.id, &update).await?;
        self.set_active_session.set(Some(session.clone()));

        let input = match input {
            RunInput::Message(text) => match api::clarify_objective(&text).await {
                Ok(refined) => RunInput::Message(refined.objective),
                Err(e) => {
                    log::warn!("Objective refinement failed, sending the message as is: {e}");
                    RunInput::Message(text)
                }
            },
            resume => resume,
        };
        Ok((session, thread_id, input))
    }

    async fn consume_run(
        self,
        mut stream: ByteStream,
        reconciler: &mut ThreadReconciler,
        session_id: &str,
    ) -> Result<(), TurnFailure> {
        let mut parser = AgentStreamParser::new();
        while let Some(bytes) = stream.next_chunk().await? {
            for event in parser.push(&bytes) {
                for signal in reconciler.apply(event) {
                    match signal {
                        Signal::Clarification(c) => {
                            log::info!("Agent requested clarification ({})", c.key);
                            self.set_clarification.set(Some(c));
                        }
                        Signal::Artifacts(files) => self.set_artifacts.set(files),
                        Signal::Title(title) => log::debug!("Agent titled the thread '{title}'"),
                        Signal::Progress { .. } => self.set_progress.set(
                            reconciler.progress().iter().map(|(id, state)| (id.clone(), *state)).collect(),
                        ),
                        Signal::Failed(message) => return Err(TurnFailure::Error(message)),
                    }
                }
            }
            self.set_live_agent.set(reconciler.run_messages(session_id));
            if self.todos.with_untracked(|todos| todos.as_slice() != reconciler.todos()) {
                self.set_todos.set(reconciler.todos().to_vec());
            }
        }
        Ok(())
    }

    /// Reloads the log with server ids and names the session if it still has the default title.
    async fn after_answer(self, session: Session, suggested_title: Option<String>) {
        if self.is_active(&session.id) && !self.is_streaming.get_untracked() {
            match api::fetch_session(&session.id).await {
                Ok(found) => self.set_messages.set(found.messages),
                Err(e) => log::warn!("Failed to reload session: {e}"),
            }
        }

        if session.title == DEFAULT_SESSION_TITLE {
            let renamed = match suggested_title {
                Some(title) => {
                    let update = UpdateSessionRequest { title: Some(title), ..Default::default() };
                    api::update_session(&session.id, &update).await
                }
                None => api::auto_title(&session.id).await,
            };
            match renamed {
                Ok(updated) => {
                    if self.is_active(&updated.id) {
                        self.set_active_session.set(Some(updated));
                    }
                }
                Err(e) => log::warn!("Failed to title session: {e}"),
            }
        }
        self.load_sessions();
    }
}

/// Drives one chat stream to its end. The turn is owned by this loop; the
/// signal only receives copies for display.
async fn consume_chat(mut stream: ByteStream, live: WriteSignal<Option<ChatTurn>>) -> Result<ChatTurn, TurnFailure> {
    let mut parser = ChatStreamParser::new();
    let mut turn = ChatTurn::new();
    while let Some(bytes) = stream.next_chunk().await? {
        for frame in parser.push(&bytes) {
            match turn.apply(frame) {
                TurnProgress::Streaming => {}
                TurnProgress::Completed => return Ok(turn),
                TurnProgress::Failed(message) => return Err(TurnFailure::Error(message)),
            }
        }
        live.set(Some(turn.clone()));
    }
    Err(TurnFailure::Error("The answer stream ended unexpectedly".to_string()))
}
