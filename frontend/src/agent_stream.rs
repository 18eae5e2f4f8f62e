//! Reconciliation of the agent runtime's run stream.
//!
//! The runtime multiplexes three families of events over one SSE body:
//! full state snapshots (`values`), per-message deltas (`messages`), and
//! sub-task progress (`custom`). [`AgentStreamParser`] turns bytes into
//! [`AgentEvent`]s and [`ThreadReconciler`] folds them into one transcript,
//! emitting [`Signal`]s for the side channels (clarifications, artifacts,
//! title, progress).
//!
//! A reconciler lives as long as its thread, so clarifications already
//! surfaced stay suppressed when later snapshots repeat them.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::models::{Message, MessageType, Role, ToolCall, ToolStatus, CLARIFICATION_TOOL};
use crate::sse::{LineSplitter, SseLine};

pub const ASSISTANT_ID: &str = "lead_agent";
pub const STREAM_MODES: [&str; 3] = ["values", "messages", "custom"];
const RECURSION_LIMIT: u32 = 1000;

// ── Wire types ──────────────────────────────────────────────────────────────

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AgentToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// A message as the runtime serializes it, in snapshots and in deltas.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AgentMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", alias = "role", default)]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub tool_calls: Vec<AgentToolCall>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub additional_kwargs: Value,
}

impl AgentMessage {
    fn is_ai(&self) -> bool {
        matches!(self.kind.as_str(), "ai" | "AIMessageChunk" | "assistant")
    }

    fn is_human(&self) -> bool {
        matches!(self.kind.as_str(), "human" | "user")
    }

    fn is_tool(&self) -> bool {
        matches!(self.kind.as_str(), "tool" | "ToolMessageChunk")
    }

    /// Text content: a plain string, or the first text block of a block list.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .and_then(|b| b.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }

    pub fn reasoning(&self) -> &str {
        self.additional_kwargs
            .get("reasoning_content")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Todo {
    pub content: String,
    #[serde(default)]
    pub status: String,
}

/// Graph state. Absent fields leave the previous value in place.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StateSnapshot {
    #[serde(default)]
    pub messages: Option<Vec<AgentMessage>>,
    #[serde(default)]
    pub artifacts: Option<Vec<String>>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub todos: Option<Vec<Todo>>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressSignal {
    #[serde(alias = "task_started")]
    TaskRunning {
        task_id: String,
        #[serde(default)]
        message: Option<Value>,
    },
    #[serde(alias = "task_completed")]
    TaskComplete {
        task_id: String,
        #[serde(default)]
        result: Option<String>,
    },
    #[serde(alias = "task_failed")]
    TaskError {
        task_id: String,
        #[serde(default)]
        error: Option<String>,
    },
}

/// How message payloads merge with what is already accumulated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Merge {
    /// Token deltas, appended.
    Delta,
    /// The message so far, replacing the accumulated text.
    Cumulative,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    Values(StateSnapshot),
    Messages(Vec<AgentMessage>, Merge),
    Custom(ProgressSignal),
    Error(String),
    End,
}

// ── Parsing ─────────────────────────────────────────────────────────────────

/// Decodes the runtime's SSE body. Both `event:` lines and
/// `[event, payload]` tuples name the event family.
#[derive(Debug, Default)]
pub struct AgentStreamParser {
    lines: LineSplitter,
    event: Option<String>,
}

impl AgentStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(bytes) {
            match line {
                SseLine::Event(name) => self.event = Some(name),
                SseLine::Data(payload) => events.extend(self.decode(&payload)),
                SseLine::Dispatch => self.event = None,
            }
        }
        events
    }

    fn decode(&self, payload: &str) -> Option<AgentEvent> {
        if payload == "[DONE]" {
            return None;
        }
        let parsed: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Skipping malformed agent frame: {e}");
                return None;
            }
        };
        match parsed {
            Value::Array(mut pair) if pair.len() == 2 && pair[0].is_string() => {
                let data = pair.pop().unwrap_or_default();
                let kind = pair.pop().and_then(|k| k.as_str().map(str::to_string)).unwrap_or_default();
                classify(&kind, data)
            }
            data => classify(self.event.as_deref().unwrap_or_default(), data),
        }
    }
}

fn classify(kind: &str, data: Value) -> Option<AgentEvent> {
    let result = match kind {
        "values" => serde_json::from_value(data).map(AgentEvent::Values),
        // [chunk, metadata]
        "messages" => {
            let chunk = match data {
                Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
                other => other,
            };
            serde_json::from_value(chunk).map(|m| AgentEvent::Messages(vec![m], Merge::Delta))
        }
        "messages/partial" | "messages/complete" => {
            let items = match data {
                Value::Array(items) => items,
                other => vec![other],
            };
            serde_json::from_value(Value::Array(items)).map(|ms| AgentEvent::Messages(ms, Merge::Cumulative))
        }
        "custom" => serde_json::from_value(data).map(AgentEvent::Custom),
        "error" => {
            let message = data
                .get("message")
                .or_else(|| data.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| data.to_string());
            return Some(AgentEvent::Error(message));
        }
        "end" => return Some(AgentEvent::End),
        "metadata" | "updates" | "debug" | "tasks" | "checkpoints" | "messages/metadata" => {
            log::debug!("Ignoring agent event '{kind}'");
            return None;
        }
        _ => {
            log::warn!("Dropping unknown agent event '{kind}'");
            return None;
        }
    };
    match result {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("Dropping undecodable '{kind}' event: {e}");
            None
        }
    }
}

// ── Reconciliation ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Human,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TranscriptEntry {
    pub id: String,
    pub kind: EntryKind,
    pub content: String,
    pub reasoning: String,
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub failed: bool,
}

impl TranscriptEntry {
    fn from_agent(msg: &AgentMessage, fallback_id: String) -> Option<Self> {
        let kind = if msg.is_human() {
            EntryKind::Human
        } else if msg.is_ai() {
            EntryKind::Assistant
        } else if msg.is_tool() {
            EntryKind::Tool
        } else {
            return None;
        };
        Some(Self {
            id: msg.id.clone().unwrap_or(fallback_id),
            kind,
            content: msg.text(),
            reasoning: msg.reasoning().to_string(),
            name: msg.name.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|c| ToolCall {
                    id: c.id.clone().unwrap_or_default(),
                    name: c.name.clone(),
                    args: c.args.clone(),
                })
                .collect(),
            failed: msg.status.as_deref() == Some("error"),
        })
    }

    /// The entry in persisted message shape.
    pub fn to_message(&self, session_id: &str) -> Message {
        let role = match self.kind {
            EntryKind::Human => Role::User,
            EntryKind::Assistant | EntryKind::Tool => Role::Assistant,
        };
        let mut message = Message::new(self.id.clone(), session_id.to_string(), role, self.content.clone());
        match self.kind {
            EntryKind::Assistant if !self.tool_calls.is_empty() => {
                message.message_type = MessageType::ToolUse;
                message.tool_calls = self.tool_calls.clone();
            }
            EntryKind::Tool => {
                message.message_type = MessageType::ToolResult;
                message.tool_call_id = self.tool_call_id.clone();
                message.tool_name = self.name.clone();
                message.tool_status = Some(if self.failed { ToolStatus::Error } else { ToolStatus::Success });
            }
            _ => {}
        }
        if !self.reasoning.is_empty() {
            message.thinking = Some(self.reasoning.clone());
        }
        message
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clarification {
    pub key: String,
    pub question: String,
}

fn clarification_in(msg: &AgentMessage) -> Option<Clarification> {
    if !msg.is_tool() || msg.name.as_deref() != Some(CLARIFICATION_TOOL) {
        return None;
    }
    let question = msg.text();
    if question.is_empty() {
        return None;
    }
    // keyed on message id, then tool call id
    let key = msg
        .id
        .clone()
        .or_else(|| msg.tool_call_id.clone())
        .unwrap_or_else(|| question.clone());
    Some(Clarification { key, question })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Complete,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    Clarification(Clarification),
    Artifacts(Vec<String>),
    Title(String),
    Progress { task_id: String, state: TaskState },
    Failed(String),
}

/// What the next run sends: a fresh message, or the answer to a pending clarification.
#[derive(Clone, Debug, PartialEq)]
pub enum RunInput {
    Message(String),
    Resume(String),
}

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub model_name: Option<String>,
    pub thinking_enabled: bool,
}

/// Body of `POST /threads/{thread_id}/runs/stream`.
pub fn run_payload(input: &RunInput, thread_id: &str, options: &RunOptions) -> Value {
    let mut payload = json!({
        "assistant_id": ASSISTANT_ID,
        "stream_mode": STREAM_MODES,
        "config": {
            "recursion_limit": RECURSION_LIMIT,
            "configurable": {
                "thread_id": thread_id,
                "thinking_enabled": options.thinking_enabled,
                "is_plan_mode": true,
            },
        },
    });
    if let Some(model) = &options.model_name {
        payload["config"]["configurable"]["model_name"] = json!(model);
    }
    match input {
        RunInput::Message(text) => payload["input"] = json!({ "messages": [{ "role": "user", "content": text }] }),
        RunInput::Resume(answer) => payload["command"] = json!({ "resume": answer }),
    }
    payload
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum RunState {
    #[default]
    Idle,
    Streaming,
    Cancelled,
    Failed,
    Finished,
}

/// Result of a run that ended normally.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    /// Agent output of this run, in transcript order.
    pub messages: Vec<Message>,
    pub artifacts: Vec<String>,
    pub title: Option<String>,
    pub clarification: Option<Clarification>,
}

#[derive(Debug, Default)]
pub struct ThreadReconciler {
    transcript: Vec<TranscriptEntry>,
    before_run: Vec<TranscriptEntry>,
    artifacts: Vec<String>,
    title: Option<String>,
    todos: Vec<Todo>,
    progress: BTreeMap<String, TaskState>,
    seen_clarifications: HashSet<String>,
    pending: Option<Clarification>,
    state: RunState,
}

impl ThreadReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a thread from its stored state. Clarifications already in the
    /// history count as seen; a trailing one is left pending.
    pub fn restore(snapshot: StateSnapshot) -> Self {
        let mut reconciler = Self::new();
        let messages = snapshot.messages.clone().unwrap_or_default();
        for msg in &messages {
            if let Some(clarification) = clarification_in(msg) {
                reconciler.seen_clarifications.insert(clarification.key);
            }
        }
        reconciler.pending = messages.last().and_then(clarification_in);
        reconciler.apply_snapshot(snapshot);
        reconciler
    }

    /// Starts a run. A pending clarification is consumed by either input kind.
    pub fn begin_run(&mut self) {
        self.before_run = self.transcript.clone();
        self.progress.clear();
        self.pending = None;
        self.state = RunState::Streaming;
    }

    pub fn pending_clarification(&self) -> Option<&Clarification> {
        self.pending.as_ref()
    }

    /// The next input for `text`, resuming when a clarification is pending.
    pub fn input_for(&self, text: String) -> RunInput {
        if self.pending.is_some() {
            RunInput::Resume(text)
        } else {
            RunInput::Message(text)
        }
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn artifacts(&self) -> &[String] {
        &self.artifacts
    }

    pub fn todos(&self) -> &[Todo] {
        &self.todos
    }

    pub fn progress(&self) -> &BTreeMap<String, TaskState> {
        &self.progress
    }

    /// Agent output accumulated since the run began.
    pub fn run_messages(&self, session_id: &str) -> Vec<Message> {
        let earlier: HashSet<&str> = self.before_run.iter().map(|e| e.id.as_str()).collect();
        self.transcript
            .iter()
            .filter(|e| e.kind != EntryKind::Human && !earlier.contains(e.id.as_str()))
            .map(|e| e.to_message(session_id))
            .collect()
    }

    pub fn apply(&mut self, event: AgentEvent) -> Vec<Signal> {
        if self.state != RunState::Streaming {
            log::debug!("Ignoring agent event outside an active run");
            return Vec::new();
        }
        match event {
            AgentEvent::Values(snapshot) => self.apply_snapshot(snapshot),
            AgentEvent::Messages(messages, merge) => {
                for msg in &messages {
                    self.apply_message(msg, merge);
                }
                Vec::new()
            }
            AgentEvent::Custom(signal) => {
                let (task_id, state) = match signal {
                    ProgressSignal::TaskRunning { task_id, .. } => (task_id, TaskState::Running),
                    ProgressSignal::TaskComplete { task_id, .. } => (task_id, TaskState::Complete),
                    ProgressSignal::TaskError { task_id, .. } => (task_id, TaskState::Error),
                };
                self.progress.insert(task_id.clone(), state);
                vec![Signal::Progress { task_id, state }]
            }
            AgentEvent::Error(message) => {
                self.state = RunState::Failed;
                vec![Signal::Failed(message)]
            }
            AgentEvent::End => Vec::new(),
        }
    }

    fn apply_snapshot(&mut self, snapshot: StateSnapshot) -> Vec<Signal> {
        let mut signals = Vec::new();

        if let Some(messages) = snapshot.messages {
            self.transcript = messages
                .iter()
                .enumerate()
                .filter_map(|(i, m)| TranscriptEntry::from_agent(m, format!("snapshot-{i}")))
                .collect();
            for msg in &messages {
                let Some(clarification) = clarification_in(msg) else {
                    continue;
                };
                if self.seen_clarifications.insert(clarification.key.clone()) {
                    self.pending = Some(clarification.clone());
                    signals.push(Signal::Clarification(clarification));
                }
            }
        }
        if let Some(artifacts) = snapshot.artifacts {
            if artifacts != self.artifacts {
                self.artifacts = artifacts.clone();
                signals.push(Signal::Artifacts(artifacts));
            }
        }
        if let Some(title) = snapshot.title {
            if self.title.as_deref() != Some(title.as_str()) {
                self.title = Some(title.clone());
                signals.push(Signal::Title(title));
            }
        }
        if let Some(todos) = snapshot.todos {
            self.todos = todos;
        }
        signals
    }

    fn apply_message(&mut self, msg: &AgentMessage, merge: Merge) {
        if msg.is_human() {
            return;
        }
        let fallback = self.stream_key();
        let Some(incoming) = TranscriptEntry::from_agent(msg, fallback) else {
            log::debug!("Ignoring '{}' message delta", msg.kind);
            return;
        };
        match self.transcript.iter_mut().find(|e| e.id == incoming.id) {
            Some(entry) => match merge {
                Merge::Delta => {
                    entry.content.push_str(&incoming.content);
                    entry.reasoning.push_str(&incoming.reasoning);
                    entry.tool_calls.extend(incoming.tool_calls);
                }
                Merge::Cumulative => *entry = incoming,
            },
            None => self.transcript.push(incoming),
        }
    }

    /// Key for a delta that carries no id: the trailing assistant entry of this run.
    fn stream_key(&self) -> String {
        match self.transcript.last() {
            Some(last) if last.kind == EntryKind::Assistant && self.transcript.len() > self.before_run.len() => {
                last.id.clone()
            }
            _ => format!("delta-{}", self.transcript.len()),
        }
    }

    /// Stops the run and restores the transcript to its state before the run.
    /// Also discards the partial output of a run that already failed.
    pub fn cancel(&mut self) {
        if matches!(self.state, RunState::Streaming | RunState::Failed) {
            self.transcript = std::mem::take(&mut self.before_run);
            self.progress.clear();
            self.state = RunState::Cancelled;
        }
    }

    /// Ends the run. Cancelled or failed runs yield nothing.
    pub fn finish(&mut self, session_id: &str) -> Option<RunOutcome> {
        if self.state != RunState::Streaming {
            return None;
        }
        let outcome = RunOutcome {
            messages: self.run_messages(session_id),
            artifacts: self.artifacts.clone(),
            title: self.title.clone(),
            clarification: self.pending.clone(),
        };
        self.state = RunState::Finished;
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(events: &[(&str, Value)]) -> String {
        events
            .iter()
            .map(|(kind, data)| format!("event: {kind}\ndata: {data}\n\n"))
            .collect()
    }

    fn snapshot(messages: Value) -> AgentEvent {
        AgentEvent::Values(serde_json::from_value(json!({ "messages": messages })).unwrap())
    }

    fn delta(id: &str, text: &str) -> AgentEvent {
        AgentEvent::Messages(
            vec![serde_json::from_value(json!({ "id": id, "type": "AIMessageChunk", "content": text })).unwrap()],
            Merge::Delta,
        )
    }

    fn clarification_snapshot() -> AgentEvent {
        snapshot(json!([
            { "id": "h1", "type": "human", "content": "build me a site" },
            { "id": "a1", "type": "ai", "content": "", "tool_calls": [{ "id": "c1", "name": "ask_clarification", "args": {} }] },
            { "id": "tc-1", "type": "tool", "name": "ask_clarification", "tool_call_id": "c1", "content": "Which colours?" },
        ]))
    }

    #[test]
    fn parses_event_lines_and_tuples() {
        let mut parser = AgentStreamParser::new();
        let mut wire = frames(&[
            ("metadata", json!({ "run_id": "r1" })),
            ("values", json!({ "title": "Site", "artifacts": null })),
            ("messages", json!([{ "id": "a1", "type": "AIMessageChunk", "content": "Hi" }, { "langgraph_node": "agent" }])),
            ("custom", json!({ "type": "task_running", "task_id": "t1" })),
            ("telemetry", json!({})),
        ]);
        wire.push_str("data: [\"messages/partial\", [{\"id\":\"a1\",\"type\":\"ai\",\"content\":[{\"type\":\"text\",\"text\":\"Hi there\"}]}]]\n\n");
        wire.push_str("data: {not json\n\n");
        wire.push_str("event: end\ndata: null\n\n");

        let events = parser.push(wire.as_bytes());
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], AgentEvent::Values(s) if s.title.as_deref() == Some("Site") && s.artifacts.is_none()));
        assert!(matches!(&events[1], AgentEvent::Messages(m, Merge::Delta) if m[0].text() == "Hi"));
        assert!(matches!(&events[2], AgentEvent::Custom(ProgressSignal::TaskRunning { task_id, .. }) if task_id == "t1"));
        assert!(matches!(&events[3], AgentEvent::Messages(m, Merge::Cumulative) if m[0].text() == "Hi there"));
        assert_eq!(events[4], AgentEvent::End);
    }

    #[test]
    fn event_split_across_reads_waits_for_the_line() {
        let mut parser = AgentStreamParser::new();
        let wire = frames(&[("values", json!({ "title": "T" }))]);
        let (head, tail) = wire.as_bytes().split_at(wire.len() - 6);
        assert!(parser.push(head).is_empty());
        assert_eq!(parser.push(tail).len(), 1);
    }

    #[test]
    fn snapshot_then_deltas_reconstructs_in_order() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        r.apply(snapshot(json!([
            { "id": "h1", "type": "human", "content": "hi" },
            { "id": "a1", "type": "ai", "content": "Hello" },
        ])));
        r.apply(delta("a2", "How "));
        r.apply(delta("a2", "can "));
        r.apply(delta("a2", "I help?"));

        let contents: Vec<&str> = r.transcript().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "Hello", "How can I help?"]);
    }

    #[test]
    fn snapshot_replaces_accumulated_deltas() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        r.apply(delta("a1", "Draft"));
        r.apply(snapshot(json!([
            { "id": "h1", "type": "human", "content": "hi" },
            { "id": "a1", "type": "ai", "content": "Final" },
        ])));
        assert_eq!(r.transcript().len(), 2);
        assert_eq!(r.transcript()[1].content, "Final");
    }

    #[test]
    fn cumulative_messages_replace_text() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        let partial = |text: &str| {
            AgentEvent::Messages(
                vec![serde_json::from_value(json!({ "id": "a1", "type": "ai", "content": text })).unwrap()],
                Merge::Cumulative,
            )
        };
        r.apply(partial("Hel"));
        r.apply(partial("Hello"));
        assert_eq!(r.transcript()[0].content, "Hello");
    }

    #[test]
    fn deltas_without_id_extend_the_current_reply() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        let anonymous = |text: &str| {
            AgentEvent::Messages(
                vec![serde_json::from_value(json!({ "type": "AIMessageChunk", "content": text })).unwrap()],
                Merge::Delta,
            )
        };
        r.apply(anonymous("a"));
        r.apply(anonymous("b"));
        assert_eq!(r.transcript().len(), 1);
        assert_eq!(r.transcript()[0].content, "ab");
    }

    #[test]
    fn repeated_clarification_fires_once() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        let first = r.apply(clarification_snapshot());
        let second = r.apply(clarification_snapshot());
        let count = first
            .iter()
            .chain(&second)
            .filter(|s| matches!(s, Signal::Clarification(_)))
            .count();
        assert_eq!(count, 1);
        assert_eq!(r.pending_clarification().map(|c| c.key.as_str()), Some("tc-1"));
        assert_eq!(r.input_for("blue".into()), RunInput::Resume("blue".into()));

        let outcome = r.finish("s1").unwrap();
        assert_eq!(outcome.clarification.map(|c| c.question), Some("Which colours?".into()));

        // the next run sees the same snapshot again
        r.begin_run();
        assert!(r.apply(clarification_snapshot()).is_empty());
        assert!(r.pending_clarification().is_none());
    }

    #[test]
    fn restored_thread_keeps_history_out_of_the_next_run() {
        let state: StateSnapshot = serde_json::from_value(json!({
            "messages": [
                { "id": "h1", "type": "human", "content": "build me a site" },
                { "id": "tc-1", "type": "tool", "name": "ask_clarification", "tool_call_id": "c1", "content": "Which colours?" },
            ],
            "artifacts": ["/out/draft.html"],
        }))
        .unwrap();
        let mut r = ThreadReconciler::restore(state);
        assert_eq!(r.transcript().len(), 2);
        assert_eq!(r.artifacts(), ["/out/draft.html".to_string()]);
        assert!(r.pending_clarification().is_some());
        assert!(r.finish("s1").is_none());

        r.begin_run();
        let signals = r.apply(snapshot(json!([
            { "id": "h1", "type": "human", "content": "build me a site" },
            { "id": "tc-1", "type": "tool", "name": "ask_clarification", "tool_call_id": "c1", "content": "Which colours?" },
            { "id": "a2", "type": "ai", "content": "Blue it is" },
        ])));
        assert!(signals.is_empty());
        let outcome = r.finish("s1").unwrap();
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].content, "Blue it is");
    }

    #[test]
    fn progress_never_touches_the_transcript() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        r.apply(delta("a1", "Working"));
        let signals = r.apply(AgentEvent::Custom(ProgressSignal::TaskError {
            task_id: "t1".into(),
            error: Some("timeout".into()),
        }));
        assert_eq!(signals, vec![Signal::Progress { task_id: "t1".into(), state: TaskState::Error }]);
        assert_eq!(r.progress().get("t1"), Some(&TaskState::Error));
        assert_eq!(r.transcript().len(), 1);
        assert_eq!(r.transcript()[0].content, "Working");
    }

    #[test]
    fn artifacts_and_title_are_last_write_wins() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        let values = |v: Value| AgentEvent::Values(serde_json::from_value(v).unwrap());
        let s1 = r.apply(values(json!({ "artifacts": ["/out/a.html"], "title": "One" })));
        assert_eq!(s1.len(), 2);
        let s2 = r.apply(values(json!({ "artifacts": ["/out/a.html"] })));
        assert!(s2.is_empty());
        r.apply(values(json!({ "artifacts": ["/out/b.md"], "todos": [{ "content": "write", "status": "pending" }] })));
        assert_eq!(r.artifacts(), ["/out/b.md".to_string()]);
        assert_eq!(r.todos().len(), 1);
    }

    #[test]
    fn cancel_reverts_and_suppresses_finish() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        r.apply(snapshot(json!([{ "id": "a0", "type": "ai", "content": "earlier" }])));
        r.finish("s1");

        r.begin_run();
        r.apply(delta("a1", "one "));
        r.apply(delta("a1", "two "));
        r.apply(delta("a1", "three"));
        r.cancel();
        assert_eq!(r.transcript().len(), 1);
        assert_eq!(r.transcript()[0].content, "earlier");
        assert!(r.apply(delta("a1", "late")).is_empty());
        assert_eq!(r.transcript().len(), 1);
        assert!(r.finish("s1").is_none());
    }

    #[test]
    fn failed_run_yields_no_outcome() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        r.apply(delta("a1", "par"));
        assert_eq!(r.apply(AgentEvent::Error("graph crashed".into())), vec![Signal::Failed("graph crashed".into())]);
        assert!(r.finish("s1").is_none());
    }

    #[test]
    fn cancel_after_failure_restores_the_earlier_transcript() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        r.apply(snapshot(json!([{ "id": "a0", "type": "ai", "content": "earlier" }])));
        r.finish("s1");
        let before: Vec<String> = r.transcript().iter().map(|e| e.id.clone()).collect();

        r.begin_run();
        r.apply(delta("a1", "half"));
        r.apply(AgentEvent::Error("graph crashed".into()));
        r.cancel();
        let after: Vec<String> = r.transcript().iter().map(|e| e.id.clone()).collect();
        assert_eq!(after, before);

        r.begin_run();
        r.apply(delta("a1", "fresh"));
        let outcome = r.finish("s1").unwrap();
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].content, "fresh");
    }

    #[test]
    fn finish_returns_this_runs_output_as_messages() {
        let mut r = ThreadReconciler::new();
        r.begin_run();
        r.apply(snapshot(json!([
            { "id": "h1", "type": "human", "content": "make a page" },
            { "id": "a1", "type": "ai", "content": "", "tool_calls": [{ "id": "c1", "name": "write_file", "args": { "path": "/out/i.html" } }] },
            { "id": "t1", "type": "tool", "name": "write_file", "tool_call_id": "c1", "content": "ok", "status": "error" },
            { "id": "a2", "type": "ai", "content": "Done", "additional_kwargs": { "reasoning_content": "plan" } },
        ])));
        let outcome = r.finish("s1").unwrap();
        let kinds: Vec<MessageType> = outcome.messages.iter().map(|m| m.message_type).collect();
        assert_eq!(kinds, vec![MessageType::ToolUse, MessageType::ToolResult, MessageType::Chat]);
        assert_eq!(outcome.messages[1].tool_status, Some(ToolStatus::Error));
        assert_eq!(outcome.messages[2].thinking.as_deref(), Some("plan"));
        assert!(outcome.messages.iter().all(|m| m.session_id == "s1"));
    }

    #[test]
    fn run_payload_shapes() {
        let options = RunOptions { model_name: Some("deepseek".into()), thinking_enabled: true };
        let fresh = run_payload(&RunInput::Message("hi".into()), "th-1", &options);
        assert_eq!(fresh["assistant_id"], "lead_agent");
        assert_eq!(fresh["stream_mode"], json!(["values", "messages", "custom"]));
        assert_eq!(fresh["input"]["messages"][0]["content"], "hi");
        assert_eq!(fresh["config"]["configurable"]["thread_id"], "th-1");
        assert_eq!(fresh["config"]["configurable"]["model_name"], "deepseek");
        assert!(fresh.get("command").is_none());

        let resume = run_payload(&RunInput::Resume("blue".into()), "th-1", &RunOptions::default());
        assert_eq!(resume["command"]["resume"], "blue");
        assert!(resume.get("input").is_none());
        assert!(resume["config"]["configurable"].get("model_name").is_none());
    }
}
