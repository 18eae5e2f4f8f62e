//! Turns the flat message log into display groups.
//!
//! [`group_messages`] is a single greedy left-to-right pass with no state
//! outside its arguments, so it is recomputed on every render.

use crate::models::{Message, MessageType, Role, ToolCall, ToolStatus};

const PRESENT_FILES_TOOLS: [&str; 2] = ["present_files", "present_file"];
const SUBAGENT_TOOL: &str = "task";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubtaskStatus {
    InProgress,
    Completed,
    Error,
}

/// A delegated sub-agent task, paired with its result if one arrived.
#[derive(Clone, Debug, PartialEq)]
pub struct Subtask {
    pub id: String,
    pub subagent_type: String,
    pub description: String,
    pub prompt: String,
    pub status: SubtaskStatus,
    pub result: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MessageGroup {
    Human {
        id: String,
        messages: Vec<Message>,
    },
    AssistantMessage {
        id: String,
        messages: Vec<Message>,
    },
    /// A tool transaction. `result` is `None` while no reply has arrived,
    /// which is an in-progress state, not a failure.
    Processing {
        id: String,
        trigger: Message,
        tool_results: Vec<Message>,
        result: Option<Message>,
    },
    Clarification {
        id: String,
        message: Message,
    },
    PresentFiles {
        id: String,
        trigger: Message,
        files: Vec<String>,
        result: Option<Message>,
    },
    Subagent {
        id: String,
        trigger: Message,
        tasks: Vec<Subtask>,
        result: Option<Message>,
    },
}

impl MessageGroup {
    pub fn id(&self) -> &str {
        match self {
            MessageGroup::Human { id, .. }
            | MessageGroup::AssistantMessage { id, .. }
            | MessageGroup::Processing { id, .. }
            | MessageGroup::Clarification { id, .. }
            | MessageGroup::PresentFiles { id, .. }
            | MessageGroup::Subagent { id, .. } => id,
        }
    }
}

pub fn group_messages(messages: &[Message]) -> Vec<MessageGroup> {
    let mut groups = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        let msg = &messages[i];

        if msg.role == Role::User {
            let end = run_end(messages, i, |m| m.role == Role::User);
            groups.push(MessageGroup::Human {
                id: format!("human-{}", msg.id),
                messages: messages[i..end].to_vec(),
            });
            i = end;
            continue;
        }

        if msg.is_clarification() {
            groups.push(MessageGroup::Clarification {
                id: format!("clarification-{}", msg.id),
                message: msg.clone(),
            });
            i += 1;
            continue;
        }

        if opens_transaction(msg) {
            let results_end = run_end(messages, i + 1, |m| {
                m.message_type == MessageType::ToolResult && !m.is_clarification()
            });
            let tool_results = messages[i + 1..results_end].to_vec();
            let result = messages.get(results_end).filter(|m| m.is_plain_assistant()).cloned();
            i = results_end + usize::from(result.is_some());
            groups.push(transaction_group(msg, tool_results, result));
            continue;
        }

        // plain replies, plus stray tool messages with no trigger
        let end = run_end(messages, i, |m| {
            m.role == Role::Assistant && !m.is_clarification() && !opens_transaction(m)
        });
        groups.push(MessageGroup::AssistantMessage {
            id: format!("assistant-{}", msg.id),
            messages: messages[i..end].to_vec(),
        });
        i = end;
    }

    groups
}

fn run_end(messages: &[Message], start: usize, belongs: impl Fn(&Message) -> bool) -> usize {
    messages[start..]
        .iter()
        .position(|m| !belongs(m))
        .map_or(messages.len(), |offset| start + offset)
}

fn opens_transaction(msg: &Message) -> bool {
    msg.role == Role::Assistant && msg.message_type == MessageType::ToolUse && !msg.tool_calls.is_empty()
}

fn transaction_group(trigger: &Message, tool_results: Vec<Message>, result: Option<Message>) -> MessageGroup {
    let presented: Vec<&Message> = tool_results
        .iter()
        .filter(|m| m.tool_name.as_deref().is_some_and(|n| PRESENT_FILES_TOOLS.contains(&n)))
        .collect();
    if !presented.is_empty() {
        return MessageGroup::PresentFiles {
            id: format!("files-{}", trigger.id),
            trigger: trigger.clone(),
            files: presented.iter().flat_map(|m| presented_files(&m.content)).collect(),
            result,
        };
    }

    let subtasks: Vec<&ToolCall> = trigger.tool_calls.iter().filter(|c| c.name == SUBAGENT_TOOL).collect();
    if !subtasks.is_empty() {
        return MessageGroup::Subagent {
            id: format!("subagent-{}", trigger.id),
            trigger: trigger.clone(),
            tasks: subtasks.into_iter().map(|call| subtask(call, &tool_results)).collect(),
            result,
        };
    }

    MessageGroup::Processing {
        id: format!("processing-{}", trigger.id),
        trigger: trigger.clone(),
        tool_results,
        result,
    }
}

/// File paths from a present-files result: a JSON array of paths, or a single path.
fn presented_files(content: &str) -> Vec<String> {
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(content) {
        return items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect();
    }
    let trimmed = content.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![trimmed.to_string()]
    }
}

fn subtask(call: &ToolCall, tool_results: &[Message]) -> Subtask {
    let arg = |key: &str| {
        call.args
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let reply = tool_results.iter().find(|m| m.tool_call_id.as_deref() == Some(call.id.as_str()));
    let status = match reply {
        None => SubtaskStatus::InProgress,
        Some(m) if m.tool_status == Some(ToolStatus::Error) => SubtaskStatus::Error,
        Some(_) => SubtaskStatus::Completed,
    };
    Subtask {
        id: call.id.clone(),
        subagent_type: arg("subagent_type"),
        description: arg("description"),
        prompt: arg("prompt"),
        status,
        result: reply.map(|m| m.content.clone()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn user(id: &str, text: &str) -> Message {
        Message::new(id.into(), "s".into(), Role::User, text.into())
    }

    fn reply(id: &str, text: &str) -> Message {
        Message::new(id.into(), "s".into(), Role::Assistant, text.into())
    }

    fn tool_use(id: &str, calls: &[(&str, &str, serde_json::Value)]) -> Message {
        let mut m = reply(id, "");
        m.message_type = MessageType::ToolUse;
        m.tool_calls = calls
            .iter()
            .map(|(cid, name, args)| ToolCall { id: cid.to_string(), name: name.to_string(), args: args.clone() })
            .collect();
        m
    }

    fn tool_result(id: &str, call_id: &str, name: &str, content: &str) -> Message {
        let mut m = reply(id, content);
        m.message_type = MessageType::ToolResult;
        m.tool_call_id = Some(call_id.into());
        m.tool_name = Some(name.into());
        m.tool_status = Some(ToolStatus::Success);
        m
    }

    #[test]
    fn consecutive_runs_collapse() {
        let log = vec![user("u1", "a"), user("u2", "b"), reply("a1", "c"), reply("a2", "d"), user("u3", "e")];
        let groups = group_messages(&log);
        assert_eq!(groups.len(), 3);
        match &groups[0] {
            MessageGroup::Human { messages, .. } => assert_eq!(messages.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        match &groups[1] {
            MessageGroup::AssistantMessage { id, messages } => {
                assert_eq!(id, "assistant-a1");
                assert_eq!(messages.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tool_transaction_absorbs_results_and_reply() {
        let log = vec![
            user("u1", "search"),
            tool_use("t1", &[("c1", "web_search", json!({"q": "x"}))]),
            tool_result("r1", "c1", "web_search", "found"),
            tool_result("r2", "c1", "web_fetch", "page"),
            reply("a1", "Here you go"),
            reply("a2", "Anything else?"),
        ];
        let groups = group_messages(&log);
        assert_eq!(groups.len(), 3);
        match &groups[1] {
            MessageGroup::Processing { trigger, tool_results, result, .. } => {
                assert_eq!(trigger.id, "t1");
                assert_eq!(tool_results.len(), 2);
                assert_eq!(result.as_ref().map(|m| m.id.as_str()), Some("a1"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&groups[2], MessageGroup::AssistantMessage { messages, .. } if messages[0].id == "a2"));
    }

    #[test]
    fn transaction_without_reply_is_in_progress() {
        let log = vec![tool_use("t1", &[("c1", "web_search", json!({}))]), tool_result("r1", "c1", "web_search", "x")];
        match &group_messages(&log)[..] {
            [MessageGroup::Processing { result: None, tool_results, .. }] => assert_eq!(tool_results.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn clarification_is_a_singleton_and_ends_a_transaction() {
        let log = vec![
            tool_use("t1", &[("c1", "ask_clarification", json!({}))]),
            tool_result("r1", "c1", "ask_clarification", "Which region?"),
            user("u1", "EU"),
        ];
        let groups = group_messages(&log);
        assert_eq!(groups.len(), 3);
        assert!(matches!(&groups[0], MessageGroup::Processing { result: None, tool_results, .. } if tool_results.is_empty()));
        assert!(matches!(&groups[1], MessageGroup::Clarification { message, .. } if message.content == "Which region?"));
    }

    #[test]
    fn present_files_reclassifies_the_transaction() {
        let log = vec![
            tool_use("t1", &[("c1", "present_files", json!({}))]),
            tool_result("r1", "c1", "present_files", r#"["/out/report.md","/out/site.html"]"#),
            tool_result("r2", "c2", "present_file", " /out/data.csv \n"),
            reply("a1", "Done"),
        ];
        match &group_messages(&log)[..] {
            [MessageGroup::PresentFiles { files, result, .. }] => {
                assert_eq!(files, &vec!["/out/report.md", "/out/site.html", "/out/data.csv"]);
                assert!(result.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn subagent_tasks_report_status() {
        let log = vec![
            tool_use(
                "t1",
                &[
                    ("c1", "task", json!({"subagent_type": "researcher", "description": "dig", "prompt": "find"})),
                    ("c2", "task", json!({"subagent_type": "coder", "description": "build", "prompt": "make"})),
                    ("c3", "task", json!({"subagent_type": "coder", "description": "test", "prompt": "run"})),
                ],
            ),
            tool_result("r1", "c1", "task", "notes"),
            {
                let mut failed = tool_result("r2", "c2", "task", "boom");
                failed.tool_status = Some(ToolStatus::Error);
                failed
            },
        ];
        match &group_messages(&log)[..] {
            [MessageGroup::Subagent { tasks, result: None, .. }] => {
                let statuses: Vec<_> = tasks.iter().map(|t| t.status).collect();
                assert_eq!(
                    statuses,
                    vec![SubtaskStatus::Completed, SubtaskStatus::Error, SubtaskStatus::InProgress]
                );
                assert_eq!(tasks[0].subagent_type, "researcher");
                assert_eq!(tasks[0].result.as_deref(), Some("notes"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stray_tool_result_does_not_stall() {
        let log = vec![tool_result("r1", "c9", "web_search", "orphan"), user("u1", "hi")];
        let groups = group_messages(&log);
        assert_eq!(groups.len(), 2);
        assert!(matches!(&groups[0], MessageGroup::AssistantMessage { .. }));
    }

    #[test]
    fn grouping_is_idempotent() {
        let log = vec![
            user("u1", "a"),
            tool_use("t1", &[("c1", "web_search", json!({}))]),
            tool_result("r1", "c1", "web_search", "x"),
            reply("a1", "b"),
        ];
        assert_eq!(group_messages(&log), group_messages(&log));
        assert!(group_messages(&[]).is_empty());
    }
}
