//! Client half of the chat stream codec: line splitting over raw response
//! bytes, frame decoding, and the per-turn accumulator.

use crate::models::{MemoryStatus, Source, StreamEvent};

const DONE_SENTINEL: &str = "[DONE]";

/// A complete line of an event stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SseLine {
    Event(String),
    Data(String),
    /// Blank line, which closes an event block.
    Dispatch,
}

/// Buffers bytes until whole lines are available.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let raw = String::from_utf8_lossy(&raw);
            let line = raw.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                lines.push(SseLine::Dispatch);
            } else if let Some(rest) = line.strip_prefix("data:") {
                lines.push(SseLine::Data(field_value(rest)));
            } else if let Some(rest) = line.strip_prefix("event:") {
                lines.push(SseLine::Event(field_value(rest)));
            }
            // comments and unknown fields are ignored
        }
        lines
    }
}

fn field_value(rest: &str) -> String {
    rest.strip_prefix(' ').unwrap_or(rest).to_string()
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatFrame {
    Event(StreamEvent),
    Done,
}

/// Decodes the simple chat protocol from response bytes.
#[derive(Debug, Default)]
pub struct ChatStreamParser {
    lines: LineSplitter,
}

impl ChatStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames completed by `bytes`. A frame that does not decode is logged and skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ChatFrame> {
        self.lines
            .push(bytes)
            .into_iter()
            .filter_map(|line| match line {
                SseLine::Data(payload) => decode(&payload),
                _ => None,
            })
            .collect()
    }
}

fn decode(payload: &str) -> Option<ChatFrame> {
    if payload == DONE_SENTINEL {
        return Some(ChatFrame::Done);
    }
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(ChatFrame::Event(event)),
        Err(e) => {
            log::warn!("Skipping undecodable stream frame: {e}");
            None
        }
    }
}

/// How a frame affected the turn.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnProgress {
    Streaming,
    Completed,
    Failed(String),
}

/// Running state of one simple-protocol turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatTurn {
    pub content: String,
    pub thinking: String,
    pub sources: Vec<Source>,
    pub memory: Option<MemoryStatus>,
    ended: Option<TurnProgress>,
}

impl ChatTurn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one frame into the turn. Frames after the end are ignored.
    pub fn apply(&mut self, frame: ChatFrame) -> TurnProgress {
        if let Some(ended) = &self.ended {
            return ended.clone();
        }
        match frame {
            ChatFrame::Event(StreamEvent::Chunk(delta)) => self.content.push_str(&delta),
            ChatFrame::Event(StreamEvent::Thinking(delta)) => self.thinking.push_str(&delta),
            ChatFrame::Event(StreamEvent::Sources(sources)) => self.sources = sources,
            ChatFrame::Event(StreamEvent::Memory(status)) => self.memory = Some(status),
            ChatFrame::Event(StreamEvent::Error(message)) => return self.end(TurnProgress::Failed(message)),
            ChatFrame::Done => return self.end(TurnProgress::Completed),
        }
        TurnProgress::Streaming
    }

    fn end(&mut self, progress: TurnProgress) -> TurnProgress {
        self.ended = Some(progress.clone());
        progress
    }

    pub fn thinking(&self) -> Option<String> {
        (!self.thinking.is_empty()).then(|| self.thinking.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(frames: &[&str]) -> String {
        frames.iter().map(|f| format!("data: {f}\n\n")).collect()
    }

    #[test]
    fn splitter_reports_event_and_data_lines() {
        let mut lines = LineSplitter::new();
        let out = lines.push(b"event: values\ndata: {}\n\n: ping\n");
        assert_eq!(
            out,
            vec![SseLine::Event("values".into()), SseLine::Data("{}".into()), SseLine::Dispatch]
        );
    }

    #[test]
    fn partial_lines_wait_for_the_rest() {
        let mut parser = ChatStreamParser::new();
        let bytes = wire(&[r#"{"type":"chunk","data":"Hello"}"#]);
        let (head, tail) = bytes.as_bytes().split_at(17);
        assert!(parser.push(head).is_empty());
        assert_eq!(parser.push(tail), vec![ChatFrame::Event(StreamEvent::Chunk("Hello".into()))]);
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let mut parser = ChatStreamParser::new();
        let bytes = wire(&[
            r#"{"type":"chunk","data":"a"}"#,
            r#"{"type":"chunk","data":"#,
            r#"{"type":"progress","data":3}"#,
            r#"{"type":"chunk","data":"b"}"#,
            "[DONE]",
        ]);
        let frames = parser.push(bytes.as_bytes());
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], ChatFrame::Done);
    }

    #[test]
    fn turn_concatenates_deltas_and_overwrites_snapshots() {
        let mut parser = ChatStreamParser::new();
        let bytes = wire(&[
            r#"{"type":"sources","data":[]}"#,
            r#"{"type":"memory","data":{"enabled":false,"loaded":false}}"#,
            r#"{"type":"thinking","data":"let me "}"#,
            r#"{"type":"thinking","data":"see"}"#,
            r#"{"type":"chunk","data":"Hel"}"#,
            r#"{"type":"chunk","data":"lo"}"#,
            r#"{"type":"sources","data":[{"pageId":"p","title":"T","excerpt":"e","similarity":0.5}]}"#,
            "[DONE]",
        ]);
        let mut turn = ChatTurn::new();
        let mut last = TurnProgress::Streaming;
        for frame in parser.push(bytes.as_bytes()) {
            last = turn.apply(frame);
        }
        assert_eq!(last, TurnProgress::Completed);
        assert_eq!(turn.content, "Hello");
        assert_eq!(turn.thinking().as_deref(), Some("let me see"));
        assert_eq!(turn.sources.len(), 1);
        assert_eq!(turn.memory, Some(MemoryStatus::default()));
    }

    #[test]
    fn error_frame_fails_the_turn() {
        let mut turn = ChatTurn::new();
        turn.apply(ChatFrame::Event(StreamEvent::Chunk("par".into())));
        let progress = turn.apply(ChatFrame::Event(StreamEvent::Error("provider down".into())));
        assert_eq!(progress, TurnProgress::Failed("provider down".into()));
        turn.apply(ChatFrame::Event(StreamEvent::Chunk("tial".into())));
        assert!(matches!(turn.apply(ChatFrame::Done), TurnProgress::Failed(_)));
        assert_eq!(turn.content, "par");
    }
}
