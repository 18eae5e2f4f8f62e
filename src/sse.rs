//! Server-Sent-Events transport codec.
//!
//! Downstream (to the browser) every frame is `data: <json>\n\n` where the
//! JSON is `{ "type": ..., "data": ... }`, and a successful turn ends with the
//! literal `data: [DONE]\n\n` sentinel. Upstream (from OpenAI-compatible model
//! endpoints) the same line discipline is parsed by [`SseLineBuffer`].

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::models::{MemoryStatus, Source};

/// Literal payload of the terminal frame of a successful turn.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One event of the simple chat protocol. Transport-only, never persisted.
///
/// `Chunk` and `Thinking` are deltas the receiver concatenates; `Sources` and
/// `Memory` are snapshots the receiver overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Sources(Vec<Source>),
    Chunk(String),
    Thinking(String),
    Memory(MemoryStatus),
    Error(String),
}

/// A unit written to the response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    Done,
}

impl Frame {
    /// Serializes the frame into its wire form, terminating blank line included.
    pub fn encode(&self) -> String {
        match self {
            Frame::Event(event) => match serde_json::to_string(event) {
                Ok(json) => format!("data: {json}\n\n"),
                Err(e) => {
                    error!("Failed to serialize stream event: {e}");
                    "data: {\"type\":\"error\",\"data\":\"serialization failure\"}\n\n".to_string()
                }
            },
            Frame::Done => format!("data: {DONE_SENTINEL}\n\n"),
        }
    }

    /// Parses the payload of a single `data:` line.
    pub fn decode(payload: &str) -> Result<Frame, serde_json::Error> {
        if payload == DONE_SENTINEL {
            return Ok(Frame::Done);
        }
        serde_json::from_str::<StreamEvent>(payload).map(Frame::Event)
    }
}

impl From<StreamEvent> for Frame {
    fn from(event: StreamEvent) -> Self {
        Frame::Event(event)
    }
}

/// Incremental splitter for `data:` lines of an SSE byte stream.
///
/// Bytes are buffered until a full line is available, so a frame split
/// across network reads (including inside a multi-byte UTF-8 sequence) is
/// never acted on early. Non-`data` lines (comments, `event:`, blank
/// separators) are skipped.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns the payloads of every `data:` line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(rest) = line.strip_prefix("data:") {
                payloads.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        payloads
    }

    /// Bytes of an incomplete trailing line still held back.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_chunk_as_tagged_data_frame() {
        let frame = Frame::Event(StreamEvent::Chunk("Hel".into()));
        assert_eq!(frame.encode(), "data: {\"type\":\"chunk\",\"data\":\"Hel\"}\n\n");
        assert_eq!(Frame::Done.encode(), "data: [DONE]\n\n");
    }

    #[test]
    fn encodes_memory_snapshot() {
        let frame: Frame = StreamEvent::Memory(MemoryStatus { enabled: true, loaded: false }).into();
        assert_eq!(
            frame.encode(),
            "data: {\"type\":\"memory\",\"data\":{\"enabled\":true,\"loaded\":false}}\n\n"
        );
    }

    #[test]
    fn decodes_sentinel_and_events() {
        assert_eq!(Frame::decode("[DONE]").unwrap(), Frame::Done);
        let frame = Frame::decode(r#"{"type":"error","data":"boom"}"#).unwrap();
        assert_eq!(frame, Frame::Event(StreamEvent::Error("boom".into())));
        assert!(Frame::decode(r#"{"type":"unknown","data":1}"#).is_err());
    }

    #[test]
    fn line_buffer_holds_partial_lines() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        assert!(buf.pending() > 0);
        let out = buf.push(b":1}\n\ndata: second\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "second".to_string()]);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn line_buffer_survives_split_utf8_sequence() {
        let line = "data: héllo\n".as_bytes();
        // split inside the two-byte 'é'
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut buf = SseLineBuffer::new();
        assert!(buf.push(&line[..split]).is_empty());
        assert_eq!(buf.push(&line[split..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn line_buffer_skips_comments_and_event_lines() {
        let mut buf = SseLineBuffer::new();
        let out = buf.push(b": keep-alive\r\nevent: values\r\ndata:x\r\n\r\n");
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[test]
    fn encoded_frames_round_trip_through_line_buffer() {
        let events = vec![
            Frame::Event(StreamEvent::Sources(vec![])),
            Frame::Event(StreamEvent::Thinking("hmm\nmore".into())),
            Frame::Done,
        ];
        let wire: String = events.iter().map(Frame::encode).collect();
        let mut buf = SseLineBuffer::new();
        let decoded: Vec<Frame> = buf
            .push(wire.as_bytes())
            .iter()
            .map(|p| Frame::decode(p).unwrap())
            .collect();
        assert_eq!(decoded, events);
    }
}
