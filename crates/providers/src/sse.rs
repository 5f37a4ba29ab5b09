//! Server-sent event decoding for streamed chat completions.
//!
//! The body arrives as arbitrary byte slices, which may split a multi-byte
//! character. Raw bytes are buffered and only complete lines are decoded.
//! Only `data:` lines matter. `[DONE]` ends the stream.

use serde_json::Value;
use tracing::trace;

/// One decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A parsed `data: {...}` payload.
    Chunk(Value),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental line decoder for an SSE body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();

            if let Some(event) = decode_raw_line(&line[..line_end]) {
                let done = event == SseEvent::Done;
                events.push(event);
                if done {
                    self.buffer.clear();
                    break;
                }
            }
        }
        events
    }

    /// Decode whatever is left once the body ends without a newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_raw_line(&rest)
    }
}

fn decode_raw_line(line: &[u8]) -> Option<SseEvent> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match std::str::from_utf8(line) {
        Ok(line) => decode_line(line),
        Err(e) => {
            trace!(error = %e, "Ignoring SSE line that is not UTF-8");
            None
        }
    }
}

fn decode_line(line: &str) -> Option<SseEvent> {
    // Blank lines separate events; `:` starts a comment.
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<Value>(data) {
        Ok(chunk) => Some(SseEvent::Chunk(chunk)),
        Err(e) => {
            trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_complete_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
        );
        assert_eq!(
            events,
            vec![
                SseEvent::Chunk(json!({"choices": [{"delta": {"content": "Hi"}}]})),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn buffers_partial_lines_across_pushes() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"n\":").is_empty());
        assert_eq!(decoder.push(b"1}\r\n"), vec![SseEvent::Chunk(json!({"n": 1}))]);
    }

    #[test]
    fn characters_split_across_pushes_survive() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        let events = decoder.push(&line[split..]);
        assert_eq!(
            events,
            vec![SseEvent::Chunk(json!({"choices": [{"delta": {"content": "héllo"}}]}))]
        );
    }

    #[test]
    fn skips_comments_and_other_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\nevent: message\nid: 7\ndata:{\"n\":2}\n");
        assert_eq!(events, vec![SseEvent::Chunk(json!({"n": 2}))]);
    }

    #[test]
    fn unparseable_data_is_dropped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {not json\n").is_empty());
    }

    #[test]
    fn nothing_after_done() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: [DONE]\ndata: {\"n\":3}\n");
        assert_eq!(events, vec![SseEvent::Done]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn finish_flushes_trailing_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"n\":4}").is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Chunk(json!({"n": 4}))));
    }
}
