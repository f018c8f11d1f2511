use serde_json::Value;

pub const DONE_LINE: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, PartialEq)]
pub enum SsePayload {
    Json(Value),
    Done,
}

/// One decoded `data:` line together with the most recent `event:` name.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub payload: SsePayload,
}

/// Incremental line decoder for upstream event streams.
///
/// Bytes are buffered until a `\n`-terminated line is available, so frames
/// split across network chunks (or multi-byte characters split across them)
/// decode correctly. Lines that are not `event:`/`data:` are ignored and a
/// `data:` payload that is not JSON is skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = self.decode_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<SseFrame> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(&['\r', '\n'][..]);

        if let Some(event) = line.strip_prefix("event:") {
            self.event = Some(event.trim().to_string());
            return None;
        }

        let data = line.strip_prefix("data:")?.trim();
        if data.is_empty() {
            return None;
        }

        if data == "[DONE]" {
            return Some(SseFrame {
                event: self.event.clone(),
                payload: SsePayload::Done,
            });
        }

        match serde_json::from_str::<Value>(data) {
            Ok(value) => Some(SseFrame {
                event: self.event.clone(),
                payload: SsePayload::Json(value),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed stream frame");
                None
            }
        }
    }
}

pub fn data_line(payload: &Value) -> String {
    format!("data: {}\n\n", payload)
}

pub fn event_line(event: &str, payload: &Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: message_start\r\nda").is_empty());
        assert!(decoder.push(b"ta: {\"type\":").is_empty());

        let frames = decoder.push(b"\"message_start\"}\r\n\r\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("message_start".into()),
                payload: SsePayload::Json(json!({"type": "message_start"})),
            }]
        );
    }

    #[test]
    fn test_done_and_malformed() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: {not json}\n: comment\ndata: [DONE]\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, SsePayload::Done);
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn test_event_name_persists() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: ping\ndata: {}\n\ndata: {\"a\":1}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].event.as_deref(), Some("ping"));
    }

    #[test]
    fn test_multibyte_split() {
        let line = "data: {\"t\":\"h\u{e9}\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        let frames = decoder.push(&line[split..]);
        assert_eq!(frames[0].payload, SsePayload::Json(json!({"t": "h\u{e9}"})));
    }

    #[test]
    fn test_finish_flushes_trailing_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"x\":1}").is_empty());
        assert_eq!(decoder.finish().len(), 1);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_line_helpers() {
        assert_eq!(data_line(&json!({"a": 1})), "data: {\"a\":1}\n\n");
        assert_eq!(
            event_line("message_stop", &json!({"type": "message_stop"})),
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"
        );
    }
}
