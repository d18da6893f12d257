//! Minimal `text/event-stream` line parser (SPEC_FULL.md §4.5.1).
//!
//! Grounded in the teacher's `ai::sse::SseStreamProcessor` channel-buffering design, collapsed
//! to the single shape this runtime's normalized wire format needs: `data: {json}` lines
//! terminated by a literal `data: [DONE]`.

/// Accumulates raw bytes across chunk boundaries and yields complete SSE `data:` payloads.
#[derive(Default)]
pub struct SseLineBuffer {
    pending: String,
}

pub enum SseLine {
    Data(String),
    Done,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line = self.pending[..pos].trim_end_matches('\r').to_string();
            self.pending.drain(..=pos);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    lines.push(SseLine::Done);
                } else if !data.is_empty() {
                    lines.push(SseLine::Data(data.to_string()));
                }
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_line_split_across_chunks() {
        let mut buf = SseLineBuffer::default();
        assert!(buf.push(b"data: {\"a\":").is_empty());
        let lines = buf.push(b"1}\n");
        assert_eq!(lines.len(), 1);
        assert!(matches!(&lines[0], SseLine::Data(s) if s == "{\"a\":1}"));
    }

    #[test]
    fn recognizes_done_sentinel() {
        let mut buf = SseLineBuffer::default();
        let lines = buf.push(b"data: [DONE]\n");
        assert!(matches!(lines[0], SseLine::Done));
    }
}
