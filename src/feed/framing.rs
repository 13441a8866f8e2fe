use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Errors from the frame reassembly buffer.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("unterminated frame exceeds {limit} byte ceiling")]
    Overflow { limit: usize },
}

/// Reassembles newline-delimited frames from arbitrary transport chunks.
///
/// A misbehaving or slow server can hold a frame open indefinitely; the
/// byte ceiling bounds how much unterminated data we buffer before the
/// connection is declared broken.
pub struct LineFramer {
    buf: BytesMut,
    max_bytes: usize,
}

impl LineFramer {
    pub fn new(max_bytes: usize) -> Self {
        LineFramer {
            buf: BytesMut::new(),
            max_bytes,
        }
    }

    /// Feed one transport chunk, returning every frame it completed.
    /// Frames have their trailing `\r` stripped but are otherwise raw.
    ///
    /// # Errors
    ///
    /// [`FrameError::Overflow`] once the unterminated remainder passes the
    /// ceiling; the connection should be dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, FrameError> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos); // drop the newline
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            frames.push(String::from_utf8_lossy(&line).into_owned());
        }

        if self.buf.remaining() > self.max_bytes {
            return Err(FrameError::Overflow {
                limit: self.max_bytes,
            });
        }

        Ok(frames)
    }

    /// Bytes currently buffered for an incomplete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Extract the decision payload from one frame, if it carries one.
///
/// Tolerates SSE-style framing: `data:` prefixes are stripped, comment /
/// keep-alive lines (leading `:`) and SSE metadata fields are ignored, as
/// are blank lines.
pub fn event_payload(frame: &str) -> Option<&str> {
    let frame = frame.trim();
    if frame.is_empty() || frame.starts_with(':') {
        return None;
    }
    if let Some(rest) = frame.strip_prefix("data:") {
        return Some(rest.trim_start());
    }
    for meta in ["event:", "id:", "retry:"] {
        if frame.starts_with(meta) {
            return None;
        }
    }
    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_frame() {
        let mut framer = LineFramer::new(1024);
        let frames = framer.push(b"{\"decision\":\"PERMIT\"}\n").unwrap();
        assert_eq!(frames, vec!["{\"decision\":\"PERMIT\"}"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut framer = LineFramer::new(1024);
        assert!(framer.push(b"{\"decision\":").unwrap().is_empty());
        assert!(framer.push(b"\"DENY\"").unwrap().is_empty());
        let frames = framer.push(b"}\n{\"decision\":\"PERMIT\"}\n").unwrap();
        assert_eq!(
            frames,
            vec!["{\"decision\":\"DENY\"}", "{\"decision\":\"PERMIT\"}"]
        );
    }

    #[test]
    fn test_multiple_frames_one_chunk() {
        let mut framer = LineFramer::new(1024);
        let frames = framer.push(b"a\nb\r\nc\n").unwrap();
        assert_eq!(frames, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_overflow_past_ceiling() {
        let mut framer = LineFramer::new(8);
        let err = framer.push(b"0123456789abcdef").unwrap_err();
        assert!(matches!(err, FrameError::Overflow { limit: 8 }));
    }

    #[test]
    fn test_completed_frames_do_not_overflow() {
        let mut framer = LineFramer::new(8);
        // Longer than the ceiling in total, but terminated before the
        // remainder passes it.
        let frames = framer.push(b"0123\n4567\n01").unwrap();
        assert_eq!(frames, vec!["0123", "4567"]);
        assert_eq!(framer.pending(), 2);
    }

    #[test]
    fn test_event_payload_plain_json() {
        assert_eq!(event_payload("{\"a\":1}"), Some("{\"a\":1}"));
    }

    #[test]
    fn test_event_payload_sse_data_prefix() {
        assert_eq!(event_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(event_payload("data:{\"a\":1}"), Some("{\"a\":1}"));
    }

    #[test]
    fn test_event_payload_ignores_noise() {
        assert_eq!(event_payload(""), None);
        assert_eq!(event_payload("   "), None);
        assert_eq!(event_payload(": keep-alive"), None);
        assert_eq!(event_payload("event: decision"), None);
        assert_eq!(event_payload("id: 42"), None);
        assert_eq!(event_payload("retry: 1000"), None);
    }
}
