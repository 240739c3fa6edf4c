use llamadeck_core::ProgressEvent;
use tracing::debug;

/// Incremental decoder for the daemon's newline-delimited JSON pull stream.
///
/// Chunks arrive at arbitrary boundaries; `feed` buffers until a full line is
/// available and emits one event per complete line, in stream order. A line
/// that fails to parse is dropped rather than aborting the stream - one
/// garbled status line must not fail an otherwise healthy multi-gigabyte
/// transfer. A trailing partial line at stream end is never emitted.
#[derive(Debug, Default)]
pub struct ProgressDecoder {
    buf: Vec<u8>,
}

impl ProgressDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProgressEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_line(line: &[u8]) -> Option<ProgressEvent> {
    let trimmed = std::str::from_utf8(line).ok()?.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Dropping malformed status line: {}", e);
            None
        }
    }
}
