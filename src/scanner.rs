//! Incremental scanning of engine stdout.
//!
//! Engine output arrives as raw byte chunks with no alignment guarantees: a progress
//! marker can be split across reads, and a multi-byte UTF-8 sequence can straddle a chunk
//! boundary. We buffer bytes and only interpret whole lines (split at `\n`, which is
//! unambiguous in UTF-8), so neither kind of split corrupts the scan.
//!
//! Classification is per line: a line that is exactly a `Progress: <n>%` marker becomes a
//! progress update and is consumed; every other line accumulates into the transcript.
//! Each marker is seen once because its bytes are drained as soon as the line completes.

use crate::protocol::parse_progress_line;

/// Splits engine stdout into progress updates and transcript text.
#[derive(Debug, Default)]
pub struct OutputScanner {
    pending: Vec<u8>,
    transcript: String,
}

impl OutputScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of engine stdout.
    ///
    /// Returns the progress percentages whose marker lines were completed by this chunk,
    /// in the order the engine printed them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(chunk);

        let mut updates = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.classify(&line[..line.len() - 1], &mut updates);
        }
        updates
    }

    /// Flush a trailing line that never received its newline, then hand back the
    /// transcript accumulated from all non-marker lines, trimmed.
    pub fn finish(mut self) -> (Vec<u8>, String) {
        let mut updates = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.classify(&line, &mut updates);
        }
        let transcript = self.transcript.trim().to_string();
        (updates, transcript)
    }

    fn classify(&mut self, line: &[u8], updates: &mut Vec<u8>) {
        let raw = String::from_utf8_lossy(line);
        // Tolerate CRLF engine output.
        let text = raw.strip_suffix('\r').unwrap_or(&raw);

        if let Some(percent) = parse_progress_line(text) {
            updates.push(percent);
            return;
        }

        if !self.transcript.is_empty() {
            self.transcript.push('\n');
        }
        self.transcript.push_str(text);
    }
}
