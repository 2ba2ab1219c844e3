//! The reply-line protocol shared by the server and its clients.
//!
//! A transcription reply is a plain-text stream of newline-terminated progress lines
//! followed by exactly one unterminated terminal line:
//!
//! ```text
//! Progress: 10%
//! Progress: 50%
//! Transcription: <transcript>
//! ```
//!
//! When the engine fails the terminal line is `Error: <reason>` instead. Nothing ever
//! follows a terminal line. The same `Progress: <n>%` grammar doubles as the engine's
//! stdout marker format, so this module owns the parser for both directions.

/// Prefix of the success terminal line.
pub const TRANSCRIPT_PREFIX: &str = "Transcription: ";

/// Prefix of the failure terminal line.
pub const ERROR_PREFIX: &str = "Error: ";

/// Render one progress line, newline included.
pub fn progress_line(percent: u8) -> String {
    format!("Progress: {percent}%\n")
}

/// Render the success terminal line. No trailing newline: nothing follows a terminal.
pub fn transcript_line(text: &str) -> String {
    format!("{TRANSCRIPT_PREFIX}{text}")
}

/// Render the failure terminal line. No trailing newline, like [`transcript_line`].
pub fn error_line(message: &str) -> String {
    format!("{ERROR_PREFIX}{message}")
}

/// Parse a whole line as a progress marker.
///
/// The grammar is strict: optional surrounding whitespace, the literal `Progress:`,
/// optional spaces, an integer in `0..=100`, a literal `%`, end of line. Anything else
/// (including lines that merely *contain* a marker) is not a match and stays ordinary
/// text.
pub fn parse_progress_line(line: &str) -> Option<u8> {
    let rest = line.trim().strip_prefix("Progress:")?;
    let digits = rest.trim_start().strip_suffix('%')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = digits.parse().ok()?;
    (value <= 100).then_some(value as u8)
}

/// What a reply stream's terminal line carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// The engine finished and this is its transcript.
    Transcript(String),
    /// The engine failed and this is the reported reason.
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminalKind {
    Transcript,
    Failure,
}

/// Incremental parser for a transcription reply stream.
///
/// Feed it chunks as they arrive off the wire; it yields progress percentages until the
/// terminal marker shows up, then collects everything after the marker as the terminal
/// payload. A transcript may itself contain newlines, so once the marker is seen the rest
/// of the stream is payload verbatim.
///
/// Buffered bytes are dropped as their lines complete, so long replies never accumulate
/// beyond the current line plus the terminal payload.
#[derive(Debug, Default)]
pub struct ReplyReader {
    pending: Vec<u8>,
    terminal: Option<TerminalKind>,
    payload: Vec<u8>,
}

impl ReplyReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns the progress percentages completed by it, in wire order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut updates = Vec::new();

        if self.terminal.is_some() {
            self.payload.extend_from_slice(chunk);
            return updates;
        }

        self.pending.extend_from_slice(chunk);
        loop {
            // `pending` always starts at a line boundary here, so a terminal marker can
            // only appear at its front.
            if let Some(kind) = self.take_terminal_prefix() {
                self.terminal = Some(kind);
                self.payload = std::mem::take(&mut self.pending);
                break;
            }

            let Some(pos) = self.pending.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(percent) = parse_progress_line(&line) {
                updates.push(percent);
            }
            // Any other complete line is outside the protocol; drop it.
        }

        updates
    }

    /// Consume the reader at end of stream.
    ///
    /// Returns `None` when the stream ended before any terminal marker (a truncated
    /// reply).
    pub fn finish(self) -> Option<Terminal> {
        let kind = self.terminal?;
        let payload = String::from_utf8_lossy(&self.payload).into_owned();
        Some(match kind {
            TerminalKind::Transcript => Terminal::Transcript(payload),
            TerminalKind::Failure => Terminal::Failure(payload),
        })
    }

    /// Whether the terminal marker has been seen.
    pub fn saw_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    fn take_terminal_prefix(&mut self) -> Option<TerminalKind> {
        for (prefix, kind) in [
            (TRANSCRIPT_PREFIX, TerminalKind::Transcript),
            (ERROR_PREFIX, TerminalKind::Failure),
        ] {
            if self.pending.starts_with(prefix.as_bytes()) {
                self.pending.drain(..prefix.len());
                return Some(kind);
            }
        }
        None
    }
}
