//! The reply stream writer and run orchestration.
//!
//! A reply stream has a strict shape: zero or more progress lines, then exactly one
//! terminal line, then nothing. [`Relay`] enforces the shape in the type system (the
//! terminal writers take `self`, so nothing can be written after them), and
//! [`relay_run`] drives a spawned engine through a relay from first byte to exit status.

use std::process::ExitStatus;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::engine::EngineProcess;
use crate::error::{Error, Result};
use crate::protocol;
use crate::scanner::OutputScanner;

/// The writable states of a reply stream.
///
/// The closed state has no variant on purpose: a closed relay does not exist as a value,
/// so there is nothing to call a write method on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// No bytes written yet.
    Open,
    /// At least one progress line written; the terminal line is still pending.
    Emitting,
}

/// A reply stream while it is still writable.
pub struct Relay<W> {
    writer: W,
    state: RelayState,
}

impl<W: AsyncWrite + Unpin> Relay<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            state: RelayState::Open,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Write one progress line and flush it, so the client sees it immediately rather
    /// than when some buffer happens to fill.
    pub async fn progress(&mut self, percent: u8) -> Result<()> {
        let line = protocol::progress_line(percent);
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(Error::Stream)?;
        self.writer.flush().await.map_err(Error::Stream)?;
        self.state = RelayState::Emitting;
        Ok(())
    }

    /// Write the success terminal line and close the stream.
    ///
    /// Taking `self` is what makes "exactly one terminal line, nothing after it" hold:
    /// once the terminal is written the relay is gone.
    pub async fn finish_transcript(self, transcript: &str) -> Result<()> {
        self.close_with(protocol::transcript_line(transcript)).await
    }

    /// Write the failure terminal line and close the stream.
    pub async fn finish_error(self, message: &str) -> Result<()> {
        self.close_with(protocol::error_line(message)).await
    }

    async fn close_with(mut self, line: String) -> Result<()> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(Error::Stream)?;
        self.writer.flush().await.map_err(Error::Stream)?;
        // Shut the writer down so a piped reader sees EOF and the response body ends.
        self.writer.shutdown().await.map_err(Error::Stream)?;
        Ok(())
    }
}

/// The result of a completed engine run, as reported on the reply stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The engine exited 0; the terminal line carried this transcript.
    Transcript(String),
    /// The engine exited non-zero; the terminal line carried this message.
    EngineFailure { message: String },
}

/// Relay one engine run into `relay`, from first output byte to exit status.
///
/// stdout is scanned incrementally: progress markers go out on the wire the moment their
/// line completes, every other line accumulates as transcript. stderr drains concurrently
/// into a side buffer so a chatty engine can never deadlock on a full pipe. The terminal
/// line is written only after stdout hits EOF, stderr is fully drained, and the exit
/// status is known, so late engine output is never lost to an early close.
///
/// An `Err` here means the relay itself broke (usually the client went away). The engine
/// handle is dropped on that path and the process is killed with it.
pub async fn relay_run<W>(mut engine: EngineProcess, mut relay: Relay<W>) -> Result<RunOutcome>
where
    W: AsyncWrite + Unpin,
{
    let mut stdout = engine
        .child
        .stdout
        .take()
        .ok_or_else(|| Error::msg("engine stdout was not piped"))?;
    let stderr = engine
        .child
        .stderr
        .take()
        .ok_or_else(|| Error::msg("engine stderr was not piped"))?;

    let stderr_task = tokio::spawn(drain_to_string(stderr));

    let mut scanner = OutputScanner::new();
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = stdout.read(&mut buf).await.map_err(Error::Stream)?;
        if n == 0 {
            break;
        }
        for percent in scanner.push(&buf[..n]) {
            relay.progress(percent).await?;
        }
    }

    let (trailing, transcript) = scanner.finish();
    for percent in trailing {
        relay.progress(percent).await?;
    }

    let stderr_text = stderr_task.await.unwrap_or_default();
    let status = engine.child.wait().await.map_err(Error::Stream)?;

    if status.success() {
        relay.finish_transcript(&transcript).await?;
        Ok(RunOutcome::Transcript(transcript))
    } else {
        let message = failure_message(&stderr_text, status);
        relay.finish_error(&message).await?;
        Ok(RunOutcome::EngineFailure { message })
    }
}

/// The failure terminal's payload: trimmed stderr, or a description of the exit status
/// when the engine died silently.
fn failure_message(stderr_text: &str, status: ExitStatus) -> String {
    let trimmed = stderr_text.trim();
    if trimmed.is_empty() {
        format!("engine exited with {status}")
    } else {
        trimmed.to_string()
    }
}

/// Read a pipe to EOF, replacing invalid UTF-8. Read errors end the drain early; whatever
/// arrived before them is still returned.
async fn drain_to_string<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    let mut buf = [0u8; 8 * 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
