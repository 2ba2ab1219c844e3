//! High-level API for running transcriptions with Lovanote.
//!
//! We expose a single, ergonomic entry point (`Transcriber`) that wires up
//! staging → engine → scan → relay.
//!
//! The intent is:
//! - We configure once (scratch directory, engine command line).
//! - We run many times, one engine process per run.
//! - Callers choose where the reply stream goes: an HTTP response body, a socket, a
//!   plain buffer in tests.
//!
//! This module is deliberately "high level": the lower-level pieces (staging, engine,
//! scanner, relay) stay testable in their own modules.

use std::path::PathBuf;

use tokio::io::AsyncWrite;

use crate::engine::{EngineConfig, EngineProcess};
use crate::error::Result;
use crate::opts::TranscribeOpts;
use crate::relay::{Relay, RunOutcome, relay_run};
use crate::staging::{ScratchFile, Staging};

/// The main high-level transcription entry point.
///
/// Typical usage:
/// - Construct once (the scratch directory is created here).
/// - Call `start` per upload, then `relay_to` on the returned run.
pub struct Transcriber {
    staging: Staging,
    engine: EngineConfig,
}

impl Transcriber {
    /// Create a transcriber that stages uploads under `scratch_dir` and runs `engine`.
    pub async fn new(scratch_dir: impl Into<PathBuf>, engine: EngineConfig) -> Result<Self> {
        Ok(Self {
            staging: Staging::new(scratch_dir).await?,
            engine,
        })
    }

    /// The engine command line runs are spawned with.
    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    /// The staging area uploads are written to.
    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    /// Stage one upload and start the engine over it.
    ///
    /// Errors here (staging I/O, launch failure) happen before any reply bytes exist, so
    /// callers can still report them out of band. Once a run is returned, engine failures
    /// travel in-band as the reply's terminal line instead. The staged file is removed on
    /// every path, including when the spawn fails.
    pub async fn start(
        &self,
        file_name: &str,
        bytes: &[u8],
        opts: &TranscribeOpts,
    ) -> Result<TranscriptionRun> {
        let scratch = self.staging.stage(file_name, bytes).await?;
        let engine = self.engine.spawn(scratch.path(), opts)?;
        Ok(TranscriptionRun { scratch, engine })
    }
}

/// One staged upload with its engine process running over it.
///
/// The scratch file outlives the engine by construction: it drops (and its file goes
/// away) only after the run completes or is abandoned.
pub struct TranscriptionRun {
    scratch: ScratchFile,
    engine: EngineProcess,
}

impl TranscriptionRun {
    /// The staged audio file the engine was pointed at.
    pub fn scratch_path(&self) -> &std::path::Path {
        self.scratch.path()
    }

    /// Relay engine progress and the terminal line into `writer` until the run is done.
    ///
    /// Dropping the future (or hitting a write error because the client went away) kills
    /// the engine and removes the staged file.
    pub async fn relay_to<W>(self, writer: W) -> Result<RunOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        let TranscriptionRun { scratch, engine } = self;
        let outcome = relay_run(engine, Relay::new(writer)).await;
        drop(scratch);
        outcome
    }
}
