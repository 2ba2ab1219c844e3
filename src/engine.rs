//! Launching the external speech-to-text engine.
//!
//! The engine is any executable that takes an audio file path as a positional argument,
//! reports progress on stdout as `Progress: <n>%` lines, prints the transcript on stdout,
//! and reports failures on stderr with a non-zero exit. We only ever run one engine
//! process per request; pooling and retries are the operator's concern.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{Error, Result};
use crate::opts::TranscribeOpts;

/// The engine command line: a program plus its leading arguments.
///
/// The default reproduces the canonical deployment (`python3 whisper-transcribe.py
/// <audio>`); operators point this at whatever engine they actually run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    program: OsString,
    args: Vec<OsString>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("python3", ["whisper-transcribe.py"])
    }
}

impl EngineConfig {
    /// Configure an engine as `program` followed by `args`.
    ///
    /// The audio path and any per-run options are appended after `args` at spawn time.
    pub fn new<P, A, S>(program: P, args: A) -> Self
    where
        P: Into<OsString>,
        A: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The executable this engine runs.
    pub fn program(&self) -> &OsString {
        &self.program
    }

    /// Spawn one engine process over `audio_path`.
    ///
    /// stdout and stderr are piped, stdin is closed. The child is killed if its handle is
    /// dropped before it exits, so an abandoned request does not leave an engine running.
    /// A spawn failure means the engine never started; it maps to
    /// [`Error::EngineUnavailable`] so callers can report it out of band.
    pub fn spawn(&self, audio_path: &Path, opts: &TranscribeOpts) -> Result<EngineProcess> {
        let mut command = Command::new(&self.program);
        command
            .args(self.run_args(audio_path, opts))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %self.program.to_string_lossy(),
            audio = %audio_path.display(),
            "spawning engine"
        );

        let child = command.spawn().map_err(Error::EngineUnavailable)?;
        Ok(EngineProcess { child })
    }

    /// Arguments for one run: the leading args, the audio path, then per-run options.
    fn run_args(&self, audio_path: &Path, opts: &TranscribeOpts) -> Vec<OsString> {
        let mut args = self.args.clone();
        args.push(audio_path.as_os_str().to_os_string());
        if let Some(language) = &opts.language {
            args.push("--language".into());
            args.push(language.into());
        }
        if let Some(model) = &opts.model {
            args.push("--model".into());
            args.push(model.into());
        }
        args
    }
}

/// A running engine process with its stdio pipes attached.
pub struct EngineProcess {
    pub(crate) child: Child,
}

impl EngineProcess {
    /// The OS process id, when the engine is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_canonical_deployment() {
        let config = EngineConfig::default();
        assert_eq!(config.program(), "python3");
        assert_eq!(config.args, vec![OsString::from("whisper-transcribe.py")]);
    }

    #[test]
    fn run_args_appends_path_then_options() {
        let config = EngineConfig::new("engine", ["--quiet"]);
        let opts = TranscribeOpts {
            language: Some("en".to_string()),
            model: Some("base".to_string()),
        };

        let args = config.run_args(Path::new("/tmp/a.wav"), &opts);
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["--quiet", "/tmp/a.wav", "--language", "en", "--model", "base"]
        );
    }

    #[test]
    fn run_args_without_options_is_just_the_path() {
        let config = EngineConfig::new("engine", Vec::<String>::new());
        let args = config.run_args(Path::new("a.wav"), &TranscribeOpts::default());
        assert_eq!(args, vec![OsString::from("a.wav")]);
    }

    #[tokio::test]
    async fn spawn_of_a_missing_binary_is_engine_unavailable() {
        let config = EngineConfig::new("/definitely/not/a/real/engine", Vec::<String>::new());
        let err = config
            .spawn(Path::new("a.wav"), &TranscribeOpts::default())
            .err()
            .expect("expected spawn to fail");
        assert!(err.is_engine_unavailable());
    }
}
