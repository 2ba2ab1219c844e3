//! `lovanote` — a small, focused library for streaming audio transcription services.
//!
//! This crate provides:
//! - Scratch-file staging of uploaded audio (unique names, removal on drop)
//! - Invocation of an external speech-to-text engine as a child process
//! - Incremental scanning of engine stdout for progress markers
//! - A line-oriented reply stream: progress lines, then exactly one terminal line
//! - An upload client for the third-party object store (feature `store`)
//!
//! The library is designed to be used by both CLI tools and long-running services,
//! with an emphasis on clarity, streaming output, and minimal surprises.

// High-level API (most consumers should start here).
pub mod opts;
pub mod transcriber;

// Staging of uploads and engine process management.
pub mod engine;
pub mod staging;

// Engine-output scanning and the reply-line protocol.
pub mod protocol;
pub mod scanner;

// The reply stream writer and run orchestration.
pub mod relay;

// Object-store upload client.
#[cfg(feature = "store")]
pub mod store;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub mod error;

pub use error::{Error, Result};
pub use opts::TranscribeOpts;
pub use transcriber::{Transcriber, TranscriptionRun};

#[cfg(feature = "logging")]
pub use logging::init as init_logging;
