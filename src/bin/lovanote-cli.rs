// A small CLI client for a lovanote server: upload an audio file, watch the
// transcription progress, print the transcript.

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use reqwest::blocking::multipart::{Form, Part};
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use lovanote::protocol::{ReplyReader, Terminal};

#[derive(Parser, Debug)]
#[command(name = "lovanote-cli")]
#[command(about = "Send an audio file to a lovanote server and stream the transcription", long_about = None)]
struct Args {
    /// Audio file to transcribe (mp3, wav, or m4a).
    #[arg(long)]
    audio: PathBuf,

    /// Server base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Language hint forwarded to the engine (e.g. "en").
    #[arg(long)]
    language: Option<String>,

    /// Engine model name forwarded to the engine (e.g. "base").
    #[arg(long)]
    model: Option<String>,
}

fn main() -> Result<()> {
    lovanote::init_logging();
    let args = Args::parse();

    let bytes = fs::read(&args.audio)
        .with_context(|| format!("failed to read audio file: {}", args.audio.display()))?;
    let file_name = args
        .audio
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload.wav")
        .to_string();

    let client = Client::builder()
        .user_agent("lovanote-cli")
        // Streaming replies can outlive any fixed request timeout.
        .timeout(None)
        .build()
        .context("failed to build HTTP client")?;

    let url = transcribe_url(&args.server);

    let mut form = Form::new().part("audio", Part::bytes(bytes).file_name(file_name));
    if let Some(language) = &args.language {
        form = form.text("language", language.clone());
    }
    if let Some(model) = &args.model {
        form = form.text("model", model.clone());
    }

    println!("⬆️  uploading {}", args.audio.display());

    let resp = client
        .post(&url)
        .multipart(form)
        .send()
        .with_context(|| format!("request failed: {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        bail!("server rejected the upload ({status}): {}", body.trim());
    }

    match stream_reply(resp)? {
        Terminal::Transcript(text) => {
            println!("{}", text.trim_end());
            Ok(())
        }
        Terminal::Failure(message) => {
            bail!("transcription failed: {}", message.trim_end());
        }
    }
}

fn transcribe_url(server: &str) -> String {
    format!("{}/api/transcribe", server.trim_end_matches('/'))
}

/// Read a reply stream incrementally, rendering progress lines as they arrive.
fn stream_reply<R: Read>(mut resp: R) -> Result<Terminal> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {percent:>3}% {bar:40.cyan/blue}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut reader = ReplyReader::new();
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for percent in reader.push(&buf[..n]) {
            pb.set_position(u64::from(percent));
        }
    }
    pb.finish_and_clear();

    reader
        .finish()
        .context("reply stream ended before a terminal line")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcribe_url_tolerates_a_trailing_slash() {
        assert_eq!(
            transcribe_url("http://127.0.0.1:8080"),
            "http://127.0.0.1:8080/api/transcribe"
        );
        assert_eq!(
            transcribe_url("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080/api/transcribe"
        );
    }

    #[test]
    fn stream_reply_reads_progress_then_the_transcript() -> Result<()> {
        let wire = b"Progress: 10%\nProgress: 80%\nTranscription: hello world";
        let terminal = stream_reply(std::io::Cursor::new(wire.to_vec()))?;
        assert_eq!(terminal, Terminal::Transcript("hello world".to_string()));
        Ok(())
    }

    #[test]
    fn stream_reply_reports_engine_failures() -> Result<()> {
        let wire = b"Error: engine crashed";
        let terminal = stream_reply(std::io::Cursor::new(wire.to_vec()))?;
        assert_eq!(terminal, Terminal::Failure("engine crashed".to_string()));
        Ok(())
    }

    #[test]
    fn stream_reply_rejects_a_truncated_stream() {
        let wire = b"Progress: 10%\nTransc";
        let err = stream_reply(std::io::Cursor::new(wire.to_vec()))
            .err()
            .expect("expected a truncated-stream error");
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn args_require_an_audio_path() {
        let err = Args::try_parse_from(["lovanote-cli"])
            .err()
            .expect("expected missing-args error");
        assert!(err.to_string().contains("--audio"));

        let args = Args::try_parse_from(["lovanote-cli", "--audio", "clip.wav"])
            .expect("parse minimal args");
        assert_eq!(args.audio, PathBuf::from("clip.wav"));
        assert_eq!(args.server, "http://127.0.0.1:8080");
        assert!(args.language.is_none());
        assert!(args.model.is_none());
    }
}
