//! Staging of uploaded audio onto the local filesystem.
//!
//! The engine only accepts a file path, so every upload is written to a scratch file
//! before the engine starts. Scratch files are namespaced per request with a UUID prefix
//! and removed when their guard drops, so concurrent uploads of the same file name never
//! collide and nothing outlives its request.

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Where scratch files live and how they are named.
#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    /// Create a staging area rooted at `dir`, creating the directory if missing.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(Error::Staging)?;
        Ok(Self { dir })
    }

    /// The directory scratch files are written under.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a fresh scratch file named after `original_name`.
    ///
    /// The file name is `<uuid>_<name>`, where `<name>` is the final path component of
    /// `original_name` (anything resembling a directory is discarded). The returned guard
    /// removes the file on drop.
    pub async fn stage(&self, original_name: &str, bytes: &[u8]) -> Result<ScratchFile> {
        let name = sanitize_file_name(original_name);
        let path = self
            .dir
            .join(format!("{}_{}", Uuid::new_v4().simple(), name));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(Error::Staging)?;
        Ok(ScratchFile { path })
    }
}

/// RAII guard for one staged upload.
///
/// Removal rides the drop, so every exit path of a request (success, engine failure,
/// abandoned connection) deletes the file without any caller bookkeeping.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// The path handed to the engine as its positional argument.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove scratch file");
            }
        }
    }
}

/// Reduce an upload's file name to a bare name safe to join under the scratch directory.
fn sanitize_file_name(original: &str) -> String {
    let trimmed = original.trim();
    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    if base.is_empty() {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stage_writes_bytes_under_the_scratch_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = Staging::new(dir.path()).await?;

        let scratch = staging.stage("clip.wav", b"fake audio").await?;
        assert!(scratch.path().starts_with(dir.path()));
        assert_eq!(std::fs::read(scratch.path())?, b"fake audio");

        let name = scratch
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .expect("scratch file has a utf-8 name")
            .to_string();
        assert!(name.ends_with("_clip.wav"));
        Ok(())
    }

    #[tokio::test]
    async fn identical_names_never_collide() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = Staging::new(dir.path()).await?;

        let first = staging.stage("clip.wav", b"one").await?;
        let second = staging.stage("clip.wav", b"two").await?;

        assert_ne!(first.path(), second.path());
        assert_eq!(std::fs::read(first.path())?, b"one");
        assert_eq!(std::fs::read(second.path())?, b"two");
        Ok(())
    }

    #[tokio::test]
    async fn drop_removes_the_scratch_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = Staging::new(dir.path()).await?;

        let scratch = staging.stage("clip.wav", b"bytes").await?;
        let path = scratch.path().to_path_buf();
        assert!(path.exists());

        drop(scratch);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn new_creates_a_missing_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("a/b/scratch");

        let staging = Staging::new(&nested).await?;
        assert!(nested.is_dir());
        assert_eq!(staging.dir(), nested.as_path());
        Ok(())
    }

    #[test]
    fn sanitize_file_name_keeps_only_the_final_component() {
        assert_eq!(sanitize_file_name("clip.wav"), "clip.wav");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\recordings\\voice.mp3"), "voice.mp3");
        assert_eq!(sanitize_file_name("dir/"), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
        assert_eq!(sanitize_file_name("   "), "upload");
    }
}
