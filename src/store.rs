//! Upload client for the third-party object store.
//!
//! The browser flow stores the raw recording before transcription so users can revisit
//! it later. We use the store's unsigned upload endpoint: the file reference (a base64
//! data URI or a remote URL) goes up as a form field together with an upload preset, and
//! the store replies with the stored object's URL. The store sniffs the resource type
//! itself, which is why the endpoint path says `auto`.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Connection settings for the object store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    cloud_name: String,
    upload_preset: String,
    folder: String,
    upload_url: Option<String>,
}

impl StoreConfig {
    /// Configure a store client for `cloud_name` using the given unsigned upload preset.
    ///
    /// Uploads land in the `lovanote` folder unless [`StoreConfig::with_folder`] says
    /// otherwise.
    pub fn new(cloud_name: impl Into<String>, upload_preset: impl Into<String>) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            upload_preset: upload_preset.into(),
            folder: "lovanote".to_string(),
            upload_url: None,
        }
    }

    /// Read settings from the environment.
    ///
    /// `CLOUDINARY_CLOUD_NAME` and `CLOUDINARY_UPLOAD_PRESET` are required.
    /// `LOVANOTE_UPLOAD_FOLDER` overrides the upload folder, and
    /// `CLOUDINARY_UPLOAD_URL` overrides the endpoint itself (tests use this to point at
    /// a local server).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new(
            require_env("CLOUDINARY_CLOUD_NAME")?,
            require_env("CLOUDINARY_UPLOAD_PRESET")?,
        );
        if let Ok(folder) = std::env::var("LOVANOTE_UPLOAD_FOLDER") {
            if !folder.trim().is_empty() {
                config = config.with_folder(folder);
            }
        }
        if let Ok(url) = std::env::var("CLOUDINARY_UPLOAD_URL") {
            if !url.trim().is_empty() {
                config = config.with_upload_url(url);
            }
        }
        Ok(config)
    }

    /// Store uploads under `folder` instead of the default.
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Send uploads to `url` instead of the store's public endpoint.
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = Some(url.into());
        self
    }

    /// The endpoint uploads go to.
    pub fn endpoint(&self) -> String {
        match &self.upload_url {
            Some(url) => url.clone(),
            None => format!(
                "https://api.cloudinary.com/v1_1/{}/auto/upload",
                self.cloud_name
            ),
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!("{key} is not set"))),
    }
}

/// What the store's upload endpoint returns on success.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

/// Async client for store uploads.
pub struct StoreClient {
    config: StoreConfig,
    http: reqwest::Client,
}

impl StoreClient {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("lovanote-server")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| Error::Config(format!("http client: {err}")))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Upload one file reference and return the stored object's URL.
    ///
    /// `file` is passed through to the store untouched; the store accepts both base64
    /// data URIs and remote URLs in that field.
    pub async fn upload(&self, file: &str) -> Result<String> {
        let form = reqwest::multipart::Form::new()
            .text("file", file.to_string())
            .text("upload_preset", self.config.upload_preset.clone())
            .text("folder", self.config.folder.clone());

        let response = self
            .http
            .post(self.config.endpoint())
            .multipart(form)
            .send()
            .await
            .map_err(|err| Error::Upload(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.trim();
            return Err(Error::Upload(if detail.is_empty() {
                format!("store returned {status}")
            } else {
                format!("store returned {status}: {detail}")
            }));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|err| Error::Upload(err.to_string()))?;
        debug!(url = %parsed.secure_url, "stored upload");
        Ok(parsed.secure_url)
    }
}
