mod client;

pub use client::{HttpBlobFetcher, HttpMediaHost};

use crate::constants::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use thiserror::Error;

/// A blob accepted by the remote media host. The `public_id` is the host's
/// storage identifier and is sufficient on its own to delete the blob later.
#[derive(Debug, Clone)]
pub struct RemoteBlob {
    pub url: String,
    pub public_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Classify an upload by its declared content type, falling back to the
/// filename extension when the client sent none.
pub fn classify_media(content_type: Option<&str>, file_name: &str) -> Option<MediaKind> {
    if let Some(ct) = content_type {
        if ct.starts_with("image/") {
            return Some(MediaKind::Image);
        }
        if ct.starts_with("video/") {
            return Some(MediaKind::Video);
        }
    }

    let extension = file_name
        .rfind('.')
        .map(|i| file_name[i..].to_ascii_lowercase())?;

    if IMAGE_EXTENSIONS.contains(extension.as_str()) {
        return Some(MediaKind::Image);
    }
    if VIDEO_EXTENSIONS.contains(extension.as_str()) {
        return Some(MediaKind::Video);
    }

    match mime_guess::from_path(file_name).first() {
        Some(mime) if mime.type_() == mime_guess::mime::IMAGE => Some(MediaKind::Image),
        Some(mime) if mime.type_() == mime_guess::mime::VIDEO => Some(MediaKind::Video),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum MediaHostError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("media host returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("media host returned an unreadable response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Store a blob under the given folder namespace and return its remote
    /// references.
    async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<RemoteBlob, MediaHostError>;

    async fn delete_blob(&self, public_id: &str) -> Result<(), MediaHostError>;

    async fn delete_folder(&self, folder: &str) -> Result<(), MediaHostError>;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote store returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("stream interrupted: {0}")]
    Interrupted(String),
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// Read access to remotely stored blobs. May fail when the stream is opened
/// or at any point while it is being consumed.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError>;
}
