use super::{BlobFetcher, ByteStream, FetchError, MediaHost, MediaHostError, RemoteBlob};
use crate::config::MediaHostConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
struct UploadReply {
    url: String,
    public_id: String,
}

/// Client for the remote media host's management API: upload into a folder
/// namespace, delete single blobs, delete whole folders.
pub struct HttpMediaHost {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpMediaHost {
    pub fn new(config: &MediaHostConfig) -> Result<Self, MediaHostError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl MediaHost for HttpMediaHost {
    async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<RemoteBlob, MediaHostError> {
        let part = multipart::Part::stream(data)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| MediaHostError::Decode(e.to_string()))?;

        let form = multipart::Form::new()
            .text("folder", folder.to_string())
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint("upload"))
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaHostError::Status(status));
        }

        let reply: UploadReply = response
            .json()
            .await
            .map_err(|e| MediaHostError::Decode(e.to_string()))?;

        Ok(RemoteBlob {
            url: reply.url,
            public_id: reply.public_id,
        })
    }

    async fn delete_blob(&self, public_id: &str) -> Result<(), MediaHostError> {
        let path = format!("files/{}", urlencoding::encode(public_id));
        let response = self
            .client
            .delete(self.endpoint(&path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaHostError::Status(status));
        }

        Ok(())
    }

    async fn delete_folder(&self, folder: &str) -> Result<(), MediaHostError> {
        let path = format!("folders/{}", urlencoding::encode(folder));
        let response = self
            .client
            .delete(self.endpoint(&path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaHostError::Status(status));
        }

        Ok(())
    }
}

/// Plain HTTP GET access to blob URLs, used by the archive streamer.
pub struct HttpBlobFetcher {
    client: reqwest::Client,
}

impl HttpBlobFetcher {
    pub fn new() -> Result<Self, FetchError> {
        // Deliberately no overall request timeout: a single gallery video can
        // take minutes to drain and download duration is unbounded.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl BlobFetcher for HttpBlobFetcher {
    async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        Ok(Box::pin(response.bytes_stream().map_err(FetchError::from)))
    }
}
