//! Ad rendition storage, addressed by URL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;

use crate::{Error, Result};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Text body at `url`, typically an ad media playlist.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

pub struct HttpBlobStore {
    client: Client,
}

impl HttpBlobStore {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::upstream(format!("blob {url} returned {status}")));
        }
        Ok(response.text().await?)
    }
}

/// Blobs held in memory, keyed by exact URL.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, url: impl Into<String>, body: impl Into<String>) {
        self.blobs.write().insert(url.into(), body.into());
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.blobs
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::upstream(format!("blob {url} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_blob_store() {
        let store = InMemoryBlobStore::new();
        store.put("https://cdn.test/a-1/800k.m3u8", "#EXTM3U\n");
        assert_eq!(
            store.fetch_text("https://cdn.test/a-1/800k.m3u8").await.unwrap(),
            "#EXTM3U\n"
        );
        assert!(matches!(
            store.fetch_text("https://cdn.test/missing.m3u8").await,
            Err(Error::Upstream(_))
        ));
    }
}
