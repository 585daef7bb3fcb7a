//! Live content playlists from the origin.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use url::Url;

use crate::config::ChannelKey;
use crate::{Error, Result};

#[async_trait]
pub trait OriginSource: Send + Sync {
    /// Current media playlist for `variant` of the channel.
    async fn media_playlist(&self, key: &ChannelKey, variant: &str) -> Result<String>;
}

/// Fetches `<base>/<org>/<channel>/<variant>`.
pub struct HttpOriginSource {
    client: Client,
    base: Url,
}

impl HttpOriginSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid origin url {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    pub fn playlist_url(&self, key: &ChannelKey, variant: &str) -> Result<Url> {
        self.base
            .join(&format!("{}/{}/{}", key.org, key.channel, variant))
            .map_err(|e| Error::validation(format!("invalid playlist path for {key}: {e}")))
    }
}

#[async_trait]
impl OriginSource for HttpOriginSource {
    async fn media_playlist(&self, key: &ChannelKey, variant: &str) -> Result<String> {
        let url = self.playlist_url(key, variant)?;
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::upstream(format!("origin {url} returned {status}")));
        }
        Ok(response.text().await?)
    }
}

/// Fixed playlists per channel and variant.
#[derive(Default)]
pub struct StaticOriginSource {
    playlists: RwLock<HashMap<(ChannelKey, String), String>>,
}

impl StaticOriginSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: ChannelKey, variant: impl Into<String>, playlist: impl Into<String>) {
        self.playlists
            .write()
            .insert((key, variant.into()), playlist.into());
    }
}

#[async_trait]
impl OriginSource for StaticOriginSource {
    async fn media_playlist(&self, key: &ChannelKey, variant: &str) -> Result<String> {
        self.playlists
            .read()
            .get(&(key.clone(), variant.to_string()))
            .cloned()
            .ok_or_else(|| Error::upstream(format!("no playlist for {key}/{variant}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_url_joins_base() {
        let key = ChannelKey::new("acme", "news");
        let origin = HttpOriginSource::new("http://origin.test/live", Duration::from_secs(1)).unwrap();
        assert_eq!(
            origin.playlist_url(&key, "800k.m3u8").unwrap().as_str(),
            "http://origin.test/live/acme/news/800k.m3u8"
        );
        assert!(HttpOriginSource::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_static_origin() {
        let key = ChannelKey::new("acme", "news");
        let origin = StaticOriginSource::new();
        origin.set(key.clone(), "800k.m3u8", "#EXTM3U\n");
        assert_eq!(origin.media_playlist(&key, "800k.m3u8").await.unwrap(), "#EXTM3U\n");
        assert!(origin.media_playlist(&key, "1600k.m3u8").await.is_err());
    }
}
