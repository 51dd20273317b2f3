use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub content_type: String,
    pub body: Bytes,
}

/// A response whose body is still arriving.
pub struct BodyStream {
    pub content_type: String,
    /// Advertised body length, when the server sent one.
    pub total: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

/// Where assets, the version token and new bundles come from.
///
/// Paths are origin-relative (`/version`, `/elemental.js?v=...`).
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Fetched>;
    async fn fetch_stream(&self, path: &str) -> Result<BodyStream>;

    async fn fetch_text(&self, path: &str) -> Result<String> {
        let fetched = self.fetch(path).await?;
        Ok(String::from_utf8_lossy(&fetched.body).into_owned())
    }
}
