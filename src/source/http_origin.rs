use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, Url};
use tracing::{debug, warn};

use super::traits::{BodyStream, Fetched, Origin};

pub struct HttpOrigin {
    client: Client,
    base: Url,
    headers: HashMap<String, String>,
}

impl HttpOrigin {
    pub fn new(base_url: &str, headers: HashMap<String, String>) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| anyhow!("invalid base url: {}", e))?;
        Ok(Self {
            client: Client::new(),
            base,
            headers,
        })
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| anyhow!("cannot resolve {} against {}: {}", path, self.base, e))
    }

    fn build_request(&self, url: Url) -> RequestBuilder {
        let mut req = self.client.get(url);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    async fn send(&self, path: &str) -> Result<Response> {
        let url = self.resolve(path)?;
        let resp = self.build_request(url).send().await?;

        let status = resp.status();
        debug!("http get path={} status={}", path, status.as_u16());
        if !status.is_success() {
            warn!("http get failed status={} path={}", status.as_u16(), path);
            return Err(anyhow!("GET {} failed: HTTP {}", path, status.as_u16()));
        }
        Ok(resp)
    }
}

fn content_type_of(resp: &Response) -> String {
    resp.headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, path: &str) -> Result<Fetched> {
        let resp = self.send(path).await?;
        let content_type = content_type_of(&resp);
        let body = resp.bytes().await?;
        Ok(Fetched { content_type, body })
    }

    async fn fetch_stream(&self, path: &str) -> Result<BodyStream> {
        let resp = self.send(path).await?;
        let content_type = content_type_of(&resp);
        let total = resp.content_length();
        let chunks = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from))
            .boxed();
        Ok(BodyStream {
            content_type,
            total,
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_paths() {
        let origin = HttpOrigin::new("http://127.0.0.1:9000/", HashMap::new()).unwrap();
        assert_eq!(
            origin.resolve("/elemental.js?v=v1-000001").unwrap().as_str(),
            "http://127.0.0.1:9000/elemental.js?v=v1-000001"
        );
        assert_eq!(
            origin.resolve("/").unwrap().as_str(),
            "http://127.0.0.1:9000/"
        );
    }

    #[test]
    fn test_rejects_bad_base() {
        assert!(HttpOrigin::new("not a url", HashMap::new()).is_err());
    }
}
