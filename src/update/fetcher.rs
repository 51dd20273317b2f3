// Streams a new code bundle and reports byte-level progress.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::BootError;
use crate::source::traits::{BodyStream, Origin};
use crate::status::ProgressEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    Progress(ProgressEvent),
    /// Full payload; always the last item of a successful fetch.
    Done(Bytes),
}

enum FetchState {
    Connect {
        origin: Arc<dyn Origin>,
        url: String,
    },
    Streaming {
        url: String,
        body: BodyStream,
        buf: BytesMut,
    },
    Finished,
}

pub struct UpdatePackageFetcher {
    origin: Arc<dyn Origin>,
}

impl UpdatePackageFetcher {
    pub fn new(origin: Arc<dyn Origin>) -> Self {
        Self { origin }
    }

    /// One fetch attempt as a finite stream. It cannot be resumed: any error
    /// ends the stream and the next attempt starts from byte zero.
    pub fn fetch(&self, url: &str) -> BoxStream<'static, Result<FetchEvent, BootError>> {
        let start = FetchState::Connect {
            origin: Arc::clone(&self.origin),
            url: url.to_string(),
        };

        stream::unfold(start, |state| async move {
            match state {
                FetchState::Connect { origin, url } => match origin.fetch_stream(&url).await {
                    Ok(body) => {
                        let first = ProgressEvent::new(0, body.total);
                        let capacity = body.total.unwrap_or(0).min(64 * 1024 * 1024) as usize;
                        let next = FetchState::Streaming {
                            url,
                            body,
                            buf: BytesMut::with_capacity(capacity),
                        };
                        Some((Ok(FetchEvent::Progress(first)), next))
                    }
                    Err(e) => {
                        warn!("bundle fetch {} failed: {}", url, e);
                        Some((Err(BootError::network(&url, e)), FetchState::Finished))
                    }
                },
                FetchState::Streaming {
                    url,
                    mut body,
                    mut buf,
                } => match body.chunks.next().await {
                    Some(Ok(chunk)) => {
                        buf.extend_from_slice(&chunk);
                        let event = ProgressEvent::new(buf.len() as u64, body.total);
                        Some((
                            Ok(FetchEvent::Progress(event)),
                            FetchState::Streaming { url, body, buf },
                        ))
                    }
                    Some(Err(e)) => {
                        warn!("bundle stream {} broke after {} bytes: {}", url, buf.len(), e);
                        Some((Err(BootError::network(&url, e)), FetchState::Finished))
                    }
                    None => {
                        let received = buf.len() as u64;
                        if let Some(expected) = body.total {
                            if received < expected {
                                let err = BootError::Aborted {
                                    url,
                                    received,
                                    expected,
                                };
                                return Some((Err(err), FetchState::Finished));
                            }
                        }
                        debug!("bundle {} complete ({} bytes)", url, received);
                        Some((Ok(FetchEvent::Done(buf.freeze())), FetchState::Finished))
                    }
                },
                FetchState::Finished => None,
            }
        })
        .boxed()
    }

    /// Drain a fetch, forwarding progress, and return the payload.
    pub async fn download<F>(&self, url: &str, mut on_progress: F) -> Result<Bytes, BootError>
    where
        F: FnMut(ProgressEvent),
    {
        let mut events = self.fetch(url);
        while let Some(event) = events.next().await {
            match event? {
                FetchEvent::Progress(p) => on_progress(p),
                FetchEvent::Done(payload) => return Ok(payload),
            }
        }
        Err(BootError::network(url, "stream ended without payload"))
    }
}
