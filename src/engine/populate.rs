// Concurrent fetch-and-store of every URL of a region into a staging directory.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::cache::ManifestEntry;
use crate::source::traits::Origin;
use crate::status::ProgressEvent;

/// Outcome of one bulk fetch: stored entries, and the URLs that failed.
pub(crate) struct FetchAll {
    pub entries: Vec<(String, ManifestEntry)>,
    pub failed: Vec<String>,
}

/// Fetch every URL into `staging`, at most `max_concurrency` at a time.
///
/// All URLs are allowed to settle before returning, so `failed` is complete.
/// `on_progress` sees `completed/total` after each URL, in completion order.
pub(crate) async fn fetch_all<F>(
    origin: &Arc<dyn Origin>,
    staging: &Path,
    urls: &[String],
    max_concurrency: u32,
    on_progress: &F,
) -> FetchAll
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    let semaphore = Arc::new(Semaphore::new((max_concurrency as usize).max(1)));
    let completed = AtomicUsize::new(0);
    let total = urls.len() as u64;

    let tasks = urls.iter().enumerate().map(|(index, url)| {
        let semaphore = Arc::clone(&semaphore);
        let completed = &completed;
        async move {
            let result = fetch_one(origin, staging, index, url, &semaphore).await;
            match &result {
                Ok(entry) => {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!("cached {} ({} bytes) {}/{}", url, entry.size, done, total);
                    on_progress(ProgressEvent::new(done as u64, Some(total)));
                }
                Err(e) => warn!("caching {} failed: {}", url, e),
            }
            (url.clone(), result)
        }
    });

    let mut entries = Vec::with_capacity(urls.len());
    let mut failed = Vec::new();
    for (url, result) in join_all(tasks).await {
        match result {
            Ok(entry) => entries.push((url, entry)),
            Err(_) => failed.push(url),
        }
    }

    FetchAll { entries, failed }
}

async fn fetch_one(
    origin: &Arc<dyn Origin>,
    staging: &Path,
    index: usize,
    url: &str,
    semaphore: &Semaphore,
) -> Result<ManifestEntry> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|e| anyhow!("{}", e))?;

    let fetched = origin.fetch(url).await?;
    let file = format!("{:06}.body", index);
    tokio::fs::write(staging.join(&file), &fetched.body).await?;

    Ok(ManifestEntry {
        file,
        content_type: fetched.content_type,
        size: fetched.body.len() as u64,
    })
}
