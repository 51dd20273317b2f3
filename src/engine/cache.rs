// Named, durable cache regions stored on disk. A region is either absent or
// fully populated: population goes through a staging directory that is only
// renamed into place once every URL has been stored.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::populate::fetch_all;
use crate::error::BootError;
use crate::source::traits::Origin;
use crate::status::ProgressEvent;

const MANIFEST_FILE: &str = "manifest.json";
const STAGING_MARKER: &str = ".partial-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

/// A stored response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateOutcome {
    /// The region already existed; nothing was fetched.
    AlreadyPresent,
    Populated { count: usize },
}

/// Read handle on one existing region.
pub struct CacheRegion {
    name: String,
    dir: PathBuf,
    manifest: Manifest,
}

impl CacheRegion {
    fn load(name: &str, dir: PathBuf) -> Result<Self, BootError> {
        let raw = fs::read(dir.join(MANIFEST_FILE))?;
        let manifest = serde_json::from_slice(&raw)?;
        Ok(Self {
            name: name.to_string(),
            dir,
            manifest,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.manifest.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.entries.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.manifest.entries.contains_key(url)
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.manifest.entries.keys().map(String::as_str)
    }

    /// Stored response for `url`, or `None` if this region does not hold it.
    pub async fn get(&self, url: &str) -> Result<Option<CachedResponse>, BootError> {
        let Some(entry) = self.manifest.entries.get(url) else {
            return Ok(None);
        };
        let body = tokio::fs::read(self.dir.join(&entry.file)).await?;
        Ok(Some(CachedResponse {
            content_type: entry.content_type.clone(),
            body: Bytes::from(body),
        }))
    }
}

pub struct CacheStore {
    root: PathBuf,
    origin: Arc<dyn Origin>,
    max_concurrency: u32,
    opened: RwLock<HashMap<String, Arc<CacheRegion>>>,
}

impl CacheStore {
    /// Open the store rooted at `root`, discarding any staging directory left
    /// behind by an interrupted population.
    pub fn new(root: &Path, origin: Arc<dyn Origin>, max_concurrency: u32) -> Result<Self, BootError> {
        fs::create_dir_all(root)?;

        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if name.contains(STAGING_MARKER) || !path.join(MANIFEST_FILE).is_file() {
                warn!("discarding incomplete cache region {}", name);
                if let Err(e) = fs::remove_dir_all(&path) {
                    warn!("failed to remove {}: {}", path.display(), e);
                }
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            origin,
            max_concurrency,
            opened: RwLock::new(HashMap::new()),
        })
    }

    fn region_dir(&self, region: &str) -> Result<PathBuf, BootError> {
        let valid = !region.is_empty()
            && !region.starts_with('.')
            && !region.contains(STAGING_MARKER)
            && !region.contains(['/', '\\']);
        if !valid {
            return Err(BootError::Storage(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid cache region name {:?}", region),
            )));
        }
        Ok(self.root.join(region))
    }

    pub fn exists(&self, region: &str) -> bool {
        self.region_dir(region)
            .map(|dir| dir.join(MANIFEST_FILE).is_file())
            .unwrap_or(false)
    }

    /// Names of all existing regions, sorted.
    pub fn regions(&self) -> Result<Vec<String>, BootError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.exists(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read handle on `region`, or `None` if it is absent.
    pub fn open(&self, region: &str) -> Result<Option<Arc<CacheRegion>>, BootError> {
        if let Some(handle) = self.opened.read().get(region) {
            return Ok(Some(Arc::clone(handle)));
        }
        if !self.exists(region) {
            return Ok(None);
        }

        let handle = Arc::new(CacheRegion::load(region, self.region_dir(region)?)?);
        self.opened
            .write()
            .insert(region.to_string(), Arc::clone(&handle));
        Ok(Some(handle))
    }

    /// Look `url` up across every existing region.
    pub async fn match_url(&self, url: &str) -> Result<Option<CachedResponse>, BootError> {
        for name in self.regions()? {
            if let Some(region) = self.open(&name)? {
                if let Some(hit) = region.get(url).await? {
                    return Ok(Some(hit));
                }
            }
        }
        Ok(None)
    }

    /// Fetch and store every URL of `region` in one all-or-nothing pass.
    ///
    /// An existing region is left untouched and nothing is fetched. If any URL
    /// fails the region stays absent and `PartialFetch` lists the failures.
    pub async fn populate<F>(
        &self,
        region: &str,
        urls: &[String],
        on_progress: F,
    ) -> Result<PopulateOutcome, BootError>
    where
        F: Fn(ProgressEvent) + Send + Sync,
    {
        let target = self.region_dir(region)?;
        if self.exists(region) {
            debug!("region {} already populated, skipping", region);
            return Ok(PopulateOutcome::AlreadyPresent);
        }
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }

        let nonce: u32 = rand::thread_rng().gen();
        let staging = self
            .root
            .join(format!("{}{}{:08x}", region, STAGING_MARKER, nonce));
        tokio::fs::create_dir_all(&staging).await?;

        info!("populating region {} with {} assets", region, urls.len());
        let result = fetch_all(
            &self.origin,
            &staging,
            urls,
            self.max_concurrency,
            &on_progress,
        )
        .await;

        if !result.failed.is_empty() {
            discard(&staging).await;
            return Err(BootError::PartialFetch {
                region: region.to_string(),
                failed: result.failed,
                total: urls.len(),
            });
        }

        let manifest = Manifest {
            entries: result.entries.into_iter().collect(),
        };
        let count = manifest.entries.len();
        if let Err(e) = commit(&staging, &target, &manifest).await {
            discard(&staging).await;
            return Err(e);
        }

        self.opened.write().remove(region);
        info!("region {} populated ({} entries)", region, count);
        Ok(PopulateOutcome::Populated { count })
    }

    /// Drop `region`. Returns whether anything was removed.
    pub fn invalidate(&self, region: &str) -> Result<bool, BootError> {
        let dir = self.region_dir(region)?;
        self.opened.write().remove(region);
        if !dir.exists() {
            return Ok(false);
        }
        // Manifest first, so an interrupted removal still reads as absent.
        let manifest = dir.join(MANIFEST_FILE);
        if manifest.exists() {
            fs::remove_file(&manifest)?;
        }
        fs::remove_dir_all(&dir)?;
        info!("region {} invalidated", region);
        Ok(true)
    }

    /// Drop every region. Returns how many were removed.
    pub fn invalidate_all(&self) -> Result<usize, BootError> {
        let mut removed = 0;
        for name in self.regions()? {
            if self.invalidate(&name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

async fn commit(staging: &Path, target: &Path, manifest: &Manifest) -> Result<(), BootError> {
    let raw = serde_json::to_vec(manifest)?;
    tokio::fs::write(staging.join(MANIFEST_FILE), raw).await?;
    tokio::fs::rename(staging, target).await?;
    Ok(())
}

async fn discard(staging: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(staging).await {
        warn!("failed to remove staging dir {}: {}", staging.display(), e);
    }
}
