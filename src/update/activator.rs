// Activation of freshly downloaded code. The successor runs as its own process
// and confirms it has taken over with a handshake line on stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::handoff::{BootContext, CacheKey};
use crate::config::{ActivatorConfig, BUNDLES_DIR, HANDOFF_ENV, HANDSHAKE_READY_LINE};
use crate::error::BootError;

/// A downloaded code bundle ready to be activated.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub version: String,
    pub cache_key: CacheKey,
    pub bytes: Bytes,
}

impl Bundle {
    pub fn text(&self) -> Result<&str, BootError> {
        std::str::from_utf8(&self.bytes)
            .map_err(|e| BootError::Activation(format!("bundle is not valid UTF-8: {}", e)))
    }
}

/// Proof that control now belongs to the successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub version: String,
    pub cache_key: CacheKey,
    /// OS process id of the successor, when it runs out of process.
    pub pid: Option<u32>,
}

/// Starts new code and hands it the boot context.
///
/// `Ok` means the successor owns the boot from now on and the caller must
/// stop. On `Err` the caller still owns the boot and keeps running.
#[async_trait]
pub trait CodeActivator: Send + Sync {
    async fn activate(&self, bundle: Bundle, context: BootContext) -> Result<Handoff, BootError>;

    /// Drop material left by earlier activations, keeping the running
    /// `keep` build. Returns how many entries were removed.
    async fn prune(&self, _keep: &CacheKey) -> Result<usize, BootError> {
        Ok(0)
    }
}

pub struct ProcessActivator {
    bundles_dir: PathBuf,
    bundle_file: String,
    interpreter: Option<String>,
}

impl ProcessActivator {
    pub fn new(state_dir: &Path, config: &ActivatorConfig) -> Self {
        Self {
            bundles_dir: state_dir.join(BUNDLES_DIR),
            bundle_file: config.bundle_file.clone(),
            interpreter: config.interpreter.clone(),
        }
    }

    fn bundle_dir(&self, key: &CacheKey) -> PathBuf {
        self.bundles_dir.join(key.as_str())
    }

    async fn write_bundle(&self, bundle: &Bundle) -> Result<PathBuf, BootError> {
        let dir = self.bundle_dir(&bundle.cache_key);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&self.bundle_file);
        tokio::fs::write(&path, &bundle.bytes).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(path)
    }

    fn command(&self, path: &Path) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(path);
                cmd
            }
            None => Command::new(path),
        }
    }

    /// Write, spawn and wait for the handshake.
    async fn launch(&self, bundle: Bundle, context: BootContext) -> Result<Handoff, BootError> {
        let path = self.write_bundle(&bundle).await?;
        let entry = context.entry().to_json()?;

        let mut child = self
            .command(&path)
            .env(HANDOFF_ENV, &entry)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| BootError::Activation(format!("spawn {}: {}", path.display(), e)))?;
        let pid = child.id();
        info!("successor {} started pid={:?}", path.display(), pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BootError::Activation("successor stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(line) => line,
                Err(e) => {
                    if let Err(kill) = child.start_kill() {
                        debug!("killing successor pid={:?}: {}", pid, kill);
                    }
                    return Err(BootError::Activation(format!(
                        "reading successor output: {}",
                        e
                    )));
                }
            };
            match line {
                Some(line) if line.trim() == HANDSHAKE_READY_LINE => {
                    info!("successor pid={:?} accepted handoff", pid);
                    return Ok(Handoff {
                        version: bundle.version,
                        cache_key: bundle.cache_key,
                        pid,
                    });
                }
                Some(line) => debug!("successor: {}", line),
                None => break,
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| BootError::Activation(format!("waiting for successor: {}", e)))?;
        warn!("successor exited before handshake: {}", status);
        Err(BootError::Activation(format!(
            "successor exited before handshake ({})",
            status
        )))
    }
}

#[async_trait]
impl CodeActivator for ProcessActivator {
    async fn activate(&self, bundle: Bundle, context: BootContext) -> Result<Handoff, BootError> {
        let dir = self.bundle_dir(&bundle.cache_key);
        let result = self.launch(bundle, context).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("removing failed bundle {}: {}", dir.display(), e);
            }
        }
        result
    }

    async fn prune(&self, keep: &CacheKey) -> Result<usize, BootError> {
        let mut entries = match tokio::fs::read_dir(&self.bundles_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy() == keep.as_str() {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!("pruned bundle {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("pruning bundle {} failed: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}
