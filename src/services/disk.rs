use crate::error::IngestError;
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of free-space figures for the filesystem holding a path.
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// Reads filesystem statistics through the platform disk list.
pub struct SystemSpaceProbe;

impl SpaceProbe for SystemSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let path = std::fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        let disks = sysinfo::Disks::new_with_refreshed_list();

        // The disk whose mount point is the longest prefix of the path owns it.
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| anyhow!("No mounted filesystem contains {}", path.display()))
    }
}

/// Preflight check that enough disk space is left before accepting uploads.
///
/// Fails open: if the probe itself errors the request proceeds, only an
/// explicit "below threshold" reading rejects it.
#[derive(Clone)]
pub struct DiskGuard {
    probe: Arc<dyn SpaceProbe>,
    root: PathBuf,
    min_free_bytes: u64,
}

impl DiskGuard {
    pub fn new(probe: Arc<dyn SpaceProbe>, root: impl Into<PathBuf>, min_free_bytes: u64) -> Self {
        Self {
            probe,
            root: root.into(),
            min_free_bytes,
        }
    }

    pub async fn check(&self) -> Result<(), IngestError> {
        if self.min_free_bytes == 0 {
            return Ok(());
        }

        let probe = self.probe.clone();
        let root = self.root.clone();
        let reading = tokio::task::spawn_blocking(move || probe.available_bytes(&root))
            .await
            .map_err(|e| anyhow!("Space probe task failed: {}", e))
            .and_then(|r| r);

        match reading {
            Ok(available) if available < self.min_free_bytes => {
                tracing::warn!(
                    available,
                    required = self.min_free_bytes,
                    "Free disk space below threshold, rejecting uploads"
                );
                Err(IngestError::InsufficientStorage {
                    available,
                    required: self.min_free_bytes,
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Disk space check failed, proceeding");
                Ok(())
            }
        }
    }

    /// Last probe reading, for health reporting.
    pub async fn available_bytes(&self) -> Option<u64> {
        let probe = self.probe.clone();
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || probe.available_bytes(&root).ok())
            .await
            .ok()
            .flatten()
    }
}
