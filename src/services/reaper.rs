use std::path::Path;
use std::time::{Duration, SystemTime};

/// Outcome of one temp directory sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub retained: usize,
    pub failed: usize,
}

/// Deletes regular files in `temp_dir` last modified more than `max_age` ago.
///
/// `max_age` has to exceed the longest plausible single upload, otherwise a
/// file still being written could be removed underneath its request.
pub async fn sweep_expired_temp(temp_dir: &Path, max_age: Duration) -> std::io::Result<SweepReport> {
    let mut report = SweepReport::default();
    let now = SystemTime::now();
    let mut entries = tokio::fs::read_dir(temp_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            // Already gone: a request finished with it between listing and stat.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to stat temp file");
                report.failed += 1;
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();

        if age <= max_age {
            report.retained += 1;
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), age_secs = age.as_secs(), "Removed orphaned temp file");
                report.removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned temp file");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}
