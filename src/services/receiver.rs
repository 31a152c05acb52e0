use crate::error::IngestError;
use crate::models::Declaration;
use crate::services::scanner::SCAN_WINDOW;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Outcome of moving a temp artifact to its final name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Created,
    AlreadyPresent,
}

/// Staging file that deletes itself unless it is persisted.
///
/// Dropping it on any exit route (rejection, I/O error, cancelled request
/// future) removes the file; a failed removal is logged, never raised.
#[derive(Debug)]
pub struct TempArtifact {
    file: Option<NamedTempFile>,
    path: PathBuf,
}

impl TempArtifact {
    pub fn create_in(dir: &Path) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".part")
            .tempfile_in(dir)?;
        let path = file.path().to_path_buf();
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bumps the mtime so the temp reaper treats the file as in flight.
    pub fn touch(&self) -> io::Result<()> {
        match &self.file {
            Some(file) => file.as_file().set_modified(SystemTime::now()),
            None => Ok(()),
        }
    }

    fn writer(&self) -> io::Result<tokio::fs::File> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| io::Error::other("temp artifact already consumed"))?;
        Ok(tokio::fs::File::from_std(file.reopen()?))
    }

    /// Atomically moves the file to `dest` unless something already lives there.
    ///
    /// An occupied destination is not an error: the artifact is discarded and
    /// [`Placement::AlreadyPresent`] returned.
    pub fn persist_noclobber(mut self, dest: &Path) -> io::Result<Placement> {
        let file = self
            .file
            .take()
            .ok_or_else(|| io::Error::other("temp artifact already consumed"))?;

        match file.persist_noclobber(dest) {
            Ok(_) => Ok(Placement::Created),
            Err(tempfile::PersistError { error, file }) => {
                self.file = Some(file);
                if error.kind() == io::ErrorKind::AlreadyExists {
                    Ok(Placement::AlreadyPresent)
                } else {
                    Err(error)
                }
            }
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            match file.close() {
                Ok(()) => tracing::debug!(path = %self.path.display(), "Removed temp artifact"),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove temp artifact"
                ),
            }
        }
    }
}

/// A fully received upload sitting in temp storage, size-checked but unverified.
#[derive(Debug)]
pub struct IncomingFile {
    pub declared: Declaration,
    pub size_bytes: u64,
    /// First [`SCAN_WINDOW`] bytes of the content.
    pub head: Vec<u8>,
    pub(crate) temp: TempArtifact,
}

impl IncomingFile {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }
}

/// Streams an upload into `temp_dir`, enforcing `max_size` as bytes arrive.
///
/// Reading stops as soon as the limit is crossed, so an oversized payload is
/// never fully written (or hashed). Zero-byte uploads are rejected.
pub async fn receive<R>(
    temp_dir: &Path,
    declared: Declaration,
    max_size: u64,
    mut reader: R,
) -> Result<IncomingFile, IngestError>
where
    R: AsyncRead + Unpin,
{
    let temp = TempArtifact::create_in(temp_dir)?;
    let mut out = temp.writer()?;

    let mut head = Vec::with_capacity(SCAN_WINDOW);
    let mut buffer = [0u8; 8192];
    let mut total: u64 = 0;

    loop {
        let n = reader
            .read(&mut buffer)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::FileTooLarge => IngestError::RequestTooLarge,
                _ => IngestError::Aborted(e.to_string()),
            })?;
        if n == 0 {
            break;
        }

        total += n as u64;
        if total > max_size {
            tracing::warn!(
                filename = %declared.original_name,
                limit = max_size,
                "Upload exceeded size limit, stopped reading"
            );
            return Err(IngestError::FileTooLarge {
                category: declared.category.to_string(),
                limit: max_size,
            });
        }

        if head.len() < SCAN_WINDOW {
            let take = (SCAN_WINDOW - head.len()).min(n);
            head.extend_from_slice(&buffer[..take]);
        }

        out.write_all(&buffer[..n]).await?;
    }
    out.flush().await?;

    if total == 0 {
        return Err(IngestError::EmptyFile);
    }

    tracing::debug!(
        filename = %declared.original_name,
        size = total,
        temp_path = %temp.path().display(),
        "Upload received"
    );

    Ok(IncomingFile {
        declared,
        size_bytes: total,
        head,
        temp,
    })
}
