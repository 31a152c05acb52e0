use crate::error::IngestError;
use crate::models::FileMetadata;
use crate::services::ingest::HashedFile;
use crate::services::policy::is_resume_document;
use crate::services::receiver::Placement;
use std::io;
use std::path::{Path, PathBuf};

/// Staging directory name under the upload root.
pub const TEMP_DIR: &str = "temp";

/// Final subdirectory a stored file lands in, chosen from its MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDir {
    Resumes,
    Images,
    Audio,
    Documents,
}

impl StorageDir {
    pub const ALL: [StorageDir; 4] = [
        StorageDir::Resumes,
        StorageDir::Images,
        StorageDir::Audio,
        StorageDir::Documents,
    ];

    pub fn for_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            StorageDir::Images
        } else if mime.starts_with("audio/") {
            StorageDir::Audio
        } else if is_resume_document(mime) {
            StorageDir::Resumes
        } else {
            StorageDir::Documents
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            StorageDir::Resumes => "resumes",
            StorageDir::Images => "images",
            StorageDir::Audio => "audio",
            StorageDir::Documents => "documents",
        }
    }
}

/// Content-addressed file store rooted at the upload directory.
///
/// Layout: `<root>/{temp,resumes,images,audio,documents}/`, final names are
/// `<sha256-hex><ext>`. Identical content always maps to the same path, so a
/// second copy is simply discarded.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Opens the store, creating the directory tree if needed.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(TEMP_DIR)).await?;
        for dir in StorageDir::ALL {
            tokio::fs::create_dir_all(root.join(dir.dir_name())).await?;
        }
        tracing::info!(root = %root.display(), "Content store ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn dir_path(&self, dir: StorageDir) -> PathBuf {
        self.root.join(dir.dir_name())
    }

    pub fn final_path(&self, mime: &str, digest: &str, extension: &str) -> PathBuf {
        self.dir_path(StorageDir::for_mime(mime))
            .join(format!("{}{}", digest, extension))
    }

    /// Moves a hashed file to its content address, or drops it as a duplicate.
    pub async fn place(&self, file: HashedFile) -> Result<FileMetadata, IngestError> {
        let HashedFile { incoming, digest } = file;
        let final_path = self.final_path(
            &incoming.declared.mime_type,
            digest.as_str(),
            &incoming.declared.extension,
        );

        let placement = if tokio::fs::try_exists(&final_path).await? {
            // Dropping the artifact deletes the redundant copy.
            drop(incoming.temp);
            Placement::AlreadyPresent
        } else {
            incoming.temp.persist_noclobber(&final_path)?
        };

        match placement {
            Placement::Created => {
                // Already stored; a failed chmod only leaves the 0600 tempfile mode.
                publish_permissions(&final_path).await;
                tracing::info!(
                    hash = %digest,
                    path = %final_path.display(),
                    size = incoming.size_bytes,
                    "Stored new file"
                );
            }
            Placement::AlreadyPresent => {
                tracing::info!(
                    hash = %digest,
                    path = %final_path.display(),
                    "Duplicate content, reusing stored file"
                );
            }
        }

        Ok(FileMetadata::assemble(
            incoming.declared,
            incoming.size_bytes,
            &digest,
            final_path,
        ))
    }
}

#[cfg(unix)]
async fn publish_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) =
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await
    {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to set permissions on stored file"
        );
    }
}

#[cfg(not(unix))]
async fn publish_permissions(_path: &Path) {}
