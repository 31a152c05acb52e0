use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use utoipa::ToSchema;

/// Upload purpose. Decides which [`CategoryPolicy`] bounds a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Resume,
    Image,
    Audio,
    Document,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Resume,
        Category::Image,
        Category::Audio,
        Category::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Resume => "resume",
            Category::Image => "image",
            Category::Audio => "audio",
            Category::Document => "document",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| IngestError::UnknownCategory(s.to_string()))
    }
}

/// Allowed extensions, declared MIME types and size ceiling for one category.
#[derive(Debug, Clone)]
pub struct CategoryPolicy {
    pub category: Category,
    /// Lowercase, with the leading dot (".pdf").
    pub extensions: HashSet<&'static str>,
    pub mime_types: HashSet<&'static str>,
    pub max_size_bytes: u64,
}

/// Client-supplied metadata for one upload, normalized but not yet trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub original_name: String,
    /// Essence only, lowercased ("image/png"); empty if unparseable.
    pub mime_type: String,
    /// Lowercase with the leading dot, empty if the name has none.
    pub extension: String,
    pub category: Category,
}

impl Declaration {
    pub fn new(original_name: &str, declared_mime: &str, category: Category) -> Self {
        let extension = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();

        let mime_type = declared_mime
            .parse::<mime::Mime>()
            .map(|m| m.essence_str().to_lowercase())
            .unwrap_or_default();

        Self {
            original_name: original_name.to_string(),
            mime_type,
            extension,
            category,
        }
    }
}

/// SHA-256 of a file's full content, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record returned for every accepted file. Built only by the storage stage.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FileMetadata {
    original_name: String,
    stored_filename: String,
    #[schema(value_type = String)]
    final_path: PathBuf,
    size_bytes: u64,
    mime_type: String,
    extension: String,
    uploaded_at: DateTime<Utc>,
    content_hash: String,
    category: Category,
}

impl FileMetadata {
    pub(crate) fn assemble(
        declared: Declaration,
        size_bytes: u64,
        digest: &ContentDigest,
        final_path: PathBuf,
    ) -> Self {
        let stored_filename = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            original_name: declared.original_name,
            stored_filename,
            final_path,
            size_bytes,
            mime_type: declared.mime_type,
            extension: declared.extension,
            uploaded_at: Utc::now(),
            content_hash: digest.as_str().to_string(),
            category: declared.category,
        }
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn stored_filename(&self) -> &str {
        &self.stored_filename
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn uploaded_at(&self) -> DateTime<Utc> {
        self.uploaded_at
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn category(&self) -> Category {
        self.category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_str() {
        assert_eq!("resume".parse::<Category>().unwrap(), Category::Resume);
        assert_eq!(" Image ".parse::<Category>().unwrap(), Category::Image);
        let err = "video".parse::<Category>().unwrap_err();
        assert_eq!(err.code(), "UnknownCategory");
    }

    #[test]
    fn test_declaration_normalizes() {
        let d = Declaration::new("CV.Final.PDF", "Application/PDF; charset=binary", Category::Resume);
        assert_eq!(d.extension, ".pdf");
        assert_eq!(d.mime_type, "application/pdf");
        assert_eq!(d.original_name, "CV.Final.PDF");
    }

    #[test]
    fn test_declaration_without_extension() {
        let d = Declaration::new("README", "not a mime", Category::Document);
        assert_eq!(d.extension, "");
        assert_eq!(d.mime_type, "");
    }
}
