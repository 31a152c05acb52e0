use thiserror::Error;

/// Why a file (or a whole batch) did not make it into storage.
///
/// Every variant except [`IngestError::Io`] is a recoverable rejection of the
/// submitted content; `Io` is an infrastructure failure.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unknown upload category '{0}'")]
    UnknownCategory(String),

    #[error("File size exceeds the {limit} byte limit for {category} uploads")]
    FileTooLarge { category: String, limit: u64 },

    #[error("Batch size {total} bytes exceeds the {limit} byte aggregate limit")]
    BatchTooLarge { total: u64, limit: u64 },

    #[error("Request body exceeds the configured size limit")]
    RequestTooLarge,

    #[error("Too many files: at most {max} allowed per request")]
    TooManyFiles { max: usize },

    #[error("Unexpected upload field '{0}'")]
    UnexpectedField(String),

    #[error("Extension '{extension}' is not allowed for {category} uploads")]
    InvalidExtension { extension: String, category: String },

    #[error("MIME type '{mime}' is not allowed for {category} uploads")]
    InvalidMimeType { mime: String, category: String },

    #[error("File content does not match declared type '{mime}'")]
    InvalidContent { mime: String },

    #[error("File is empty")]
    EmptyFile,

    #[error("File flagged as malicious: {threat}")]
    MaliciousContent { threat: String },

    #[error("Unsafe filename: {0}")]
    FilenameUnsafe(String),

    #[error("Insufficient storage: {available} bytes free, {required} required")]
    InsufficientStorage { available: u64, required: u64 },

    #[error("Upload rate limit exceeded")]
    RateLimited,

    #[error("Upload aborted: {0}")]
    Aborted(String),

    #[error("Ingestion failed: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Machine-readable reason code handed to the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::UnknownCategory(_) => "UnknownCategory",
            IngestError::FileTooLarge { .. } => "FileTooLarge",
            IngestError::BatchTooLarge { .. } => "BatchTooLarge",
            IngestError::RequestTooLarge => "RequestTooLarge",
            IngestError::TooManyFiles { .. } => "TooManyFiles",
            IngestError::UnexpectedField(_) => "UnexpectedField",
            IngestError::InvalidExtension { .. } => "InvalidExtension",
            IngestError::InvalidMimeType { .. } => "InvalidMimeType",
            IngestError::InvalidContent { .. } => "InvalidContent",
            IngestError::EmptyFile => "EmptyFile",
            IngestError::MaliciousContent { .. } => "MaliciousContent",
            IngestError::FilenameUnsafe(_) => "FilenameUnsafe",
            IngestError::InsufficientStorage { .. } => "InsufficientStorage",
            IngestError::RateLimited => "RateLimited",
            IngestError::Aborted(_) => "UploadAborted",
            IngestError::Io(_) => "IngestionFailed",
        }
    }

    pub fn is_rejection(&self) -> bool {
        !matches!(self, IngestError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(IngestError::EmptyFile.code(), "EmptyFile");
        assert_eq!(
            IngestError::FilenameUnsafe("x".into()).code(),
            "FilenameUnsafe"
        );
        assert_eq!(
            IngestError::Io(std::io::Error::other("disk")).code(),
            "IngestionFailed"
        );
    }

    #[test]
    fn test_io_is_not_a_rejection() {
        assert!(IngestError::RateLimited.is_rejection());
        assert!(!IngestError::Io(std::io::Error::other("disk")).is_rejection());
    }
}
