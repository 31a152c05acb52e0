use crate::error::IngestError;
use crate::models::{Category, CategoryPolicy, ContentDigest, Declaration, FileMetadata};
use crate::services::disk::DiskGuard;
use crate::services::policy::PolicyRegistry;
use crate::services::receiver::{IncomingFile, receive};
use crate::services::scanner::{ScanResult, VirusScanner};
use crate::services::storage::ContentStore;
use crate::utils::hash::calculate_file_hash;
use crate::utils::validation::{
    UnknownSignaturePolicy, check_filename, check_type, verify_magic_bytes,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// An upload whose content passed the magic-byte and malware checks.
#[derive(Debug)]
pub struct VerifiedFile {
    pub(crate) incoming: IncomingFile,
}

impl VerifiedFile {
    pub fn size_bytes(&self) -> u64 {
        self.incoming.size_bytes
    }
}

/// A verified upload with its content digest, ready for placement.
#[derive(Debug)]
pub struct HashedFile {
    pub(crate) incoming: IncomingFile,
    pub(crate) digest: ContentDigest,
}

/// Multipart field name → category mapping for batch uploads.
#[derive(Debug, Clone)]
pub struct FieldMap(HashMap<String, Category>);

impl FieldMap {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Category)>,
        S: Into<String>,
    {
        Self(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// `resume`, `image`, `audio` and `document` fields.
    pub fn standard() -> Self {
        Self::new(Category::ALL.map(|c| (c.as_str(), c)))
    }

    pub fn category_for(&self, field: &str) -> Result<Category, IngestError> {
        self.0
            .get(field)
            .copied()
            .ok_or_else(|| IngestError::UnexpectedField(field.to_string()))
    }
}

impl Default for FieldMap {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone)]
pub struct BatchLimits {
    pub fields: FieldMap,
    pub max_files: usize,
    pub max_total_bytes: u64,
}

/// Runs uploads through validation, hashing and content-addressed placement.
pub struct IngestService {
    policies: PolicyRegistry,
    store: ContentStore,
    scanner: Arc<dyn VirusScanner>,
    disk_guard: DiskGuard,
    unknown_signatures: UnknownSignaturePolicy,
}

impl IngestService {
    pub fn new(store: ContentStore, scanner: Arc<dyn VirusScanner>, disk_guard: DiskGuard) -> Self {
        Self {
            policies: PolicyRegistry::standard(),
            store,
            scanner,
            disk_guard,
            unknown_signatures: UnknownSignaturePolicy::default(),
        }
    }

    pub fn with_unknown_signature_policy(mut self, policy: UnknownSignaturePolicy) -> Self {
        self.unknown_signatures = policy;
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn scanner(&self) -> &Arc<dyn VirusScanner> {
        &self.scanner
    }

    pub fn disk_guard(&self) -> &DiskGuard {
        &self.disk_guard
    }

    /// Ingests a single file: preflight, validation, hashing and storage.
    pub async fn ingest<R>(
        &self,
        reader: R,
        declared_name: &str,
        declared_mime: &str,
        category: &str,
    ) -> Result<FileMetadata, IngestError>
    where
        R: AsyncRead + Unpin,
    {
        let result = async {
            self.disk_guard.check().await?;
            let policy = self.policies.lookup(category)?;
            let verified = self
                .stage(policy, reader, declared_name, declared_mime)
                .await?;
            let hashed = self.hash(verified).await?;
            self.store.place(hashed).await
        }
        .await;

        if let Err(e) = &result {
            log_failure(declared_name, e);
        }
        result
    }

    /// Starts a multi-file submission. Runs the disk capacity preflight once.
    pub async fn begin_batch(&self, limits: BatchLimits) -> Result<Batch<'_>, IngestError> {
        self.disk_guard.check().await?;
        Ok(Batch {
            service: self,
            limits,
            staged: Vec::new(),
            total_bytes: 0,
        })
    }

    /// Filename, declared type, size, content and malware checks.
    async fn stage<R>(
        &self,
        policy: &CategoryPolicy,
        reader: R,
        declared_name: &str,
        declared_mime: &str,
    ) -> Result<VerifiedFile, IngestError>
    where
        R: AsyncRead + Unpin,
    {
        check_filename(declared_name)?;
        let declared = Declaration::new(declared_name, declared_mime, policy.category);
        check_type(&declared, policy)?;

        let incoming = receive(
            &self.store.temp_dir(),
            declared,
            policy.max_size_bytes,
            reader,
        )
        .await?;
        self.verify(incoming).await
    }

    async fn verify(&self, incoming: IncomingFile) -> Result<VerifiedFile, IngestError> {
        verify_magic_bytes(
            &incoming.head,
            &incoming.declared.mime_type,
            self.unknown_signatures,
        )?;

        match self.scanner.scan(&incoming.head).await {
            Ok(ScanResult::Clean) => Ok(VerifiedFile { incoming }),
            Ok(ScanResult::Infected { threat_name }) => {
                tracing::warn!(
                    filename = %incoming.declared.original_name,
                    threat = %threat_name,
                    "Malicious content detected"
                );
                Err(IngestError::MaliciousContent {
                    threat: threat_name,
                })
            }
            Ok(ScanResult::Error { reason }) => Err(IngestError::Io(std::io::Error::other(
                format!("Malware scan failed: {}", reason),
            ))),
            Err(e) => Err(IngestError::Io(std::io::Error::other(format!(
                "Malware scan failed: {}",
                e
            )))),
        }
    }

    async fn hash(&self, file: VerifiedFile) -> Result<HashedFile, IngestError> {
        let hex = calculate_file_hash(file.incoming.temp_path()).await?;
        Ok(HashedFile {
            incoming: file.incoming,
            digest: ContentDigest::from_hex(hex),
        })
    }
}

fn log_failure(filename: &str, error: &IngestError) {
    if error.is_rejection() {
        tracing::info!(filename = %filename, code = error.code(), "Upload rejected: {}", error);
    } else {
        tracing::error!(filename = %filename, "Upload failed: {}", error);
    }
}

/// All-or-nothing multi-file submission.
///
/// Files are staged (validated, still in temp storage) as they arrive; nothing
/// reaches a final directory until [`Batch::commit`]. Dropping the batch, or
/// any rejection, deletes every staged temp file.
pub struct Batch<'a> {
    service: &'a IngestService,
    limits: BatchLimits,
    staged: Vec<VerifiedFile>,
    total_bytes: u64,
}

impl Batch<'_> {
    pub async fn accept<R>(
        &mut self,
        field: &str,
        declared_name: &str,
        declared_mime: &str,
        reader: R,
    ) -> Result<(), IngestError>
    where
        R: AsyncRead + Unpin,
    {
        let result = self
            .accept_inner(field, declared_name, declared_mime, reader)
            .await;
        if let Err(e) = &result {
            log_failure(declared_name, e);
        }
        result
    }

    async fn accept_inner<R>(
        &mut self,
        field: &str,
        declared_name: &str,
        declared_mime: &str,
        reader: R,
    ) -> Result<(), IngestError>
    where
        R: AsyncRead + Unpin,
    {
        let category = self.limits.fields.category_for(field)?;
        if self.staged.len() >= self.limits.max_files {
            return Err(IngestError::TooManyFiles {
                max: self.limits.max_files,
            });
        }

        let policy = self.service.policies.get(category)?;
        self.touch_staged();
        let file = self
            .service
            .stage(policy, reader, declared_name, declared_mime)
            .await?;

        self.total_bytes += file.size_bytes();
        self.staged.push(file);
        self.check_aggregate()
    }

    /// Keeps already-staged files fresh while later parts are still streaming.
    fn touch_staged(&self) {
        for file in &self.staged {
            if let Err(e) = file.incoming.temp.touch() {
                tracing::warn!(
                    path = %file.incoming.temp_path().display(),
                    error = %e,
                    "Failed to refresh staged file mtime"
                );
            }
        }
    }

    fn check_aggregate(&self) -> Result<(), IngestError> {
        if self.total_bytes > self.limits.max_total_bytes {
            return Err(IngestError::BatchTooLarge {
                total: self.total_bytes,
                limit: self.limits.max_total_bytes,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Hashes and places every staged file, in submission order.
    pub async fn commit(self) -> Result<Vec<FileMetadata>, IngestError> {
        if let Err(e) = self.check_aggregate() {
            tracing::warn!(
                files = self.staged.len(),
                total_bytes = self.total_bytes,
                "Upload batch rejected: {}",
                e
            );
            return Err(e);
        }

        self.touch_staged();
        let service = self.service;
        let mut hashed = Vec::with_capacity(self.staged.len());
        for file in self.staged {
            hashed.push(service.hash(file).await?);
        }

        let mut stored = Vec::with_capacity(hashed.len());
        for file in hashed {
            stored.push(service.store.place(file).await?);
        }

        tracing::info!(files = stored.len(), "Upload batch stored");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::disk::tests::{BrokenProbe, FixedProbe};
    use crate::services::scanner::SignatureScanner;
    use crate::utils::hash::calculate_hash;

    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    async fn service_with_free_space(root: &std::path::Path, free: u64) -> IngestService {
        let store = ContentStore::open(root).await.unwrap();
        let guard = DiskGuard::new(Arc::new(FixedProbe(free)), root, 1024);
        IngestService::new(store, Arc::new(SignatureScanner), guard)
    }

    async fn service(root: &std::path::Path) -> IngestService {
        service_with_free_space(root, u64::MAX).await
    }

    fn pdf_bytes(body: &str) -> Vec<u8> {
        format!("%PDF-1.4\n{}\n%%EOF", body).into_bytes()
    }

    fn png_bytes(len: usize) -> Vec<u8> {
        let mut data = PNG_HEADER.to_vec();
        data.resize(len, 0x42);
        data
    }

    fn count_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn limits(max_files: usize, max_total_bytes: u64) -> BatchLimits {
        BatchLimits {
            fields: FieldMap::standard(),
            max_files,
            max_total_bytes,
        }
    }

    #[tokio::test]
    async fn test_ingest_resume() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let data = pdf_bytes("curriculum vitae");

        let meta = service
            .ingest(&data[..], "resume.pdf", "application/pdf", "resume")
            .await
            .unwrap();

        let expected_hash = calculate_hash(&data);
        assert_eq!(meta.content_hash(), expected_hash);
        assert_eq!(
            meta.final_path(),
            dir.path().join("resumes").join(format!("{}.pdf", expected_hash))
        );
        assert_eq!(meta.stored_filename(), format!("{}.pdf", expected_hash));
        assert_eq!(meta.size_bytes(), data.len() as u64);
        assert_eq!(meta.original_name(), "resume.pdf");
        assert_eq!(meta.category(), Category::Resume);
        assert_eq!(std::fs::read(meta.final_path()).unwrap(), data);
        assert_eq!(count_files(&dir.path().join("temp")), 0);
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let data = pdf_bytes("same bytes");

        let first = service
            .ingest(&data[..], "resume.pdf", "application/pdf", "resume")
            .await
            .unwrap();
        let second = service
            .ingest(&data[..], "copy-of-resume.pdf", "application/pdf", "resume")
            .await
            .unwrap();

        assert_eq!(first.content_hash(), second.content_hash());
        assert_eq!(first.final_path(), second.final_path());
        assert_eq!(count_files(&dir.path().join("resumes")), 1);
        assert_eq!(count_files(&dir.path().join("temp")), 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_uploads_store_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(dir.path()).await);
        let data = png_bytes(4096);

        let mut handles = Vec::new();
        for i in 0..8 {
            let service = service.clone();
            let data = data.clone();
            handles.push(tokio::spawn(async move {
                service
                    .ingest(&data[..], &format!("photo-{}.png", i), "image/png", "image")
                    .await
            }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap().final_path().to_path_buf());
        }
        paths.dedup();
        assert_eq!(paths.len(), 1);
        assert_eq!(count_files(&dir.path().join("images")), 1);
        assert_eq!(count_files(&dir.path().join("temp")), 0);
    }

    #[tokio::test]
    async fn test_rejects_pdf_with_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let err = service
            .ingest(&b"PK\x03\x04 not a pdf"[..], "resume.pdf", "application/pdf", "resume")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "InvalidContent");
        assert_eq!(count_files(&dir.path().join("temp")), 0);
        assert_eq!(count_files(&dir.path().join("resumes")), 0);
    }

    #[tokio::test]
    async fn test_rejects_png_with_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let err = service
            .ingest(&b"GIF89a......"[..], "avatar.png", "image/png", "image")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "InvalidContent");
    }

    #[tokio::test]
    async fn test_rejects_double_extension_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let err = service
            .ingest(&pdf_bytes("x")[..], "resume.pdf.exe", "application/pdf", "resume")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "FilenameUnsafe");
    }

    #[tokio::test]
    async fn test_rejects_path_separator_with_valid_content() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let err = service
            .ingest(&pdf_bytes("fine")[..], "cvs/resume.pdf", "application/pdf", "resume")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "FilenameUnsafe");
        assert_eq!(count_files(&dir.path().join("resumes")), 0);
    }

    #[tokio::test]
    async fn test_rejects_oversized_resume() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let mut data = pdf_bytes("");
        data.resize(6 * 1024 * 1024, b' ');

        let err = service
            .ingest(&data[..], "resume.pdf", "application/pdf", "resume")
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::FileTooLarge { .. }));
        assert_eq!(count_files(&dir.path().join("temp")), 0);
    }

    #[tokio::test]
    async fn test_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let err = service
            .ingest(&b""[..], "notes.txt", "text/plain", "document")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "EmptyFile");
        assert_eq!(count_files(&dir.path().join("temp")), 0);
    }

    #[tokio::test]
    async fn test_rejects_eicar_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let data = b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

        let err = service
            .ingest(&data[..], "notes.txt", "text/plain", "document")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "MaliciousContent");
        assert_eq!(count_files(&dir.path().join("temp")), 0);
        assert_eq!(count_files(&dir.path().join("documents")), 0);
    }

    #[tokio::test]
    async fn test_rejects_declared_type_outside_policy() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let err = service
            .ingest(&png_bytes(64)[..], "avatar.png", "image/png", "resume")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidExtension");

        let err = service
            .ingest(&pdf_bytes("x")[..], "resume.pdf", "text/plain", "resume")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidMimeType");

        let err = service
            .ingest(&pdf_bytes("x")[..], "resume.pdf", "application/pdf", "payslip")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UnknownCategory");
    }

    #[tokio::test]
    async fn test_unknown_signature_policy_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"\x00\x00\x00\x20ftypM4A \x00\x00\x00\x00";

        let permissive = service(dir.path()).await;
        let meta = permissive
            .ingest(&data[..], "voice.m4a", "audio/mp4", "audio")
            .await
            .unwrap();
        assert!(meta.final_path().starts_with(dir.path().join("audio")));

        let strict = service(dir.path())
            .await
            .with_unknown_signature_policy(UnknownSignaturePolicy::Reject);
        let err = strict
            .ingest(&data[..], "voice.m4a", "audio/mp4", "audio")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidContent");
    }

    #[tokio::test]
    async fn test_insufficient_storage() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_free_space(dir.path(), 10).await;

        let err = service
            .ingest(&pdf_bytes("x")[..], "resume.pdf", "application/pdf", "resume")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InsufficientStorage");

        let err = service.begin_batch(limits(5, 1024)).await.err().unwrap();
        assert_eq!(err.code(), "InsufficientStorage");
    }

    #[tokio::test]
    async fn test_probe_failure_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();
        let guard = DiskGuard::new(Arc::new(BrokenProbe), dir.path(), u64::MAX);
        let service = IngestService::new(store, Arc::new(SignatureScanner), guard);

        let mut batch = service.begin_batch(limits(5, 1 << 20)).await.unwrap();
        batch
            .accept("resume", "resume.pdf", "application/pdf", &pdf_bytes("ok")[..])
            .await
            .unwrap();
        let stored = batch.commit().await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_commits_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let mut batch = service.begin_batch(limits(5, 1 << 20)).await.unwrap();
        batch
            .accept("resume", "cv.pdf", "application/pdf", &pdf_bytes("cv")[..])
            .await
            .unwrap();
        batch
            .accept("image", "me.png", "image/png", &png_bytes(128)[..])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);

        let stored = batch.commit().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(count_files(&dir.path().join("resumes")), 1);
        assert_eq!(count_files(&dir.path().join("images")), 1);
        assert_eq!(count_files(&dir.path().join("temp")), 0);
    }

    #[tokio::test]
    async fn test_batch_over_aggregate_ceiling_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let mut batch = service.begin_batch(limits(5, 300)).await.unwrap();
        batch
            .accept("image", "a.png", "image/png", &png_bytes(200)[..])
            .await
            .unwrap();
        let err = batch
            .accept("image", "b.png", "image/png", &png_bytes(200)[..])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::BatchTooLarge { total: 400, limit: 300 }));

        assert!(batch.commit().await.is_err());
        for sub in ["temp", "images", "resumes", "audio", "documents"] {
            assert_eq!(count_files(&dir.path().join(sub)), 0, "{} not empty", sub);
        }
    }

    #[tokio::test]
    async fn test_batch_field_and_count_limits() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let mut batch = service.begin_batch(limits(1, 1 << 20)).await.unwrap();
        let err = batch
            .accept("avatar", "me.png", "image/png", &png_bytes(64)[..])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UnexpectedField");

        batch
            .accept("image", "me.png", "image/png", &png_bytes(64)[..])
            .await
            .unwrap();
        let err = batch
            .accept("image", "me2.png", "image/png", &png_bytes(65)[..])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TooManyFiles");

        drop(batch);
        assert_eq!(count_files(&dir.path().join("temp")), 0);
        assert_eq!(count_files(&dir.path().join("images")), 0);
    }

    #[test]
    fn test_custom_field_map() {
        let fields = FieldMap::new([("cv", Category::Resume), ("voice", Category::Audio)]);
        assert_eq!(fields.category_for("voice").unwrap(), Category::Audio);
        assert!(fields.category_for("resume").is_err());
    }

    struct UnavailableScanner;

    #[async_trait::async_trait]
    impl VirusScanner for UnavailableScanner {
        async fn scan(&self, _sample: &[u8]) -> anyhow::Result<ScanResult> {
            Ok(ScanResult::Error {
                reason: "signature database not loaded".to_string(),
            })
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_scanner_failure_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();
        let guard = DiskGuard::new(Arc::new(FixedProbe(u64::MAX)), dir.path(), 0);
        let service = IngestService::new(store, Arc::new(UnavailableScanner), guard);

        let err = service
            .ingest(&pdf_bytes("cv")[..], "resume.pdf", "application/pdf", "resume")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "IngestionFailed");
        assert!(!err.is_rejection());
        assert_eq!(count_files(&dir.path().join("temp")), 0);
        assert_eq!(count_files(&dir.path().join("resumes")), 0);
    }

    #[tokio::test]
    async fn test_placement_failure_cleans_temp() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        std::fs::remove_dir(dir.path().join("resumes")).unwrap();

        let err = service
            .ingest(&pdf_bytes("cv")[..], "resume.pdf", "application/pdf", "resume")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "IngestionFailed");
        assert_eq!(count_files(&dir.path().join("temp")), 0);
    }

    #[tokio::test]
    async fn test_batch_keeps_staged_files_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);

        let mut batch = service.begin_batch(limits(5, 1 << 20)).await.unwrap();
        batch
            .accept("image", "first.png", "image/png", &png_bytes(64)[..])
            .await
            .unwrap();
        let staged = batch.staged[0].incoming.temp_path().to_path_buf();
        std::fs::File::options()
            .write(true)
            .open(&staged)
            .unwrap()
            .set_modified(old)
            .unwrap();

        batch
            .accept("image", "second.png", "image/png", &png_bytes(65)[..])
            .await
            .unwrap();

        let modified = std::fs::metadata(&staged).unwrap().modified().unwrap();
        assert!(modified > old + std::time::Duration::from_secs(3000));
        assert_eq!(batch.commit().await.unwrap().len(), 2);
    }
}
