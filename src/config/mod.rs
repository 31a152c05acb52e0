use crate::utils::validation::UnknownSignaturePolicy;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Shortest temp TTL accepted; anything lower could reap in-flight uploads.
pub const MIN_TEMP_TTL: Duration = Duration::from_secs(10 * 60);

/// Ingestion pipeline configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root of the upload tree (default: "uploads")
    pub upload_root: PathBuf,

    /// Reject requests when free disk space drops below this (default: 100 MB, 0 disables)
    pub min_free_bytes: u64,

    /// Age after which temp files are considered orphaned (default: 1 hour).
    /// Staged files of a multipart request are touched as each later part
    /// arrives, so this bounds the gap between parts, not the whole request.
    pub temp_ttl: Duration,

    /// How often the temp reaper runs (default: 15 minutes)
    pub sweep_interval: Duration,

    /// Maximum files per multipart request (default: 5)
    pub max_files_per_request: usize,

    /// Aggregate size ceiling for one multipart request (default: 20 MB)
    pub max_batch_bytes: u64,

    /// HTTP body limit (default: 64 MB)
    pub max_request_bytes: usize,

    /// Rate limit: uploads per hour per client (default: 250, 0 disables)
    pub uploads_per_hour: u32,

    /// Key the rate limit on the first `x-forwarded-for` hop instead of the
    /// peer address. Only enable behind a proxy that overwrites the header
    /// (default: false)
    pub trust_forwarded_for: bool,

    /// Malware scanner type: "signature" or "noop" (default: "signature")
    pub scanner_type: String,

    /// Declared MIME types without a registered signature (default: allow)
    pub unknown_signature_policy: UnknownSignaturePolicy,

    /// Listen address (default: 127.0.0.1:3000)
    pub bind_addr: SocketAddr,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upload_root: PathBuf::from("uploads"),
            min_free_bytes: 100 * 1024 * 1024, // 100 MB
            temp_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(15 * 60),
            max_files_per_request: 5,
            max_batch_bytes: 20 * 1024 * 1024, // 20 MB
            max_request_bytes: 64 * 1024 * 1024, // 64 MB
            uploads_per_hour: 250,
            trust_forwarded_for: false,
            scanner_type: "signature".to_string(),
            unknown_signature_policy: UnknownSignaturePolicy::Allow,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl IngestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upload_root: env::var("UPLOAD_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.upload_root),

            min_free_bytes: parsed("MIN_FREE_BYTES").unwrap_or(default.min_free_bytes),

            temp_ttl: parsed("TEMP_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.temp_ttl),

            sweep_interval: parsed("SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.sweep_interval),

            max_files_per_request: parsed("MAX_FILES_PER_REQUEST")
                .unwrap_or(default.max_files_per_request),

            max_batch_bytes: parsed("MAX_BATCH_BYTES").unwrap_or(default.max_batch_bytes),

            max_request_bytes: parsed("MAX_REQUEST_BYTES").unwrap_or(default.max_request_bytes),

            uploads_per_hour: parsed("UPLOADS_PER_HOUR").unwrap_or(default.uploads_per_hour),

            trust_forwarded_for: parsed("TRUST_FORWARDED_FOR")
                .unwrap_or(default.trust_forwarded_for),

            scanner_type: env::var("SCANNER_TYPE").unwrap_or(default.scanner_type),

            unknown_signature_policy: parsed("UNKNOWN_SIGNATURE_POLICY")
                .unwrap_or(default.unknown_signature_policy),

            bind_addr: parsed("BIND_ADDR").unwrap_or(default.bind_addr),
        }
        .normalized()
    }

    /// Create config for development (no disk guard, relaxed limits)
    pub fn development() -> Self {
        Self {
            min_free_bytes: 0,
            uploads_per_hour: 0,
            scanner_type: "noop".to_string(),
            ..Self::default()
        }
    }

    /// Clamps values that would make the pipeline unsafe.
    pub fn normalized(mut self) -> Self {
        if self.temp_ttl < MIN_TEMP_TTL {
            tracing::warn!(
                requested_secs = self.temp_ttl.as_secs(),
                floor_secs = MIN_TEMP_TTL.as_secs(),
                "Temp TTL too short, clamping"
            );
            self.temp_ttl = MIN_TEMP_TTL;
        }
        if self.sweep_interval.is_zero() {
            self.sweep_interval = Self::default().sweep_interval;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.upload_root, PathBuf::from("uploads"));
        assert_eq!(config.max_files_per_request, 5);
        assert_eq!(config.uploads_per_hour, 250);
        assert!(!config.trust_forwarded_for);
        assert_eq!(config.scanner_type, "signature");
        assert_eq!(
            config.unknown_signature_policy,
            UnknownSignaturePolicy::Allow
        );
        assert!(config.temp_ttl >= MIN_TEMP_TTL);
    }

    #[test]
    fn test_development_config() {
        let config = IngestConfig::development();
        assert_eq!(config.min_free_bytes, 0);
        assert_eq!(config.uploads_per_hour, 0);
        assert_eq!(config.scanner_type, "noop");
    }

    #[test]
    fn test_normalized_clamps_ttl() {
        let config = IngestConfig {
            temp_ttl: Duration::from_secs(5),
            sweep_interval: Duration::ZERO,
            ..IngestConfig::default()
        }
        .normalized();
        assert_eq!(config.temp_ttl, MIN_TEMP_TTL);
        assert_eq!(config.sweep_interval, Duration::from_secs(15 * 60));
    }
}
