use anyhow::Result;

/// Number of leading bytes handed to the scanner.
pub const SCAN_WINDOW: usize = 1024;

const EICAR_SIGNATURE: &[u8] =
    b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// Signatures matched at offset zero.
const HEADER_SIGNATURES: &[(&[u8], &str)] = &[
    (b"MZ", "Executable.DOS.MZ"),
    (&[0x7F, 0x45, 0x4C, 0x46], "Executable.ELF"),
];

/// Result of a malware scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// No threats detected
    Clean,
    /// Content matched a known threat
    Infected { threat_name: String },
    /// Scan could not be completed
    Error { reason: String },
}

/// Trait for malware scanning backends
#[async_trait::async_trait]
pub trait VirusScanner: Send + Sync {
    /// Scan the leading window of a file
    async fn scan(&self, sample: &[u8]) -> Result<ScanResult>;

    /// Check if the scanner is available/healthy
    async fn health_check(&self) -> bool;
}

/// Heuristic scanner matching a fixed signature list.
///
/// Stands in for a real engine; anything implementing [`VirusScanner`] can
/// replace it without touching the ingestion pipeline.
pub struct SignatureScanner;

#[async_trait::async_trait]
impl VirusScanner for SignatureScanner {
    async fn scan(&self, sample: &[u8]) -> Result<ScanResult> {
        let window = &sample[..sample.len().min(SCAN_WINDOW)];

        if window
            .windows(EICAR_SIGNATURE.len())
            .any(|w| w == EICAR_SIGNATURE)
        {
            return Ok(ScanResult::Infected {
                threat_name: "EICAR-Test-File".to_string(),
            });
        }

        for (signature, name) in HEADER_SIGNATURES {
            if window.starts_with(signature) {
                return Ok(ScanResult::Infected {
                    threat_name: (*name).to_string(),
                });
            }
        }

        Ok(ScanResult::Clean)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// No-op scanner for development/testing
pub struct NoOpScanner;

#[async_trait::async_trait]
impl VirusScanner for NoOpScanner {
    async fn scan(&self, _sample: &[u8]) -> Result<ScanResult> {
        tracing::warn!("NoOpScanner: Skipping malware scan (development mode)");
        Ok(ScanResult::Clean)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Factory function to create appropriate scanner based on config
pub fn create_scanner(scanner_type: &str) -> Box<dyn VirusScanner> {
    match scanner_type.to_lowercase().as_str() {
        "signature" | "heuristic" => Box::new(SignatureScanner),
        "noop" | "none" | "disabled" => Box::new(NoOpScanner),
        _ => {
            tracing::warn!(
                "Unknown scanner type '{}', using SignatureScanner",
                scanner_type
            );
            Box::new(SignatureScanner)
        }
    }
}
