use crate::error::IngestError;
use crate::models::{CategoryPolicy, Declaration};
use std::str::FromStr;

/// Longest accepted filename, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Number of leading bytes the content verifier looks at.
pub const MAGIC_WINDOW: usize = 32;

/// Executable suffixes refused anywhere in a multi-suffix name ("cv.pdf.exe").
const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "pif", "msi", "dll", "vbs", "js", "jar", "ps1", "sh",
    "app", "lnk", "hta", "cpl",
];

/// Expected leading bytes per declared MIME type.
const MAGIC_SIGNATURES: &[(&str, &[&[u8]])] = &[
    ("application/pdf", &[b"%PDF"]),
    (
        "image/png",
        &[&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]],
    ),
    (
        "image/jpeg",
        &[
            &[0xFF, 0xD8, 0xFF, 0xE0],
            &[0xFF, 0xD8, 0xFF, 0xE1],
            &[0xFF, 0xD8, 0xFF, 0xE2],
            &[0xFF, 0xD8, 0xFF, 0xDB],
            &[0xFF, 0xD8, 0xFF, 0xEE],
        ],
    ),
    ("image/gif", &[b"GIF87a", b"GIF89a"]),
    ("image/webp", &[b"RIFF"]),
    ("audio/wav", &[b"RIFF"]),
    ("audio/x-wav", &[b"RIFF"]),
    ("audio/wave", &[b"RIFF"]),
    ("audio/mpeg", &[b"ID3", &[0xFF, 0xFB], &[0xFF, 0xF3], &[0xFF, 0xF2]]),
    ("audio/mp3", &[b"ID3", &[0xFF, 0xFB], &[0xFF, 0xF3], &[0xFF, 0xF2]]),
    ("audio/ogg", &[b"OggS"]),
    ("audio/webm", &[&[0x1A, 0x45, 0xDF, 0xA3]]),
    (
        "application/msword",
        &[&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]],
    ),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        &[&[0x50, 0x4B, 0x03, 0x04]],
    ),
    ("application/rtf", &[b"{\\rtf"]),
    ("text/rtf", &[b"{\\rtf"]),
];

/// What to do with a declared MIME type that has no registered signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownSignaturePolicy {
    /// Let the content through unchecked.
    #[default]
    Allow,
    /// Refuse it as `InvalidContent`.
    Reject,
}

impl FromStr for UnknownSignaturePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown signature policy '{}'", other)),
        }
    }
}

fn unsafe_name(reason: impl Into<String>) -> IngestError {
    IngestError::FilenameUnsafe(reason.into())
}

/// Rejects names that are unsafe regardless of what the content turns out to be.
pub fn check_filename(name: &str) -> Result<(), IngestError> {
    if name.is_empty() {
        return Err(unsafe_name("filename is empty"));
    }

    if name == "." || name == ".." {
        return Err(unsafe_name("filename is a directory reference"));
    }

    if name.len() > MAX_FILENAME_BYTES {
        return Err(unsafe_name(format!(
            "filename is {} bytes, limit is {}",
            name.len(),
            MAX_FILENAME_BYTES
        )));
    }

    if name.contains('/') || name.contains('\\') {
        tracing::warn!(filename = %name.escape_debug(), "Path traversal attempt detected");
        return Err(unsafe_name("filename contains a path separator"));
    }

    if name.chars().any(char::is_control) {
        return Err(unsafe_name("filename contains control characters"));
    }

    let suffixes: Vec<String> = name.split('.').skip(1).map(str::to_lowercase).collect();
    if suffixes.len() > 1 {
        if let Some(bad) = suffixes
            .iter()
            .find(|s| EXECUTABLE_EXTENSIONS.contains(&s.as_str()))
        {
            return Err(unsafe_name(format!(
                "filename hides executable suffix '.{}'",
                bad
            )));
        }
    }

    Ok(())
}

/// Cheap check of the client-declared extension and MIME type against the policy.
pub fn check_type(declared: &Declaration, policy: &CategoryPolicy) -> Result<(), IngestError> {
    if !policy.extensions.contains(declared.extension.as_str()) {
        return Err(IngestError::InvalidExtension {
            extension: declared.extension.clone(),
            category: policy.category.to_string(),
        });
    }

    if !policy.mime_types.contains(declared.mime_type.as_str()) {
        return Err(IngestError::InvalidMimeType {
            mime: declared.mime_type.clone(),
            category: policy.category.to_string(),
        });
    }

    Ok(())
}

/// Checks the leading bytes of a file against the signatures of its declared type.
pub fn verify_magic_bytes(
    header: &[u8],
    declared_mime: &str,
    unknown: UnknownSignaturePolicy,
) -> Result<(), IngestError> {
    let window = &header[..header.len().min(MAGIC_WINDOW)];
    let invalid = || IngestError::InvalidContent {
        mime: declared_mime.to_string(),
    };

    // Plain text has no signature; binary content claiming to be text is refused.
    if declared_mime == "text/plain" {
        return if window.contains(&0) {
            Err(invalid())
        } else {
            Ok(())
        };
    }

    match MAGIC_SIGNATURES
        .iter()
        .find(|(mime, _)| *mime == declared_mime)
    {
        Some((_, signatures)) => {
            if signatures.iter().any(|sig| window.starts_with(sig)) {
                Ok(())
            } else {
                Err(invalid())
            }
        }
        None => match unknown {
            UnknownSignaturePolicy::Allow => {
                tracing::debug!(
                    mime = %declared_mime,
                    "No magic signature registered, allowing unchecked"
                );
                Ok(())
            }
            UnknownSignaturePolicy::Reject => Err(invalid()),
        },
    }
}
