use crate::error::IngestError;
use crate::models::{Category, CategoryPolicy};
use std::collections::HashMap;

const MIB: u64 = 1024 * 1024;

const WORD_MIME_TYPES: &[&str] = &[
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// Static category → policy table, built once at process start.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<Category, CategoryPolicy>,
}

impl PolicyRegistry {
    pub fn standard() -> Self {
        let resume_mimes: Vec<&'static str> = std::iter::once("application/pdf")
            .chain(WORD_MIME_TYPES.iter().copied())
            .collect();

        let policies = [
            CategoryPolicy {
                category: Category::Resume,
                extensions: [".pdf", ".doc", ".docx"].into_iter().collect(),
                mime_types: resume_mimes.iter().copied().collect(),
                max_size_bytes: 5 * MIB,
            },
            CategoryPolicy {
                category: Category::Image,
                extensions: [".jpg", ".jpeg", ".png", ".gif", ".webp"]
                    .into_iter()
                    .collect(),
                mime_types: ["image/jpeg", "image/png", "image/gif", "image/webp"]
                    .into_iter()
                    .collect(),
                max_size_bytes: 2 * MIB,
            },
            CategoryPolicy {
                category: Category::Audio,
                extensions: [".mp3", ".wav", ".ogg", ".webm", ".m4a"]
                    .into_iter()
                    .collect(),
                mime_types: [
                    "audio/mpeg",
                    "audio/mp3",
                    "audio/wav",
                    "audio/x-wav",
                    "audio/wave",
                    "audio/ogg",
                    "audio/webm",
                    "audio/mp4",
                    "audio/x-m4a",
                    "audio/m4a",
                ]
                .into_iter()
                .collect(),
                max_size_bytes: 10 * MIB,
            },
            CategoryPolicy {
                category: Category::Document,
                extensions: [".pdf", ".doc", ".docx", ".txt", ".rtf"]
                    .into_iter()
                    .collect(),
                mime_types: resume_mimes
                    .iter()
                    .copied()
                    .chain(["text/plain", "application/rtf", "text/rtf"])
                    .collect(),
                max_size_bytes: 10 * MIB,
            },
        ];

        Self {
            policies: policies.into_iter().map(|p| (p.category, p)).collect(),
        }
    }

    pub fn lookup(&self, category: &str) -> Result<&CategoryPolicy, IngestError> {
        let category: Category = category.parse()?;
        self.get(category)
    }

    pub fn get(&self, category: Category) -> Result<&CategoryPolicy, IngestError> {
        self.policies
            .get(&category)
            .ok_or_else(|| IngestError::UnknownCategory(category.to_string()))
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// True for the MIME types stored alongside résumés (PDF and Word).
pub fn is_resume_document(mime: &str) -> bool {
    mime == "application/pdf" || WORD_MIME_TYPES.contains(&mime)
}
