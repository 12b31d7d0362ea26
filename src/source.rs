//! Reading upload sources from disk

use crate::error::{Result, UploadError};
use bytes::Bytes;
use std::path::Path;
use tracing::debug;

const OCTET_STREAM: &str = "application/octet-stream";

/// Magic prefixes recognised by [`detect_content_type`]
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
];

/// File contents held in memory, ready to be split into parts
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadSource {
    /// Read a whole file into memory and sniff its content type
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                UploadError::ConfigError(format!("Not a file path: {}", path.display()))
            })?
            .to_string();

        let data = tokio::fs::read(path).await.map_err(|e| {
            UploadError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let content_type = detect_content_type(&data).to_string();
        debug!(
            "Read {} ({} bytes, content type {})",
            path.display(),
            data.len(),
            content_type
        );

        Ok(UploadSource {
            file_name,
            content_type,
            data: Bytes::from(data),
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Guess a content type from the first bytes of a file
pub fn detect_content_type(data: &[u8]) -> &'static str {
    if let Some(&(_, content_type)) = SIGNATURES
        .iter()
        .find(|(signature, _)| data.starts_with(signature))
    {
        return content_type;
    }

    let head = &data[..data.len().min(512)];
    if head.is_empty() {
        return "text/plain; charset=utf-8";
    }
    let text = match std::str::from_utf8(head) {
        Ok(text) => Some(text),
        // A multi-byte character may be cut at the 512 byte boundary
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&head[..e.valid_up_to()]).ok(),
        Err(_) => None,
    };
    match text {
        Some(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            "text/plain; charset=utf-8"
        }
        _ => OCTET_STREAM,
    }
}
