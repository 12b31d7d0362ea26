//! Core data models for the multipart upload engine

use crate::error::{Result, UploadError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Represents a contiguous byte range within the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Arguments
    /// * `start` - Starting byte position (inclusive)
    /// * `end` - Ending byte position (inclusive)
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if the range is valid
    /// * `Err(UploadError)` if start > end
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(UploadError::ConfigError(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ByteRange { start, end })
    }

    /// Get the size of this byte range in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Half-open offsets suitable for slicing an in-memory buffer
    pub fn as_offsets(&self) -> std::ops::Range<usize> {
        self.start as usize..(self.end + 1) as usize
    }
}

/// One contiguous slice of the source file, uploaded independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Part number, dense and starting at 1
    pub index: u32,
    /// Byte range covered by this part
    pub range: ByteRange,
}

impl Part {
    pub fn new(index: u32, range: ByteRange) -> Self {
        Part { index, range }
    }

    pub fn len(&self) -> u64 {
        self.range.size()
    }
}

/// Durability/cost tier selected when a session is initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    #[default]
    Standard,
    ReducedRedundancy,
    StandardIa,
    OnezoneIa,
    IntelligentTiering,
    Glacier,
    DeepArchive,
}

impl StorageClass {
    pub const ALL: [StorageClass; 7] = [
        StorageClass::Standard,
        StorageClass::ReducedRedundancy,
        StorageClass::StandardIa,
        StorageClass::OnezoneIa,
        StorageClass::IntelligentTiering,
        StorageClass::Glacier,
        StorageClass::DeepArchive,
    ];

    /// Wire name sent in the `x-amz-storage-class` header
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::ReducedRedundancy => "REDUCED_REDUNDANCY",
            StorageClass::StandardIa => "STANDARD_IA",
            StorageClass::OnezoneIa => "ONEZONE_IA",
            StorageClass::IntelligentTiering => "INTELLIGENT_TIERING",
            StorageClass::Glacier => "GLACIER",
            StorageClass::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase();
        StorageClass::ALL
            .iter()
            .copied()
            .find(|class| class.as_str() == wanted)
            .ok_or_else(|| {
                UploadError::ConfigError(format!("Unknown storage class: {}", s))
            })
    }
}

/// Everything the storage service needs to open a multipart session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub storage_class: StorageClass,
}

impl InitiateRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        InitiateRequest {
            bucket: bucket.into(),
            key: key.into(),
            content_type: "application/octet-stream".to_string(),
            storage_class: StorageClass::default(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_storage_class(mut self, storage_class: StorageClass) -> Self {
        self.storage_class = storage_class;
        self
    }
}

/// An open multipart session. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub total_parts: usize,
}

/// Work unit handed to exactly one worker
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub session: Arc<UploadSession>,
    pub part: Part,
    /// Zero-copy view into the shared source buffer
    pub payload: Bytes,
}

/// Acknowledgment for a successfully uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletedPart {
    pub index: u32,
    pub etag: String,
}

impl CompletedPart {
    pub fn new(index: u32, etag: impl Into<String>) -> Self {
        CompletedPart {
            index,
            etag: etag.into(),
        }
    }
}

/// Description of the object materialized by a successful finalize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub bucket: String,
    pub key: String,
    pub etag: Option<String>,
    pub location: Option<String>,
}
