//! Storage service capability consumed by the upload engine
//!
//! The engine never talks to the network directly. Everything it needs from
//! the object store is expressed by [`StorageClient`]; [`HttpStorageClient`]
//! speaks S3-compatible REST and [`MemoryStorageClient`] keeps everything in
//! process.
//!
//! [`HttpStorageClient`]: crate::http_client::HttpStorageClient
//! [`MemoryStorageClient`]: crate::memory_client::MemoryStorageClient

use crate::error::Result;
use crate::models::{CompletedPart, InitiateRequest, ObjectDescriptor, UploadSession};
use async_trait::async_trait;
use bytes::Bytes;

/// Multipart operations of an object storage service
///
/// Every operation may fail with a transient error (see
/// [`UploadError::should_retry`]) or a permanent one.
///
/// [`UploadError::should_retry`]: crate::error::UploadError::should_retry
#[async_trait]
pub trait StorageClient: Send + Sync + 'static {
    /// Open a multipart session and return its upload id
    async fn initiate(&self, request: &InitiateRequest) -> Result<String>;

    /// Upload one part and return the etag the service assigned to it
    async fn upload_part(
        &self,
        session: &UploadSession,
        part_index: u32,
        payload: Bytes,
    ) -> Result<String>;

    /// Materialize the object from its parts
    ///
    /// `parts` must be strictly increasing by index and cover
    /// `1..=session.total_parts`.
    async fn finalize(
        &self,
        session: &UploadSession,
        parts: &[CompletedPart],
    ) -> Result<ObjectDescriptor>;

    /// Discard the session and every part uploaded into it
    async fn abort(&self, session: &UploadSession) -> Result<()>;
}
