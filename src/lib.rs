//! Multipart Upload
//!
//! Uploads a large file to an S3-compatible object store by splitting it into
//! fixed-size parts, uploading the parts concurrently, and stitching them
//! back together with a single finalize call.
//!
//! # Overview
//!
//! An upload opens a multipart session, queues one task per part, and lets a
//! fixed pool of workers drain the queue. Parts finish in any order; their
//! acknowledgments are collected and sorted by part number before the
//! session is finalized. A part that keeps failing aborts the whole session
//! and stops every other worker, so no part is uploaded into a session that
//! no longer exists.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use multipart_upload::{InitiateRequest, MemoryStorageClient, UploadConfig, UploadCoordinator};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = UploadConfig::new("media", 5 * 1024 * 1024, 5, 3)?;
//! let client = Arc::new(MemoryStorageClient::new());
//! let coordinator = UploadCoordinator::new(client, config)?;
//!
//! let payload = bytes::Bytes::from(vec![0u8; 12 * 1024 * 1024]);
//! let object = coordinator
//!     .upload(payload, InitiateRequest::new("media", "videos/clip.mp4"))
//!     .await?;
//! println!("Uploaded {}", object.key);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`PartCalculator`]: splits a byte count into numbered parts
//! - [`StorageClient`]: the object store's multipart operations
//! - [`TaskQueue`]: bounded queue of part tasks, closed by its producer
//! - [`WorkerPool`]: workers uploading parts with retry and abort handling
//! - [`PartAggregator`]: collects acknowledgments and orders them
//! - [`UploadCoordinator`]: the session state machine tying it together
//!
//! # Configuration
//!
//! ```yaml
//! bucket: media
//! endpoint: "http://127.0.0.1:9000"
//! part_size: 5242880       # 5MB parts
//! workers: 5               # 5 concurrent uploads
//! max_attempts: 3          # attempts per part before aborting
//! storage_class: STANDARD
//! ```
//!
//! See [`UploadConfig`] for every option.

pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http_client;
pub mod memory_client;
pub mod metrics;
pub mod models;
pub mod part_calculator;
pub mod source;
pub mod storage_client;
pub mod task_queue;
pub mod worker_pool;

// Re-export commonly used types
pub use aggregator::{AggregationProgress, PartAggregator};
pub use config::UploadConfig;
pub use coordinator::{upload_blocking, UploadCoordinator, UploadState};
pub use error::{Result, UploadError};
pub use http_client::HttpStorageClient;
pub use memory_client::{MemoryStorageClient, StorageCall};
pub use metrics::{MetricsSnapshot, UploadMetrics};
pub use models::{
    ByteRange, CompletedPart, InitiateRequest, ObjectDescriptor, Part, StorageClass,
    UploadSession, UploadTask,
};
pub use part_calculator::PartCalculator;
pub use source::UploadSource;
pub use storage_client::StorageClient;
pub use task_queue::{TaskQueue, TaskReceiver};
pub use worker_pool::{RetryPolicy, WorkerEvent, WorkerPool};
