//! In-process implementation of [`StorageClient`]
//!
//! Keeps sessions and finished objects in memory and journals every call,
//! which makes it the backend for `--dry-run` and for exercising the upload
//! engine's failure handling. Faults can be injected per operation and per
//! part.

use crate::error::{Result, UploadError};
use crate::models::{CompletedPart, InitiateRequest, ObjectDescriptor, StorageClass, UploadSession};
use crate::storage_client::StorageClient;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// One call received by the in-memory store, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    Initiate {
        bucket: String,
        key: String,
        storage_class: StorageClass,
    },
    UploadPart {
        upload_id: String,
        part_index: u32,
    },
    Finalize {
        upload_id: String,
        part_indices: Vec<u32>,
    },
    Abort {
        upload_id: String,
    },
}

/// An object materialized by a successful finalize
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub etag: String,
    pub content_type: String,
    pub storage_class: StorageClass,
}

struct PendingUpload {
    request: InitiateRequest,
    /// part index -> (payload, etag)
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Default)]
struct FaultPlan {
    initiate: Option<UploadError>,
    finalize: Option<UploadError>,
    abort: Option<UploadError>,
    /// Remaining transient failures per part index
    transient_parts: HashMap<u32, usize>,
    permanent_parts: HashSet<u32>,
    part_delays: HashMap<u32, Duration>,
}

#[derive(Default)]
struct MemoryState {
    next_upload_id: u64,
    pending: HashMap<String, PendingUpload>,
    aborted: HashSet<String>,
    objects: HashMap<(String, String), StoredObject>,
    journal: Vec<StorageCall>,
    faults: FaultPlan,
}

/// In-memory object store speaking the multipart protocol
#[derive(Default)]
pub struct MemoryStorageClient {
    state: Mutex<MemoryState>,
}

impl MemoryStorageClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| UploadError::InternalError("memory store lock poisoned".to_string()))
    }

    fn configure(&self, apply: impl FnOnce(&mut FaultPlan)) {
        if let Ok(mut state) = self.state.lock() {
            apply(&mut state.faults);
        }
    }

    /// Make every `initiate` call fail with `error`
    pub fn fail_initiate(self, error: UploadError) -> Self {
        self.configure(|faults| faults.initiate = Some(error));
        self
    }

    /// Make every `finalize` call fail with `error`
    pub fn fail_finalize(self, error: UploadError) -> Self {
        self.configure(|faults| faults.finalize = Some(error));
        self
    }

    /// Make every `abort` call fail with `error`
    pub fn fail_abort(self, error: UploadError) -> Self {
        self.configure(|faults| faults.abort = Some(error));
        self
    }

    /// Fail the next `times` uploads of `part_index` with a 503
    pub fn fail_part(self, part_index: u32, times: usize) -> Self {
        self.configure(|faults| {
            faults.transient_parts.insert(part_index, times);
        });
        self
    }

    /// Fail every upload of `part_index` with a 403
    pub fn fail_part_permanently(self, part_index: u32) -> Self {
        self.configure(|faults| {
            faults.permanent_parts.insert(part_index);
        });
        self
    }

    /// Hold every upload of `part_index` for `delay` before answering
    pub fn delay_part(self, part_index: u32, delay: Duration) -> Self {
        self.configure(|faults| {
            faults.part_delays.insert(part_index, delay);
        });
        self
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<StorageCall> {
        self.state()
            .map(|state| state.journal.clone())
            .unwrap_or_default()
    }

    pub fn upload_part_calls(&self, part_index: u32) -> usize {
        self.calls()
            .iter()
            .filter(|call| match call {
                StorageCall::UploadPart { part_index: idx, .. } => *idx == part_index,
                _ => false,
            })
            .count()
    }

    pub fn abort_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StorageCall::Abort { upload_id } => Some(upload_id),
                _ => None,
            })
            .collect()
    }

    pub fn finalize_calls(&self) -> Vec<Vec<u32>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StorageCall::Finalize { part_indices, .. } => Some(part_indices),
                _ => None,
            })
            .collect()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state()
            .ok()?
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of sessions that are neither finalized nor aborted
    pub fn open_sessions(&self) -> usize {
        self.state().map(|state| state.pending.len()).unwrap_or(0)
    }

    fn no_such_upload(upload_id: &str) -> UploadError {
        UploadError::storage_client_error(404, format!("NoSuchUpload: {}", upload_id))
    }
}

#[async_trait]
impl StorageClient for MemoryStorageClient {
    async fn initiate(&self, request: &InitiateRequest) -> Result<String> {
        let mut state = self.state()?;
        state.journal.push(StorageCall::Initiate {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            storage_class: request.storage_class,
        });
        if let Some(error) = state.faults.initiate.clone() {
            return Err(error);
        }

        state.next_upload_id += 1;
        let upload_id = format!("mem-{:08}", state.next_upload_id);
        state.pending.insert(
            upload_id.clone(),
            PendingUpload {
                request: request.clone(),
                parts: BTreeMap::new(),
            },
        );
        debug!("Opened in-memory session {} for {}/{}", upload_id, request.bucket, request.key);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_index: u32,
        payload: Bytes,
    ) -> Result<String> {
        let delay = {
            let mut state = self.state()?;
            state.journal.push(StorageCall::UploadPart {
                upload_id: session.upload_id.clone(),
                part_index,
            });
            state.faults.part_delays.get(&part_index).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state()?;
        if state.faults.permanent_parts.contains(&part_index) {
            return Err(UploadError::storage_client_error(403, "AccessDenied"));
        }
        if let Some(remaining) = state.faults.transient_parts.get_mut(&part_index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(UploadError::storage_server_error(503, "SlowDown"));
            }
        }

        let pending = state
            .pending
            .get_mut(&session.upload_id)
            .ok_or_else(|| Self::no_such_upload(&session.upload_id))?;
        let etag = format!("\"{:016x}\"", xxh3_64(&payload));
        pending.parts.insert(part_index, (payload, etag.clone()));
        Ok(etag)
    }

    async fn finalize(
        &self,
        session: &UploadSession,
        parts: &[CompletedPart],
    ) -> Result<ObjectDescriptor> {
        let mut state = self.state()?;
        state.journal.push(StorageCall::Finalize {
            upload_id: session.upload_id.clone(),
            part_indices: parts.iter().map(|p| p.index).collect(),
        });
        if let Some(error) = state.faults.finalize.clone() {
            return Err(error);
        }

        let pending = state
            .pending
            .get(&session.upload_id)
            .ok_or_else(|| Self::no_such_upload(&session.upload_id))?;

        let dense = parts
            .iter()
            .enumerate()
            .all(|(position, part)| part.index as usize == position + 1);
        if !dense || parts.len() != session.total_parts {
            return Err(UploadError::storage_client_error(
                400,
                "InvalidPartOrder: parts must be 1..=N in ascending order",
            ));
        }

        let mut data = BytesMut::new();
        let mut etags = String::new();
        for part in parts {
            match pending.parts.get(&part.index) {
                Some((payload, etag)) if *etag == part.etag => {
                    data.extend_from_slice(payload);
                    etags.push_str(etag);
                }
                _ => {
                    return Err(UploadError::storage_client_error(
                        400,
                        format!("InvalidPart: {}", part.index),
                    ))
                }
            }
        }

        let object = StoredObject {
            data: data.freeze(),
            etag: format!("\"{:016x}-{}\"", xxh3_64(etags.as_bytes()), parts.len()),
            content_type: pending.request.content_type.clone(),
            storage_class: pending.request.storage_class,
        };
        let descriptor = ObjectDescriptor {
            bucket: session.bucket.clone(),
            key: session.key.clone(),
            etag: Some(object.etag.clone()),
            location: Some(format!("memory://{}/{}", session.bucket, session.key)),
        };

        state.pending.remove(&session.upload_id);
        state
            .objects
            .insert((session.bucket.clone(), session.key.clone()), object);
        Ok(descriptor)
    }

    async fn abort(&self, session: &UploadSession) -> Result<()> {
        let mut state = self.state()?;
        state.journal.push(StorageCall::Abort {
            upload_id: session.upload_id.clone(),
        });
        if let Some(error) = state.faults.abort.clone() {
            return Err(error);
        }

        if state.pending.remove(&session.upload_id).is_some() {
            state.aborted.insert(session.upload_id.clone());
            Ok(())
        } else if state.aborted.contains(&session.upload_id) {
            Ok(())
        } else {
            Err(Self::no_such_upload(&session.upload_id))
        }
    }
}
