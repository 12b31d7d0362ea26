// End-to-end upload flows against the in-memory store

use bytes::Bytes;
use multipart_upload::{
    InitiateRequest, MemoryStorageClient, StorageCall, StorageClass, UploadConfig,
    UploadCoordinator, UploadError, UploadState,
};
use std::sync::Arc;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

fn payload(size: u64) -> Bytes {
    Bytes::from((0..size).map(|i| (i % 241) as u8).collect::<Vec<u8>>())
}

fn coordinator(
    client: &Arc<MemoryStorageClient>,
    part_size: u64,
    workers: usize,
    max_attempts: usize,
) -> UploadCoordinator<MemoryStorageClient> {
    let config = UploadConfig::new("media", part_size, workers, max_attempts).unwrap();
    UploadCoordinator::new(Arc::clone(client), config).unwrap()
}

fn upload_calls_after_abort(calls: &[StorageCall]) -> usize {
    calls
        .iter()
        .skip_while(|call| !matches!(call, StorageCall::Abort { .. }))
        .filter(|call| matches!(call, StorageCall::UploadPart { .. }))
        .count()
}

#[tokio::test]
async fn test_twelve_mib_upload_in_three_parts() {
    let client = Arc::new(MemoryStorageClient::new());
    let coordinator = coordinator(&client, 5 * MIB, 5, 3);
    let data = payload(12 * MIB);

    let request = InitiateRequest::new("media", "videos/clip.mp4")
        .with_content_type("video/mp4")
        .with_storage_class(StorageClass::StandardIa);
    let descriptor = coordinator.upload(data.clone(), request).await.unwrap();

    assert_eq!(descriptor.bucket, "media");
    assert_eq!(descriptor.key, "videos/clip.mp4");
    assert!(descriptor.etag.is_some());
    assert_eq!(coordinator.state(), UploadState::Completed);

    assert_eq!(client.finalize_calls(), vec![vec![1, 2, 3]]);
    assert!(client.abort_calls().is_empty());
    for index in 1..=3 {
        assert_eq!(client.upload_part_calls(index), 1);
    }

    let object = client.object("media", "videos/clip.mp4").unwrap();
    assert_eq!(object.data, data);
    assert_eq!(object.content_type, "video/mp4");
    assert_eq!(object.storage_class, StorageClass::StandardIa);
    assert_eq!(client.open_sessions(), 0);

    let calls = client.calls();
    assert!(matches!(calls.first(), Some(StorageCall::Initiate { .. })));
    assert!(matches!(calls.last(), Some(StorageCall::Finalize { .. })));
}

#[tokio::test]
async fn test_out_of_order_completion_is_finalized_in_order() {
    let client = Arc::new(
        MemoryStorageClient::new()
            .delay_part(1, Duration::from_millis(60))
            .delay_part(2, Duration::from_millis(30)),
    );
    let coordinator = coordinator(&client, 4, 4, 3);
    let data = payload(14);

    coordinator
        .upload(data.clone(), InitiateRequest::new("media", "digits"))
        .await
        .unwrap();

    assert_eq!(client.finalize_calls(), vec![vec![1, 2, 3, 4]]);
    assert_eq!(client.object("media", "digits").unwrap().data, data);
}

#[tokio::test]
async fn test_part_exhausting_retries_aborts_upload() {
    let client = Arc::new(MemoryStorageClient::new().fail_part(2, 3));
    let coordinator = coordinator(&client, 5 * MIB, 5, 3);

    let err = coordinator
        .upload(payload(12 * MIB), InitiateRequest::new("media", "videos/clip.mp4"))
        .await
        .unwrap_err();

    match &err {
        UploadError::Aborted {
            upload_id,
            abort_failure,
            ..
        } => {
            assert_eq!(client.abort_calls(), vec![upload_id.clone()]);
            assert!(abort_failure.is_none());
        }
        other => panic!("expected Aborted, got {:?}", other),
    }
    assert!(matches!(
        err.fatal_cause(),
        UploadError::PartFailed {
            part_index: 2,
            attempts: 3,
            ..
        }
    ));

    assert_eq!(client.upload_part_calls(2), 3);
    assert!(client.finalize_calls().is_empty());
    assert_eq!(client.open_sessions(), 0);
    assert_eq!(coordinator.state(), UploadState::Aborted);

    let stats = coordinator.metrics().get_stats();
    assert_eq!(stats.uploads_aborted, 1);
    assert_eq!(stats.abort_calls, 1);
    assert_eq!(stats.part_retries, 2);
}

#[tokio::test]
async fn test_transient_failures_within_limit_are_tolerated() {
    let client = Arc::new(MemoryStorageClient::new().fail_part(2, 2));
    let coordinator = coordinator(&client, 5 * MIB, 5, 3);
    let data = payload(12 * MIB);

    coordinator
        .upload(data.clone(), InitiateRequest::new("media", "videos/clip.mp4"))
        .await
        .unwrap();

    assert_eq!(client.upload_part_calls(2), 3);
    assert!(client.abort_calls().is_empty());
    assert_eq!(client.finalize_calls(), vec![vec![1, 2, 3]]);
    assert_eq!(client.object("media", "videos/clip.mp4").unwrap().data, data);
    assert_eq!(coordinator.metrics().get_stats().part_retries, 2);
}

#[tokio::test]
async fn test_empty_file_is_rejected_before_any_call() {
    let client = Arc::new(MemoryStorageClient::new());
    let coordinator = coordinator(&client, 5 * MIB, 5, 3);

    let result = coordinator
        .upload(Bytes::new(), InitiateRequest::new("media", "empty.bin"))
        .await;

    assert!(matches!(result, Err(UploadError::ConfigError(_))));
    assert!(client.calls().is_empty());
    assert_eq!(coordinator.state(), UploadState::Failed);
}

#[tokio::test]
async fn test_initiate_failure_sends_nothing_else() {
    let client = Arc::new(
        MemoryStorageClient::new()
            .fail_initiate(UploadError::storage_client_error(403, "AccessDenied")),
    );
    let coordinator = coordinator(&client, 4, 2, 3);

    let err = coordinator
        .upload(payload(10), InitiateRequest::new("media", "k"))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::InitiateError(_)));
    assert!(err.is_pre_session());
    assert_eq!(client.calls().len(), 1);
    assert!(client.abort_calls().is_empty());
    assert_eq!(coordinator.state(), UploadState::Failed);
}

#[tokio::test]
async fn test_finalize_failure_leaves_session_open() {
    let client = Arc::new(
        MemoryStorageClient::new()
            .fail_finalize(UploadError::storage_server_error(500, "InternalError")),
    );
    let coordinator = coordinator(&client, 4, 2, 3);

    let err = coordinator
        .upload(payload(10), InitiateRequest::new("media", "k"))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::FinalizeError(_)));
    assert_eq!(client.finalize_calls().len(), 1);
    assert!(client.abort_calls().is_empty());
    assert_eq!(client.open_sessions(), 1);
    assert_eq!(coordinator.state(), UploadState::Failed);
    assert_eq!(coordinator.metrics().get_stats().finalize_failures, 1);
}

#[tokio::test]
async fn test_abort_failure_is_kept_apart_from_cause() {
    let client = Arc::new(
        MemoryStorageClient::new()
            .fail_part_permanently(1)
            .fail_abort(UploadError::storage_server_error(503, "SlowDown")),
    );
    let coordinator = coordinator(&client, 4, 1, 3);

    let err = coordinator
        .upload(payload(10), InitiateRequest::new("media", "k"))
        .await
        .unwrap_err();

    match &err {
        UploadError::Aborted {
            cause,
            abort_failure,
            ..
        } => {
            assert!(matches!(cause.as_ref(), UploadError::PartFailed { part_index: 1, .. }));
            assert!(matches!(
                abort_failure.as_deref(),
                Some(UploadError::StorageServerError { status: 503, .. })
            ));
        }
        other => panic!("expected Aborted, got {:?}", other),
    }

    assert_eq!(client.abort_calls().len(), 1);
    assert!(client.finalize_calls().is_empty());
    assert_eq!(coordinator.metrics().get_stats().abort_failures, 1);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let client = Arc::new(MemoryStorageClient::new().fail_part_permanently(2));
    let coordinator = coordinator(&client, 4, 2, 5);

    let err = coordinator
        .upload(payload(12), InitiateRequest::new("media", "k"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.fatal_cause(),
        UploadError::PartFailed {
            part_index: 2,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(client.upload_part_calls(2), 1);
    assert_eq!(client.abort_calls().len(), 1);
}

#[tokio::test]
async fn test_abort_stops_every_other_worker() {
    let client = Arc::new(
        MemoryStorageClient::new()
            .delay_part(1, Duration::from_millis(20))
            .fail_part_permanently(1)
            .delay_part(2, Duration::from_secs(10))
            .delay_part(3, Duration::from_secs(10)),
    );
    let coordinator = coordinator(&client, 4, 3, 3);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.upload(payload(24), InitiateRequest::new("media", "k")),
    )
    .await
    .expect("in-flight parts must be cancelled once the upload is aborted");

    let err = result.unwrap_err();
    assert!(matches!(err.fatal_cause(), UploadError::PartFailed { part_index: 1, .. }));

    let calls = client.calls();
    assert_eq!(client.abort_calls().len(), 1);
    assert_eq!(upload_calls_after_abort(&calls), 0);
    for index in 4..=6 {
        assert_eq!(client.upload_part_calls(index), 0, "part {} must never be sent", index);
    }
    assert!(client.finalize_calls().is_empty());
}

#[tokio::test]
async fn test_abort_interrupts_retry_backoff() {
    let client = Arc::new(
        MemoryStorageClient::new()
            .fail_part(1, 5)
            .delay_part(2, Duration::from_millis(20))
            .fail_part_permanently(2),
    );
    let mut config = UploadConfig::new("media", 4, 2, 3).unwrap();
    config.retry_backoff_ms = 20_000;
    let coordinator = UploadCoordinator::new(Arc::clone(&client), config).unwrap();

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.upload(payload(8), InitiateRequest::new("media", "k")),
    )
    .await
    .expect("a worker waiting out its backoff must stop once the upload is aborted");

    let err = result.unwrap_err();
    assert!(matches!(err.fatal_cause(), UploadError::PartFailed { part_index: 2, .. }));
    assert!(started.elapsed() < Duration::from_secs(5));

    // Part 1 failed once and was still sleeping when part 2 aborted the upload
    assert_eq!(client.upload_part_calls(1), 1);
    assert_eq!(client.abort_calls().len(), 1);
    assert_eq!(upload_calls_after_abort(&client.calls()), 0);
    assert!(client.finalize_calls().is_empty());
    assert_eq!(coordinator.metrics().get_stats().part_retries, 1);
}

#[tokio::test]
async fn test_coordinator_can_run_again_after_abort() {
    let client = Arc::new(MemoryStorageClient::new().fail_part(1, 1));
    let coordinator = coordinator(&client, 4, 2, 1);

    let first = coordinator
        .upload(payload(8), InitiateRequest::new("media", "k"))
        .await;
    assert!(first.is_err());
    assert_eq!(coordinator.state(), UploadState::Aborted);

    // The injected failure was consumed by the first run
    let second = coordinator
        .upload(payload(8), InitiateRequest::new("media", "k"))
        .await;
    assert!(second.is_ok());
    assert_eq!(coordinator.state(), UploadState::Completed);

    let sessions: Vec<String> = client
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            StorageCall::Finalize { upload_id, .. } => Some(upload_id),
            _ => None,
        })
        .collect();
    assert_eq!(sessions, vec!["mem-00000002".to_string()]);
}

#[test]
fn test_upload_blocking() {
    let client = Arc::new(MemoryStorageClient::new());
    let config = UploadConfig::new("media", 3, 2, 2).unwrap();
    let data = payload(10);

    let descriptor = multipart_upload::upload_blocking(
        Arc::clone(&client),
        data.clone(),
        InitiateRequest::new("media", "blocking"),
        config,
    )
    .unwrap();

    assert_eq!(descriptor.key, "blocking");
    assert_eq!(client.object("media", "blocking").unwrap().data, data);
}
