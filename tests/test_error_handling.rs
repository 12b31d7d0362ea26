// Error classification and retry policy decisions

use multipart_upload::{RetryPolicy, UploadConfig, UploadError};
use std::time::Duration;

#[test]
fn test_status_classification() {
    for status in [400u16, 403, 404, 409] {
        let err = UploadError::from_http_status(status, "x");
        assert!(!err.should_retry(), "{} must not be retried", status);
    }
    for status in [500u16, 502, 503, 504] {
        let err = UploadError::from_http_status(status, "x");
        assert!(err.should_retry(), "{} must be retried", status);
    }
}

#[test]
fn test_policy_stops_at_max_attempts() {
    let policy = RetryPolicy::new(3);
    let err = UploadError::storage_server_error(503, "SlowDown");

    let attempts = (1..)
        .take_while(|attempt| policy.should_retry(*attempt, &err))
        .count()
        + 1;
    assert_eq!(attempts, 3);
}

#[test]
fn test_single_attempt_policy_never_retries() {
    let policy = RetryPolicy::new(1);
    assert!(!policy.should_retry(1, &UploadError::Timeout("slow".to_string())));
}

#[test]
fn test_policy_from_config() {
    let mut config = UploadConfig::new("media", 1024, 2, 4).unwrap();
    assert_eq!(RetryPolicy::from_config(&config), RetryPolicy::new(4));

    config.retry_backoff_ms = 50;
    let policy = RetryPolicy::from_config(&config);
    assert_eq!(policy.backoff_ms, vec![50, 100, 200]);
    assert_eq!(policy.backoff_duration(2), Duration::from_millis(100));
}

#[test]
fn test_aborted_error_message_names_cause() {
    let err = UploadError::Aborted {
        upload_id: "u-7".to_string(),
        cause: Box::new(UploadError::PartFailed {
            part_index: 4,
            attempts: 3,
            message: "503 SlowDown".to_string(),
        }),
        abort_failure: None,
    };

    let message = err.to_string();
    assert!(message.contains("u-7"));
    assert!(message.contains("Part 4 failed after 3 attempts"));
    assert!(!err.should_retry());
    assert!(!err.is_pre_session());
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
    let err: UploadError = io.into();
    assert!(matches!(err, UploadError::IoError(_)));
    assert!(err.should_retry());
}
