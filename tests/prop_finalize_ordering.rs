// Property: whatever order workers finish parts in, finalize receives every
// part exactly once, strictly increasing by index, and the stored object is
// byte-for-byte the source payload.

use bytes::Bytes;
use multipart_upload::{InitiateRequest, MemoryStorageClient, UploadConfig, UploadCoordinator};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_finalize_list_is_sorted_and_complete(
        delays in prop::collection::vec(0u64..8, 1..12),
        workers in 1usize..6,
        part_size in 1u64..64,
        tail in 1u64..64
    ) {
        let part_count = delays.len();
        let tail = tail.min(part_size);
        let size = part_size * (part_count as u64 - 1) + tail;
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        let rt = Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = rt.block_on(async {
            let mut client = MemoryStorageClient::new();
            for (position, delay) in delays.iter().enumerate() {
                client = client.delay_part(position as u32 + 1, Duration::from_millis(*delay));
            }
            let client = Arc::new(client);

            let config = UploadConfig::new("bucket", part_size, workers, 3).unwrap();
            let coordinator = UploadCoordinator::new(Arc::clone(&client), config).unwrap();
            let descriptor = coordinator
                .upload(Bytes::from(payload.clone()), InitiateRequest::new("bucket", "object"))
                .await;
            prop_assert!(descriptor.is_ok(), "upload failed: {:?}", descriptor.err());

            let finalize_calls = client.finalize_calls();
            prop_assert_eq!(finalize_calls.len(), 1, "finalize must be called exactly once");
            let expected: Vec<u32> = (1..=part_count as u32).collect();
            prop_assert_eq!(&finalize_calls[0], &expected);

            let stored = client.object("bucket", "object").unwrap();
            prop_assert_eq!(stored.data, Bytes::from(payload.clone()));
            prop_assert!(client.abort_calls().is_empty());

            Ok(())
        });

        result?;
    }
}
