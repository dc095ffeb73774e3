//! Storage Module Tests
//!
//! Validates the slave's storage path end to end on a real filesystem.
//!
//! ## Test Scopes
//! - **Block Format**: Slot padding, size limits and slot offsets.
//! - **Batching**: Threshold flushes, explicit flushes and the empty-queue case.
//! - **Read Path**: Visibility only after a flush, unknown tags and missing block files.
//! - **Flush Failure**: Writes of a failed block are dropped and never become readable.
//! - **Credit**: Grant/spend accounting under concurrency.
//! - **Intake**: The write and fetch handlers of the client-facing service.

#[cfg(test)]
mod tests {
    use crate::directory::types::Tag;
    use crate::error::DfsError;
    use crate::storage::batcher::WriteBatcher;
    use crate::storage::block::{BLOCK_SUFFIX, BlockLocation, BlockStore, Slot};
    use crate::storage::handlers::handle_slave_status;
    use crate::storage::index::{TagIndex, TagReader};
    use crate::storage::ledger::CapacityLedger;
    use crate::storage::protocol::{RejectReason, SlaveRequest, SlaveResponse};
    use crate::storage::service::{SlaveClientService, bind_client_sockets};
    use axum::Json;
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use std::net::{IpAddr, SocketAddr};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::UdpSocket;
    use tokio_util::sync::CancellationToken;

    const BYTES_PER_SLOT: usize = 64;

    struct Fixture {
        _dir: TempDir,
        store: BlockStore,
        batcher: Arc<WriteBatcher>,
        reader: Arc<TagReader>,
    }

    fn fixture(slots_per_block: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::open(dir.path().join("blocks"), BYTES_PER_SLOT).unwrap();
        let index = Arc::new(TagIndex::new());
        let batcher = Arc::new(WriteBatcher::new(store.clone(), index.clone(), slots_per_block));
        let reader = Arc::new(TagReader::new(index, store.clone()));

        Fixture {
            _dir: dir,
            store,
            batcher,
            reader,
        }
    }

    fn block_files(root: &Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(root)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.to_string_lossy().ends_with(BLOCK_SUFFIX))
            .collect()
    }

    // ============================================================
    // SLOT TESTS
    // ============================================================

    #[test]
    fn test_slot_is_zero_padded() {
        let slot = Slot::new(b"hello".to_vec(), 16).unwrap();

        assert_eq!(slot.len(), 16);
        assert_eq!(&slot.as_bytes()[..5], b"hello");
        assert!(slot.as_bytes()[5..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn test_slot_accepts_exact_fit() {
        let slot = Slot::new(vec![7u8; 16], 16).unwrap();

        assert_eq!(slot.as_bytes(), &[7u8; 16]);
    }

    #[test]
    fn test_slot_rejects_oversized_content() {
        let result = Slot::new(vec![1u8; 17], 16);

        match result {
            Err(DfsError::ContentTooLarge { len, max }) => {
                assert_eq!(len, 17);
                assert_eq!(max, 16);
            }
            other => panic!("expected ContentTooLarge, got {:?}", other),
        }
    }

    // ============================================================
    // BATCHER TESTS
    // ============================================================

    #[test]
    fn test_writes_below_threshold_are_not_readable() {
        // ARRANGE
        let f = fixture(4);
        let tag = Tag::new();

        // ACT
        let flushed = f.batcher.enqueue(tag.clone(), b"pending".to_vec()).unwrap();

        // ASSERT
        assert!(flushed.is_none());
        assert_eq!(f.batcher.queued(), 1);
        assert!(block_files(f.store.root()).is_empty());
        assert!(matches!(f.reader.read(&tag), Err(DfsError::UnknownTag(_))));
    }

    #[test]
    fn test_threshold_flushes_exactly_one_full_block() {
        // ARRANGE
        let f = fixture(4);
        let tags: Vec<Tag> = (0..4).map(|_| Tag::new()).collect();

        // ACT
        let mut results = vec![];
        for (i, tag) in tags.iter().enumerate() {
            results.push(f.batcher.enqueue(tag.clone(), vec![i as u8 + 1; 8]).unwrap());
        }

        // ASSERT
        assert!(results[..3].iter().all(|flushed| flushed.is_none()));
        let flushed = results[3].clone().expect("fourth write should flush");
        assert_eq!(flushed.entries, 4);

        let files = block_files(f.store.root());
        assert_eq!(files.len(), 1);
        assert_eq!(
            std::fs::metadata(&files[0]).unwrap().len(),
            (4 * BYTES_PER_SLOT) as u64
        );

        assert_eq!(f.batcher.queued(), 0);
        assert_eq!(f.batcher.blocks_written(), 1);
        for (i, tag) in tags.iter().enumerate() {
            let location = f.batcher.index().lookup(tag).unwrap();
            assert_eq!(location.block, flushed.block);
            assert_eq!(location.slot, i as u32, "Slots follow enqueue order");
        }
    }

    #[test]
    fn test_explicit_flush_writes_partial_block() {
        // ARRANGE
        let f = fixture(4);
        let tags: Vec<Tag> = (0..3).map(|_| Tag::new()).collect();
        for tag in &tags {
            f.batcher.enqueue(tag.clone(), b"partial".to_vec()).unwrap();
        }

        // ACT
        let flushed = f.batcher.flush().unwrap();

        // ASSERT
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].entries, 3);

        let files = block_files(f.store.root());
        assert_eq!(files.len(), 1);
        assert_eq!(
            std::fs::metadata(&files[0]).unwrap().len(),
            (3 * BYTES_PER_SLOT) as u64
        );
        for tag in &tags {
            assert!(f.batcher.index().contains(tag));
        }
    }

    #[test]
    fn test_empty_flush_writes_nothing() {
        let f = fixture(4);

        let flushed = f.batcher.flush().unwrap();

        assert!(flushed.is_empty());
        assert!(block_files(f.store.root()).is_empty());
        assert_eq!(f.batcher.blocks_written(), 0);
    }

    #[test]
    fn test_each_block_holds_at_most_threshold_slots() {
        // ARRANGE
        let f = fixture(3);

        // ACT: two automatic flushes, one write left over
        let mut automatic = 0;
        for _ in 0..7 {
            if f.batcher.enqueue(Tag::new(), b"x".to_vec()).unwrap().is_some() {
                automatic += 1;
            }
        }
        let tail = f.batcher.flush().unwrap();

        // ASSERT
        assert_eq!(automatic, 2);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].entries, 1);
        assert_eq!(block_files(f.store.root()).len(), 3);
        assert_eq!(f.batcher.index().len(), 7);
    }

    #[test]
    fn test_oversized_write_is_never_queued() {
        let f = fixture(4);

        let result = f.batcher.enqueue(Tag::new(), vec![0xAB; BYTES_PER_SLOT + 1]);

        assert!(matches!(result, Err(DfsError::ContentTooLarge { .. })));
        assert_eq!(f.batcher.queued(), 0);
    }

    // ============================================================
    // READ PATH TESTS
    // ============================================================

    #[test]
    fn test_read_returns_padded_slot() {
        // ARRANGE
        let f = fixture(2);
        let a = Tag::new();
        let b = Tag::new();
        f.batcher.enqueue(a.clone(), b"first".to_vec()).unwrap();
        f.batcher.enqueue(b.clone(), b"second".to_vec()).unwrap();

        // ACT
        let bytes = f.reader.read(&b).unwrap();

        // ASSERT
        assert_eq!(bytes.len(), BYTES_PER_SLOT);
        assert_eq!(&bytes[..6], b"second");
        assert!(bytes[6..].iter().all(|byte| *byte == 0));
        assert_eq!(&f.reader.read(&a).unwrap()[..5], b"first");
    }

    #[test]
    fn test_read_unknown_tag() {
        let f = fixture(2);
        let tag = Tag("missing".to_string());

        match f.reader.read(&tag) {
            Err(DfsError::UnknownTag(unknown)) => assert_eq!(unknown, tag),
            other => panic!("expected UnknownTag, got {:?}", other),
        }
    }

    #[test]
    fn test_read_from_deleted_block_is_storage_unavailable() {
        // ARRANGE
        let f = fixture(1);
        let tag = Tag::new();
        let flushed = f.batcher.enqueue(tag.clone(), b"gone".to_vec()).unwrap().unwrap();
        std::fs::remove_file(f.store.root().join(&flushed.block)).unwrap();

        // ACT
        let result = f.reader.read(&tag);

        // ASSERT
        assert!(matches!(result, Err(DfsError::StorageUnavailable { .. })));
    }

    #[test]
    fn test_index_never_repoints_a_tag() {
        // ARRANGE
        let index = TagIndex::new();
        let tag = Tag::new();
        let first = BlockLocation {
            block: "a.block".to_string(),
            slot: 0,
        };
        let second = BlockLocation {
            block: "b.block".to_string(),
            slot: 5,
        };

        // ACT
        index.publish(vec![(tag.clone(), first.clone())]);
        index.publish(vec![(tag.clone(), second)]);

        // ASSERT
        assert_eq!(index.lookup(&tag).unwrap(), first);
        assert_eq!(index.len(), 1);
    }

    // ============================================================
    // FLUSH FAILURE TESTS
    // ============================================================

    #[test]
    fn test_failed_threshold_flush_never_stores_the_write() {
        // ARRANGE
        let f = fixture(1);
        let tag = Tag::new();
        std::fs::remove_dir_all(f.store.root()).unwrap();

        // ACT
        let result = f.batcher.enqueue(tag.clone(), b"lost".to_vec());

        // ASSERT
        assert!(matches!(result, Err(DfsError::StorageUnavailable { .. })));
        assert_eq!(f.batcher.queued(), 0, "The rejected write must not stay queued");

        // Storage comes back: the rejected write must not surface later.
        std::fs::create_dir_all(f.store.root()).unwrap();
        assert!(f.batcher.flush().unwrap().is_empty());
        assert!(matches!(f.reader.read(&tag), Err(DfsError::UnknownTag(_))));
        assert_eq!(f.batcher.blocks_written(), 0);
        assert!(block_files(f.store.root()).is_empty());
    }

    #[test]
    fn test_explicit_flush_failure_drops_dequeued_writes() {
        // ARRANGE
        let f = fixture(4);
        let a = Tag::new();
        let b = Tag::new();
        f.batcher.enqueue(a.clone(), b"alpha".to_vec()).unwrap();
        f.batcher.enqueue(b.clone(), b"beta".to_vec()).unwrap();
        std::fs::remove_dir_all(f.store.root()).unwrap();

        // ACT
        let result = f.batcher.flush();

        // ASSERT
        assert!(matches!(result, Err(DfsError::StorageUnavailable { .. })));
        assert_eq!(f.batcher.queued(), 0);
        assert_eq!(f.batcher.blocks_written(), 0);
        for tag in [&a, &b] {
            assert!(matches!(f.batcher.index().lookup(tag), Err(DfsError::UnknownTag(_))));
        }
    }

    #[test]
    fn test_queue_stays_bounded_while_storage_is_gone() {
        // ARRANGE: the block root is replaced by a regular file
        let f = fixture(3);
        std::fs::remove_dir_all(f.store.root()).unwrap();
        std::fs::write(f.store.root(), b"").unwrap();

        // ACT
        let mut tags = vec![];
        let mut failures = 0;
        for _ in 0..9 {
            let tag = Tag::new();
            if f.batcher.enqueue(tag.clone(), b"x".to_vec()).is_err() {
                failures += 1;
            }
            tags.push(tag);
            assert!(f.batcher.queued() < 3);
        }

        // ASSERT
        assert_eq!(failures, 3, "Every third write triggers a failing flush");
        assert_eq!(f.batcher.queued(), 0);
        assert_eq!(f.batcher.blocks_written(), 0);
        assert!(f.batcher.index().is_empty());
        for tag in &tags {
            assert!(matches!(f.reader.read(tag), Err(DfsError::UnknownTag(_))));
        }
    }

    #[test]
    fn test_open_on_regular_file_is_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, b"").unwrap();

        let result = BlockStore::open(&root, BYTES_PER_SLOT);

        assert!(matches!(result, Err(DfsError::StorageUnavailable { .. })));
    }

    // ============================================================
    // LEDGER TESTS
    // ============================================================

    #[test]
    fn test_spend_until_exhausted() {
        // ARRANGE
        let ledger = CapacityLedger::new();
        let client: IpAddr = "10.0.0.1".parse().unwrap();
        ledger.grant(client, 2);

        // ACT + ASSERT
        assert!(ledger.try_spend(client));
        assert!(ledger.try_spend(client));
        assert!(!ledger.try_spend(client), "Third spend must fail");
        assert_eq!(ledger.balance(client), 0);
        assert_eq!(ledger.clients_with_credit(), 0);
    }

    #[test]
    fn test_spend_without_grant_fails() {
        let ledger = CapacityLedger::new();
        let client: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(!ledger.try_spend(client));
        assert_eq!(ledger.balance(client), 0);
    }

    #[test]
    fn test_grants_accumulate_per_client() {
        let ledger = CapacityLedger::new();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        ledger.grant(a, 1);
        ledger.grant(a, 1);
        ledger.grant(b, 3);

        assert_eq!(ledger.balance(a), 2);
        assert_eq!(ledger.balance(b), 3);
        assert_eq!(ledger.clients_with_credit(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_spend_never_overdraws() {
        // ARRANGE
        let ledger = Arc::new(CapacityLedger::new());
        let client: IpAddr = "10.0.0.3".parse().unwrap();
        ledger.grant(client, 100);

        // ACT
        let mut handles = vec![];
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let mut spent = 0;
                for _ in 0..20 {
                    if ledger.try_spend(client) {
                        spent += 1;
                    }
                }
                spent
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        // ASSERT
        assert_eq!(total, 100, "Exactly the granted credits are spent");
        assert_eq!(ledger.balance(client), 0);
    }

    // ============================================================
    // INTAKE TESTS
    // ============================================================

    async fn intake(f: &Fixture) -> (Arc<SlaveClientService>, Arc<CapacityLedger>) {
        let ledger = Arc::new(CapacityLedger::new());
        let (write_socket, fetch_socket) =
            bind_client_sockets("127.0.0.1".parse().unwrap(), 0).await.unwrap();
        let service = SlaveClientService::new(
            write_socket,
            fetch_socket,
            f.batcher.clone(),
            f.reader.clone(),
            ledger.clone(),
            CancellationToken::new(),
        );
        (service, ledger)
    }

    #[tokio::test]
    async fn test_fetch_port_is_write_port_plus_one() {
        let f = fixture(2);
        let (service, _) = intake(&f).await;

        let write = service.write_addr().unwrap();
        let fetch = service.fetch_addr().unwrap();

        assert_eq!(fetch.port(), write.port() + 1);
    }

    #[tokio::test]
    async fn test_write_without_credit_is_rejected() {
        // ARRANGE
        let f = fixture(2);
        let (service, _) = intake(&f).await;
        let client: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        let tag = Tag::new();

        // ACT
        let response = service.handle_write(tag.clone(), b"data".to_vec(), client).await;

        // ASSERT
        assert_eq!(
            response,
            SlaveResponse::Rejected {
                tag,
                reason: RejectReason::NoCredit
            }
        );
        assert_eq!(f.batcher.queued(), 0, "Rejected writes are never queued");
    }

    #[tokio::test]
    async fn test_oversized_write_keeps_credit() {
        // ARRANGE
        let f = fixture(2);
        let (service, ledger) = intake(&f).await;
        let client: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        ledger.grant(client.ip(), 1);

        // ACT
        let response = service
            .handle_write(Tag::new(), vec![1u8; BYTES_PER_SLOT * 2], client)
            .await;

        // ASSERT
        assert!(matches!(
            response,
            SlaveResponse::Rejected {
                reason: RejectReason::ContentTooLarge { .. },
                ..
            }
        ));
        assert_eq!(ledger.balance(client.ip()), 1);
    }

    #[tokio::test]
    async fn test_failed_write_returns_credit() {
        // ARRANGE
        let f = fixture(1);
        let (service, ledger) = intake(&f).await;
        let client: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        ledger.grant(client.ip(), 1);
        let tag = Tag::new();
        std::fs::remove_dir_all(f.store.root()).unwrap();

        // ACT
        let response = service.handle_write(tag.clone(), b"payload".to_vec(), client).await;

        // ASSERT
        assert_eq!(
            response,
            SlaveResponse::Rejected {
                tag: tag.clone(),
                reason: RejectReason::StorageUnavailable
            }
        );
        assert_eq!(ledger.balance(client.ip()), 1);
        assert_eq!(f.batcher.queued(), 0);
        assert_eq!(service.handle_fetch(tag.clone()).await, SlaveResponse::UnknownTag { tag });
    }

    #[tokio::test]
    async fn test_credited_write_then_fetch() {
        // ARRANGE
        let f = fixture(2);
        let (service, ledger) = intake(&f).await;
        let client: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        ledger.grant(client.ip(), 1);
        let tag = Tag::new();

        // ACT
        let written = service.handle_write(tag.clone(), b"payload".to_vec(), client).await;
        let before_flush = service.handle_fetch(tag.clone()).await;
        f.batcher.flush().unwrap();
        let after_flush = service.handle_fetch(tag.clone()).await;

        // ASSERT
        assert_eq!(written, SlaveResponse::Accepted { tag: tag.clone() });
        assert_eq!(before_flush, SlaveResponse::UnknownTag { tag: tag.clone() });
        match after_flush {
            SlaveResponse::Content { tag: got, bytes } => {
                assert_eq!(got, tag);
                assert_eq!(bytes.len(), BYTES_PER_SLOT);
                assert_eq!(&bytes[..7], b"payload");
            }
            other => panic!("expected Content, got {:?}", other),
        }
        assert_eq!(ledger.balance(client.ip()), 0);
    }

    #[tokio::test]
    async fn test_fetch_on_write_port_is_rejected() {
        // ARRANGE
        let f = fixture(2);
        let (service, _) = intake(&f).await;
        let write_addr = service.write_addr().unwrap();
        service.clone().start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let tag = Tag::new();

        // ACT
        let request = SlaveRequest::Fetch { tag: tag.clone() };
        client
            .send_to(&bincode::serialize(&request).unwrap(), write_addr)
            .await
            .unwrap();

        let mut buf = vec![0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let response: SlaveResponse = bincode::deserialize(&buf[..len]).unwrap();

        // ASSERT
        assert_eq!(
            response,
            SlaveResponse::Rejected {
                tag,
                reason: RejectReason::WrongPort
            }
        );
    }

    #[tokio::test]
    async fn test_http_status_reports_queue_and_credit() {
        // ARRANGE
        let f = fixture(4);
        let ledger = Arc::new(CapacityLedger::new());
        ledger.grant("10.0.0.1".parse().unwrap(), 2);
        f.batcher.enqueue(Tag::new(), b"queued".to_vec()).unwrap();

        // ACT
        let (code, Json(status)) =
            handle_slave_status(Extension(f.batcher.clone()), Extension(ledger)).await;

        // ASSERT
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status.queued_writes, 1);
        assert_eq!(status.indexed_tags, 0);
        assert_eq!(status.blocks_written, 0);
        assert_eq!(status.clients_with_credit, 1);
        assert_eq!(status.slots_per_block, 4);
        assert_eq!(status.bytes_per_slot, BYTES_PER_SLOT);
    }
}
