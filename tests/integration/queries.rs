use crate::*;

use clusterdfs_core::protocol::messages;
use clusterdfs_core::wire::{self, FrameKind};
use datanoded::ClientError;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

async fn assert_round_trip(len: usize) {
    let node = TestNode::isolated("roundtrip").await;
    let data = random_bytes(len);
    let block = id(&format!("blk_{len}"));

    let response = node.client.store(&block, &data, vec![]).await.unwrap();
    assert!(response.is_ok(), "store failed: {response:?}");
    assert_eq!(response.msg, messages::BLOCK_STORED);

    let fetched = node.client.retrieve(&block, None, None).await.unwrap();
    assert_eq!(fetched.len(), len);
    assert!(fetched == data, "retrieved bytes differ for {len}-byte block");
    assert_eq!(node.on_disk(block.as_str()).unwrap(), data);

    node.shutdown().await;
}

#[tokio::test]
async fn test_round_trip_single_byte() {
    assert_round_trip(1).await;
}

#[tokio::test]
async fn test_round_trip_one_page() {
    assert_round_trip(4096).await;
}

#[tokio::test]
async fn test_round_trip_ten_megabytes() {
    assert_round_trip(10 * 1024 * 1024).await;
}

#[tokio::test]
async fn test_retrieve_range_and_offset() {
    let node = TestNode::isolated("range").await;
    let data = random_bytes(100);
    let block = id("blk_range");
    node.client.store(&block, &data, vec![]).await.unwrap();

    let slice = node.client.retrieve(&block, Some(10), Some(20)).await.unwrap();
    assert_eq!(&slice[..], &data[10..30]);

    let head = node.client.retrieve(&block, None, Some(5)).await.unwrap();
    assert_eq!(&head[..], &data[..5]);

    let whole = node.client.retrieve(&block, Some(0), Some(100)).await.unwrap();
    assert_eq!(&whole[..], &data[..]);

    let empty = node.client.retrieve(&block, Some(100), Some(0)).await.unwrap();
    assert!(empty.is_empty());

    node.shutdown().await;
}

#[tokio::test]
async fn test_retrieve_out_of_range_is_rejected() {
    let node = TestNode::isolated("range-err").await;
    let block = id("blk_short");
    node.client.store(&block, &random_bytes(100), vec![]).await.unwrap();

    for (offset, length) in [(Some(50), Some(60)), (None, Some(101)), (Some(10), None)] {
        match node.client.retrieve(&block, offset, length).await {
            Err(ClientError::Remote(msg)) => assert_eq!(msg, messages::RANGE_EXCEEDS_BLOCK),
            other => panic!("offset {offset:?} length {length:?}: unexpected {other:?}"),
        }
    }

    // The node keeps serving after rejecting a range.
    let whole = node.client.retrieve(&block, None, None).await.unwrap();
    assert_eq!(whole.len(), 100);

    node.shutdown().await;
}

#[tokio::test]
async fn test_retrieve_missing_block() {
    let node = TestNode::isolated("missing").await;
    match node.client.retrieve(&id("nope"), None, None).await {
        Err(ClientError::Remote(msg)) => assert_eq!(msg, "Block 'nope' not found."),
        other => panic!("unexpected {other:?}"),
    }
    node.shutdown().await;
}

#[tokio::test]
async fn test_store_rejects_non_positive_length() {
    let node = TestNode::isolated("size").await;

    for (name, length) in [("blk_zero", 0), ("blk_negative", -5)] {
        let header = StoreRequest {
            id: id(name),
            length,
            fwdlist: None,
        };
        let response = node.client.send_store(header, &[]).await.unwrap();
        assert!(!response.is_ok());
        assert_eq!(response.msg, messages::BLOCK_SIZE_NOT_POSITIVE);
        assert!(node.on_disk(name).is_none(), "{name} should not exist");
    }

    node.shutdown().await;
}

#[tokio::test]
async fn test_store_overwrites_existing_block() {
    let node = TestNode::isolated("overwrite").await;
    let block = id("blk_ow");

    node.client.store(&block, &random_bytes(1000), vec![]).await.unwrap();
    let second = random_bytes(10);
    node.client.store(&block, &second, vec![]).await.unwrap();

    let fetched = node.client.retrieve(&block, None, None).await.unwrap();
    assert_eq!(&fetched[..], &second[..]);

    node.shutdown().await;
}

#[tokio::test]
async fn test_short_body_is_a_transmission_failure() {
    let node = TestNode::isolated("short").await;

    let mut stream = TcpStream::connect(node.node.local_addr()).await.unwrap();
    let header = Request::Store(StoreRequest {
        id: id("blk_short_body"),
        length: 100,
        fwdlist: None,
    });
    wire::send_header(&mut stream, &header).await.unwrap();
    stream.write_all(&[7u8; 50]).await.unwrap();
    stream.shutdown().await.unwrap();

    let response: ResponseHeader = wire::recv_header(&mut stream).await.unwrap();
    assert!(!response.is_ok());
    assert_eq!(response.msg, messages::TRANSMISSION_FAILED);

    node.shutdown().await;
}

#[tokio::test]
async fn test_malformed_header_gets_error() {
    let node = TestNode::isolated("malformed").await;

    let mut stream = TcpStream::connect(node.node.local_addr()).await.unwrap();
    let bogus = serde_json::json!({"op": "DELETE", "id": "blk"});
    wire::write_frame(&mut stream, FrameKind::Header, bogus.to_string().as_bytes())
        .await
        .unwrap();

    let response: ResponseHeader = wire::recv_header(&mut stream).await.unwrap();
    assert!(!response.is_ok());
    assert_eq!(response.msg, messages::MALFORMED_REQUEST);

    node.shutdown().await;
}

#[tokio::test]
async fn test_idle_connection_does_not_block_others() {
    let node = TestNode::isolated("idle").await;

    // Connect and never send anything.
    let _idle = TcpStream::connect(node.node.local_addr()).await.unwrap();

    let block = id("blk_busy");
    let data = random_bytes(2048);
    node.client.store(&block, &data, vec![]).await.unwrap();
    let fetched = node.client.retrieve(&block, None, None).await.unwrap();
    assert_eq!(&fetched[..], &data[..]);

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stores_of_distinct_blocks() {
    let node = TestNode::isolated("concurrent").await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let client = node.client.clone();
        tasks.push(tokio::spawn(async move {
            let block = id(&format!("blk_c{i}"));
            let data = random_bytes(64 * 1024 + i * 17);
            let response = client.store(&block, &data, vec![]).await.unwrap();
            assert!(response.is_ok());
            (block, data)
        }));
    }

    for task in tasks {
        let (block, data) = task.await.unwrap();
        let fetched = node.client.retrieve(&block, None, None).await.unwrap();
        assert!(fetched == data, "{block} corrupted");
    }

    node.shutdown().await;
}
