use crate::*;

use clusterdfs_core::protocol::{messages, CodingRequest};
use clusterdfs_core::wire::{self, FrameKind};
use clusterdfs_core::{CodingInput, CodingOperation};
use datanoded::{ClientError, CodingReply};

async fn node_with_blocks(tag: &str, blocks: &[(&str, &[u8])]) -> TestNode {
    let node = TestNode::isolated(tag).await;
    for (name, data) in blocks {
        let response = node.client.store(&id(name), data, vec![]).await.unwrap();
        assert!(response.is_ok());
    }
    node
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| a.get(i).copied().unwrap_or(0) ^ b.get(i).copied().unwrap_or(0))
        .collect()
}

#[tokio::test]
async fn test_stream_coding_returns_parity_buffers() {
    let a = random_bytes(100_000);
    let b = random_bytes(60_000);
    let node = node_with_blocks("coding-stream", &[("d0", &a), ("d1", &b)]).await;

    let op = CodingOperation::stream(vec![
        CodingInput::new(id("d0"), 1),
        CodingInput::new(id("d1"), 1),
    ])
    .with_buffer_size(32 * 1024);

    let CodingReply::Stream(buffers) = node.client.coding(&op).await.unwrap() else {
        panic!("expected a stream reply");
    };
    assert_eq!(buffers.len(), 4);
    assert!(buffers[..3].iter().all(|b| b.len() == 32 * 1024));
    assert_eq!(buffers.concat(), xor(&a, &b));

    node.shutdown().await;
}

#[tokio::test]
async fn test_local_coding_persists_output_block() {
    let a = random_bytes(20_000);
    let b = random_bytes(20_000);
    let node = node_with_blocks("coding-local", &[("d0", &a), ("d1", &b)]).await;

    let op = CodingOperation::local(
        vec![CodingInput::new(id("d0"), 1), CodingInput::new(id("d1"), 1)],
        id("p0"),
    );
    match node.client.coding(&op).await.unwrap() {
        CodingReply::Done(response) => assert_eq!(response.msg, messages::CODING_DONE),
        other => panic!("unexpected reply {other:?}"),
    }

    let parity = node.client.retrieve(&id("p0"), None, None).await.unwrap();
    assert_eq!(&parity[..], &xor(&a, &b)[..]);

    // Parity plus one data block recovers the other.
    let recover = CodingOperation::stream(vec![
        CodingInput::new(id("p0"), 1),
        CodingInput::new(id("d1"), 1),
    ]);
    let CodingReply::Stream(buffers) = node.client.coding(&recover).await.unwrap() else {
        panic!("expected a stream reply");
    };
    assert_eq!(buffers.concat(), a);

    node.shutdown().await;
}

#[tokio::test]
async fn test_coding_with_missing_input_reports_block() {
    let node = node_with_blocks("coding-missing", &[("d0", b"abc")]).await;

    let op = CodingOperation::stream(vec![
        CodingInput::new(id("d0"), 1),
        CodingInput::new(id("ghost"), 1),
    ]);
    match node.client.coding(&op).await {
        Err(ClientError::Remote(msg)) => assert_eq!(msg, "Block 'ghost' not found."),
        other => panic!("unexpected {other:?}"),
    }

    node.shutdown().await;
}

#[tokio::test]
async fn test_malformed_coding_descriptor_is_rejected() {
    let node = TestNode::isolated("coding-bad").await;

    match node.client.coding_raw("{\"inputs\": 5}".to_string()).await {
        Err(ClientError::Remote(msg)) => {
            assert!(msg.starts_with("Invalid coding operation"), "msg: {msg}")
        }
        other => panic!("unexpected {other:?}"),
    }

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_input_lost_mid_stream_ends_with_error_header() {
    const LEN: usize = 48 * 1024 * 1024;
    const BUFFER: usize = 64 * 1024;

    let node = TestNode::isolated("coding-shrink").await;
    std::fs::write(node.dir.join("big"), vec![0x5a; LEN]).unwrap();

    let op = CodingOperation::stream(vec![CodingInput::new(id("big"), 1)]).with_buffer_size(BUFFER);
    let mut conn = Connection::connect(node.node.local_addr()).await.unwrap();
    conn.send(&Request::Coding(CodingRequest {
        coding: op.serialize().unwrap(),
    }))
    .await
    .unwrap();

    let first = conn.recv_frame().await.unwrap();
    assert_eq!(first.kind, FrameKind::Data);
    assert_eq!(first.payload.len(), BUFFER);

    std::fs::OpenOptions::new()
        .write(true)
        .open(node.dir.join("big"))
        .unwrap()
        .set_len(0)
        .unwrap();

    let mut received = first.payload.len();
    let last = loop {
        let frame = conn.recv_frame().await.unwrap();
        match frame.kind {
            FrameKind::Data => received += frame.payload.len(),
            _ => break frame,
        }
    };
    assert_eq!(last.kind, FrameKind::Header, "stream must not end with END");
    let response: ResponseHeader = wire::decode_header(&last).unwrap();
    assert!(!response.is_ok());
    assert_eq!(response.msg, messages::TRANSMISSION_FAILED);
    assert!(received < LEN, "received all {received} bytes");

    node.shutdown().await;
}

#[tokio::test]
async fn test_error_after_data_frames_is_a_remote_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = Connection::new(stream).unwrap();
        let Request::Coding(_) = conn.recv::<Request>().await.unwrap() else {
            panic!("expected CODING");
        };
        conn.send_frame(FrameKind::Data, &[1u8; 128]).await.unwrap();
        conn.send_frame(FrameKind::Data, &[2u8; 128]).await.unwrap();
        conn.send(&ResponseHeader::error(messages::TRANSMISSION_FAILED))
            .await
            .unwrap();
        conn.close().await;
    });

    let client = DataNodeClient::new(addr);
    let op = CodingOperation::stream(vec![CodingInput::new(id("d0"), 1)]);
    match client.coding(&op).await {
        Err(ClientError::Remote(msg)) => assert_eq!(msg, messages::TRANSMISSION_FAILED),
        other => panic!("partial stream must not be returned: {other:?}"),
    }

    server.await.unwrap();
}
