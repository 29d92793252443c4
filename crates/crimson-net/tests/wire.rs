//! Cross-transport wire behavior.

use bytes::Bytes;
use crimson_net::{connect, direct_pair, Listener, Message, SocketListener, FLAG_ON_APPLY};

fn write(sequence: u32, payload: Vec<u8>) -> Message {
    Message::OsdWrite {
        sequence,
        object: "pipelined".to_string(),
        offset: u64::from(sequence) * 4096,
        flags: FLAG_ON_APPLY,
        data: Bytes::from(payload),
    }
}

#[tokio::test]
async fn socket_preserves_submission_order() {
    let mut listener = SocketListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let mut conn = connect(addr).await.unwrap();
        for sequence in 0..64u32 {
            conn.write_message(write(sequence, vec![sequence as u8; 1024]))
                .await
                .unwrap();
        }
        conn.close().await.unwrap();
    });

    let mut server = listener.accept().await.unwrap();
    for expected in 0..64u32 {
        let message = server.read_message().await.unwrap().unwrap();
        let Message::OsdWrite {
            sequence, data, ..
        } = message
        else {
            panic!("expected a write request");
        };
        assert_eq!(sequence, expected);
        assert_eq!(data, Bytes::from(vec![expected as u8; 1024]));
    }
    assert!(server.read_message().await.unwrap().is_none());
    client.await.unwrap();
}

#[tokio::test]
async fn socket_carries_large_payloads_intact() {
    let mut listener = SocketListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i * 31 % 251) as u8).collect();
    let expected = payload.clone();

    let client = tokio::spawn(async move {
        let mut conn = connect(addr).await.unwrap();
        conn.write_message(write(0, payload)).await.unwrap();
        let reply = conn.read_message().await.unwrap().unwrap();
        assert_eq!(reply.sequence(), 0);
        conn.close().await.unwrap();
    });

    let mut server = listener.accept().await.unwrap();
    let message = server.read_message().await.unwrap().unwrap();
    let Message::OsdWrite { data, .. } = message else {
        panic!("expected a write request");
    };
    assert_eq!(data, Bytes::from(expected));
    server
        .write_message(Message::OsdWriteReply {
            sequence: 0,
            flags: FLAG_ON_APPLY,
            error_code: 0,
        })
        .await
        .unwrap();

    assert!(server.read_message().await.unwrap().is_none());
    client.await.unwrap();
}

#[tokio::test]
async fn direct_pair_matches_socket_semantics() {
    let (mut a, mut b) = direct_pair();
    for sequence in 0..16u32 {
        a.write_message(write(sequence, vec![0u8; 64])).await.unwrap();
    }
    a.close().await.unwrap();

    for expected in 0..16u32 {
        let message = b.read_message().await.unwrap().unwrap();
        assert_eq!(message.sequence(), expected);
    }
    assert!(b.read_message().await.unwrap().is_none());
}
