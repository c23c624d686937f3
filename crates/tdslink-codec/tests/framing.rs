//! Framing behavior over real byte streams.

#![allow(clippy::unwrap_used, missing_docs)]

use bytes::Bytes;
use tdslink_codec::{CodecError, Connection, PacketFramer};
use tdslink_protocol::PacketType;
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

#[tokio::test]
async fn large_message_crosses_duplex_pipe() {
    let (client, server) = duplex(1024);
    let mut client = Connection::with_packet_size(client, 512).unwrap();
    let mut server = Connection::with_packet_size(server, 512).unwrap();

    let payload: Bytes = (0..10_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();
    let sent = payload.clone();
    let writer = tokio::spawn(async move {
        client.send_message(PacketType::SqlBatch, sent).await.unwrap();
        client
    });

    let message = server.read_message().await.unwrap();
    writer.await.unwrap();

    assert_eq!(message.packet_type, PacketType::SqlBatch);
    assert_eq!(message.payload, payload);
    assert_eq!(message.packet_count, 10_000usize.div_ceil(504));
}

#[tokio::test]
async fn packet_size_change_applies_to_next_message() {
    let (client, mut raw) = duplex(4096);
    let mut client = Connection::new(client);

    client.send_message(PacketType::SqlBatch, Bytes::from(vec![1u8; 600])).await.unwrap();
    client.set_packet_size(512).unwrap();
    client.send_message(PacketType::SqlBatch, Bytes::from(vec![2u8; 600])).await.unwrap();
    drop(client);

    let mut wire = Vec::new();
    raw.read_to_end(&mut wire).await.unwrap();
    let mut wire = Bytes::from(wire);

    let wide = PacketFramer::new(4096).unwrap();
    let first = wide.decode(&mut wire).unwrap().unwrap();
    assert_eq!(first.packet_count, 1);
    let second = wide.decode(&mut wire).unwrap().unwrap();
    assert_eq!(second.packet_count, 2);
    assert!(second.payload.iter().all(|b| *b == 2));
}

#[tokio::test]
async fn mid_message_close_is_incomplete() {
    let (client, mut raw) = duplex(4096);
    let mut client = Connection::new(client);

    let framer = PacketFramer::new(16).unwrap();
    let wire = framer.encode_to_bytes(PacketType::TabularResult, &[9u8; 20], 1);
    // first packet only, then hang up
    raw.write_all(&wire[..16]).await.unwrap();
    drop(raw);

    assert!(matches!(
        client.read_message().await,
        Err(CodecError::IncompleteMessage)
    ));
}
