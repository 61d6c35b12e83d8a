//! End-to-end tests against a minimal in-process mock TDS server.
//!
//! The mock server understands just enough of the wire format to script a
//! login handshake and a handful of query/prepare/execute replies; it never
//! interprets the client's request bytes beyond reassembling them into a
//! logical message.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tds5_client::{ConnectOptions, Connection, ConnectionState, OpResult, Value};
use tds5_protocol::codec::write_b_varchar;
use tds5_protocol::{DecodedPacket, DoneStatus, PacketType, TdsVersion, TokenType, TypeId, decode_packet, encode_packets};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn recv_logical_message(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mut payload = Vec::new();
    loop {
        match decode_packet(&buf).unwrap() {
            DecodedPacket::Packet { last, body, consumed } => {
                payload.extend_from_slice(&body);
                let _ = buf.split_to(consumed);
                if last {
                    return payload;
                }
            }
            DecodedPacket::Incomplete => {
                let mut chunk = [0_u8; 4096];
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "peer closed mid-message");
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

async fn send_tokens(stream: &mut TcpStream, body: &[u8]) {
    let framed = encode_packets(body, PacketType::TabularResult, 512);
    stream.write_all(&framed).await.unwrap();
}

fn done_bytes(status: DoneStatus, count: u64) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(TokenType::Done as u8);
    buf.put_u16_le(status.bits());
    buf.put_u16_le(0);
    buf.put_u64_le(count);
    buf
}

fn login_ack_and_done() -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(TokenType::LoginAck as u8);
    buf.put_u8(0); // sub_state: Connected
    buf.put_u32_le(TdsVersion::V5_0.raw());
    write_b_varchar(&mut buf, "sybase");
    buf.put_slice(&[5, 0, 0, 0]);
    buf.extend_from_slice(&done_bytes(DoneStatus::COUNT, 0));
    buf
}

fn envchange_packet_size(new_value: &str, old_value: &str) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(TokenType::EnvChange as u8);
    buf.put_u8(4); // raw key: packet_size
    write_b_varchar(&mut buf, new_value);
    write_b_varchar(&mut buf, old_value);
    buf
}

fn single_int_row(column: &str, value: i32) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(TokenType::RowFormat as u8);
    buf.put_u16_le(1);
    write_b_varchar(&mut buf, ""); // label_name
    write_b_varchar(&mut buf, column);
    buf.put_u8(TypeId::Int4 as u8);
    buf.put_u8(TokenType::Row as u8);
    buf.put_i32_le(value);
    buf
}

fn dynamic_ack(stmt_id: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(TokenType::Dynamic as u8);
    buf.put_u8(0x01); // op byte, unused by the decoder beyond skipping
    buf.put_u8(0); // status: success
    buf.put_u8(stmt_id.len() as u8);
    buf.put_slice(stmt_id);
    buf
}

fn params_format_one_int() -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(TokenType::ParamsFormat as u8);
    buf.put_u16_le(1);
    write_b_varchar(&mut buf, "");
    write_b_varchar(&mut buf, "p1");
    buf.put_u8(TypeId::Int4 as u8);
    buf
}

#[tokio::test]
async fn full_session_against_mock_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let _login = recv_logical_message(&mut stream).await;
        send_tokens(&mut stream, &login_ack_and_done()).await;

        // S1-style empty query.
        let _ = recv_logical_message(&mut stream).await;
        send_tokens(&mut stream, &done_bytes(DoneStatus::COUNT, 0)).await;

        // A query whose reply renegotiates packet_size and returns one row.
        let _ = recv_logical_message(&mut stream).await;
        let mut reply = envchange_packet_size("4096", "512");
        reply.extend_from_slice(&single_int_row("x", 7));
        reply.extend_from_slice(&done_bytes(DoneStatus::COUNT, 1));
        send_tokens(&mut stream, &reply).await;

        // prepare
        let _ = recv_logical_message(&mut stream).await;
        let mut reply = dynamic_ack(b"s1");
        reply.extend_from_slice(&params_format_one_int());
        reply.extend_from_slice(&done_bytes(DoneStatus::COUNT, 0));
        send_tokens(&mut stream, &reply).await;

        // execute without args
        let _ = recv_logical_message(&mut stream).await;
        send_tokens(&mut stream, &done_bytes(DoneStatus::COUNT, 0)).await;

        // execute with args
        let _ = recv_logical_message(&mut stream).await;
        send_tokens(&mut stream, &done_bytes(DoneStatus::COUNT, 0)).await;
    });

    let opts = ConnectOptions::new().host("127.0.0.1").port(addr.port());
    let mut conn = Connection::connect(opts, Duration::from_secs(2)).await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.packet_size(), 512);

    let results = conn.sql_query("select 1", Duration::from_secs(2)).await.unwrap();
    assert_eq!(results, vec![OpResult::AffectedRows(0)]);

    let results = conn.sql_query("select x from t", Duration::from_secs(2)).await.unwrap();
    assert_eq!(conn.packet_size(), 4096);
    assert_eq!(conn.environment().get("packet_size"), Some("4096"));
    assert_eq!(
        results,
        vec![OpResult::ResultSet {
            columns: vec!["x".to_string()],
            meta: vec![],
            rows: vec![vec![Value::Int(7)]],
        }]
    );

    conn.prepare(b"s1".to_vec(), "select * from t where id = ?", Duration::from_secs(2))
        .await
        .unwrap();

    let results = conn.execute(b"s1", vec![], Duration::from_secs(2)).await.unwrap();
    assert_eq!(results, vec![OpResult::AffectedRows(0)]);

    let results = conn
        .execute(b"s1", vec![Value::Int(42)], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(results, vec![OpResult::AffectedRows(0)]);

    server.await.unwrap();
}

#[tokio::test]
async fn reconnect_on_disconnected_connection_surfaces_connect_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = recv_logical_message(&mut stream).await;
        send_tokens(&mut stream, &login_ack_and_done()).await;
        // The listener and stream are dropped here: the peer goes away and
        // nothing is listening at `addr` anymore.
    });

    let opts = ConnectOptions::new().host("127.0.0.1").port(addr.port());
    let mut conn = Connection::connect(opts, Duration::from_secs(2)).await.unwrap();
    server.await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);

    // The peer is gone; this request's write or read fails, forcing the
    // connection to Disconnected (§4.2/§4.3).
    let _ = conn.sql_query("select 1", Duration::from_millis(500)).await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    // Property 6: the next operation on a Disconnected connection attempts
    // exactly one reconnect to the preserved environment; since nothing
    // listens at `addr` anymore, that reconnect fails and its error becomes
    // the operation's error.
    let err = conn
        .sql_query("select 1", Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(err.is_socket());
}

#[tokio::test]
async fn reconnect_clears_the_prepared_statement_registry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First connection: log in, then acknowledge a prepare.
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = recv_logical_message(&mut stream).await;
        send_tokens(&mut stream, &login_ack_and_done()).await;

        let _ = recv_logical_message(&mut stream).await;
        let mut reply = dynamic_ack(b"s1");
        reply.extend_from_slice(&params_format_one_int());
        reply.extend_from_slice(&done_bytes(DoneStatus::COUNT, 0));
        send_tokens(&mut stream, &reply).await;
        drop(stream); // the peer goes away right after the prepare ack

        // Second connection: just the reconnect login. No further request
        // is expected — the stale "s1" registration is rejected locally
        // before any execute bytes are sent.
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = recv_logical_message(&mut stream).await;
        send_tokens(&mut stream, &login_ack_and_done()).await;
    });

    let opts = ConnectOptions::new().host("127.0.0.1").port(addr.port());
    let mut conn = Connection::connect(opts, Duration::from_secs(2)).await.unwrap();
    conn.prepare(b"s1".to_vec(), "select * from t where id = ?", Duration::from_secs(2))
        .await
        .unwrap();

    // The peer is gone; this request observes the dead socket and forces a
    // disconnect.
    let first = conn.execute(b"s1", vec![Value::Int(1)], Duration::from_millis(500)).await;
    assert!(first.is_err());
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    // The next call transparently reconnects, which clears the prepared
    // registry (§3 invariant 4); replaying args for "s1" is now rejected
    // locally rather than sent to a server that never prepared it.
    let err = conn
        .execute(b"s1", vec![Value::Int(1)], Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(err.is_local());

    server.await.unwrap();
}
