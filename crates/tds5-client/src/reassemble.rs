//! Packet reassembler (§4.3).
//!
//! Reads TCP until a logical message — a run of packets ending in the last
//! packet flag — is complete, concatenating the packet bodies in order. The
//! receive buffer persists across calls on the same connection so that bytes
//! belonging to the next message (there shouldn't be any in this protocol,
//! since requests are synchronous, but a chatty server could still pipeline)
//! are never discarded.

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::time::{self, Duration};

use tds5_protocol::{DecodedPacket, decode_packet};

use crate::error::Error;

const READ_CHUNK: usize = 4096;

/// Read and reassemble one complete logical message from `reader`.
pub async fn reassemble<R>(
    reader: &mut R,
    recv_buffer: &mut BytesMut,
    timeout: Duration,
) -> Result<Bytes, Error>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut payload = BytesMut::new();

    loop {
        match decode_packet(recv_buffer)? {
            DecodedPacket::Packet { last, body, consumed } => {
                payload.extend_from_slice(&body);
                let _ = recv_buffer.split_to(consumed);
                if last {
                    return Ok(payload.freeze());
                }
            }
            DecodedPacket::Incomplete => {
                let mut chunk = [0_u8; READ_CHUNK];
                let n = time::timeout(timeout, reader.read(&mut chunk))
                    .await
                    .map_err(Error::from)?
                    .map_err(Error::from)?;
                if n == 0 {
                    return Err(Error::socket(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed while reassembling a reply",
                    )));
                }
                recv_buffer.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds5_protocol::{PacketType, encode_packets};

    use tokio::io::AsyncWriteExt;

    async fn framed_reader(bytes: Bytes) -> tokio::io::DuplexStream {
        let (mut client, server) = tokio::io::duplex(bytes.len().max(1) + 64);
        client.write_all(&bytes).await.unwrap();
        drop(client);
        server
    }

    #[tokio::test]
    async fn reassembles_a_single_packet_message() {
        let body = b"hello".to_vec();
        let framed = encode_packets(&body, PacketType::TabularResult, 512);
        let mut reader = framed_reader(framed).await;
        let mut recv_buffer = BytesMut::new();

        let payload = reassemble(&mut reader, &mut recv_buffer, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&payload[..], &body[..]);
    }

    #[tokio::test]
    async fn reassembles_a_fragmented_message() {
        let body = vec![7_u8; 2000];
        let framed = encode_packets(&body, PacketType::TabularResult, 512);
        let mut reader = framed_reader(framed).await;
        let mut recv_buffer = BytesMut::new();

        let payload = reassemble(&mut reader, &mut recv_buffer, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&payload[..], &body[..]);
    }

    #[tokio::test]
    async fn closed_connection_surfaces_socket_error() {
        let mut reader = framed_reader(Bytes::new()).await;
        let mut recv_buffer = BytesMut::new();

        let err = reassemble(&mut reader, &mut recv_buffer, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_socket());
    }
}
