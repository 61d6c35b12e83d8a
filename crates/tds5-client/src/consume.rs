//! Token-stream consumer (§4.4).
//!
//! Pulls tokens one at a time out of a reassembled payload, routing
//! connection-mutating side effects straight to the connection and
//! accumulating everything else in a buffer until a `done` token partitions
//! it into a result. `dynamic`/`paramsformat` tokens are data tokens like any
//! other as far as the result assembler is concerned, but `prepare` needs
//! their verbatim content, so the consumer additionally remembers the last
//! one of each it saw.

use bytes::Bytes;
use tds5_protocol::{DecodeContext, DoneStatus, DynamicAck, Token, decode_token};

use crate::assemble::{OpResult, Signal, assemble_segment};
use crate::connection::Connection;
use crate::error::Error;

/// Everything the consumer produced from one reassembled reply.
#[derive(Debug, Default)]
pub struct ConsumeOutcome {
    /// Results, in arrival order.
    pub results: Vec<OpResult>,
    /// The last `dynamic` acknowledgment seen, if any.
    pub last_dynamic_ack: Option<DynamicAck>,
    /// The verbatim bytes of the last `paramsformat` token seen, if any.
    pub last_params_format: Option<Bytes>,
}

/// Consume a reassembled payload, applying side effects to `conn` and
/// returning the results it produced.
pub fn consume(payload: &[u8], conn: &mut Connection) -> Result<ConsumeOutcome, Error> {
    let mut ctx = DecodeContext::default();
    let mut offset = 0usize;
    let mut buffer: Vec<Token> = Vec::new();
    let mut outcome = ConsumeOutcome::default();

    loop {
        let remaining = &payload[offset..];
        let Some((token, consumed)) = decode_token(remaining, &mut ctx)? else {
            break;
        };

        match token {
            Token::LoginAck(ack) => conn.apply_login_ack(&ack),
            Token::Capability(cap) => conn.apply_capability(&cap),
            Token::EnvChange(change) => conn.apply_env_change(&change)?,
            Token::Done(done) => {
                if let Signal::Segment = assemble_segment(&buffer, done, &mut outcome.results)? {
                    buffer.clear();
                }
            }
            Token::Dynamic(ack) => {
                outcome.last_dynamic_ack = Some(ack.clone());
                buffer.push(Token::Dynamic(ack));
            }
            Token::ParamsFormat(format) => {
                outcome.last_params_format = Some(Bytes::copy_from_slice(&remaining[..consumed]));
                buffer.push(Token::ParamsFormat(format));
            }
            other => buffer.push(other),
        }

        offset += consumed;
    }

    Ok(outcome)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::ConnectOptions;
    use bytes::{BufMut, BytesMut};
    use tds5_protocol::codec::write_b_varchar;
    use tds5_protocol::TokenType;

    fn done_bytes(status: DoneStatus, count: u64) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(TokenType::Done as u8);
        buf.put_u16_le(status.bits());
        buf.put_u16_le(0);
        buf.put_u64_le(count);
        buf
    }

    #[test]
    fn s1_empty_query() {
        let mut conn = Connection::offline(ConnectOptions::new());
        let payload = done_bytes(DoneStatus::COUNT, 0);
        let outcome = consume(&payload, &mut conn).unwrap();
        assert_eq!(outcome.results, vec![OpResult::AffectedRows(0)]);
    }

    #[test]
    fn s3_multi_segment_preserves_order() {
        let mut conn = Connection::offline(ConnectOptions::new());
        let mut payload = BytesMut::new();

        // segment 1: rowformat("a","a"), row([1]), done(count|more, 1)
        payload.put_u8(TokenType::RowFormat as u8);
        payload.put_u16_le(1);
        write_b_varchar(&mut payload, "a");
        write_b_varchar(&mut payload, "a");
        payload.put_u8(tds5_protocol::TypeId::Int4 as u8);
        payload.put_u8(TokenType::Row as u8);
        payload.put_i32_le(1);
        payload.extend_from_slice(&done_bytes(DoneStatus::COUNT | DoneStatus::MORE, 1));

        // segment 2: rowformat("b","b"), row([2]), row([3]), done(count, 2)
        payload.put_u8(TokenType::RowFormat as u8);
        payload.put_u16_le(1);
        write_b_varchar(&mut payload, "b");
        write_b_varchar(&mut payload, "b");
        payload.put_u8(tds5_protocol::TypeId::Int4 as u8);
        payload.put_u8(TokenType::Row as u8);
        payload.put_i32_le(2);
        payload.put_u8(TokenType::Row as u8);
        payload.put_i32_le(3);
        payload.extend_from_slice(&done_bytes(DoneStatus::COUNT, 2));

        let outcome = consume(&payload, &mut conn).unwrap();
        assert_eq!(
            outcome.results,
            vec![
                OpResult::ResultSet {
                    columns: vec!["a".to_string()],
                    meta: vec![],
                    rows: vec![vec![value_int(1)]],
                },
                OpResult::ResultSet {
                    columns: vec!["b".to_string()],
                    meta: vec![],
                    rows: vec![vec![value_int(2)], vec![value_int(3)]],
                },
            ]
        );
    }

    fn value_int(n: i64) -> tds5_protocol::Value {
        tds5_protocol::Value::Int(n)
    }
}
