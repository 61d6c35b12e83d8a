//! Encoding of logical request token descriptors into wire bytes.
//!
//! This is the encoder half of the codec interface the connection core
//! consumes: it never looks inside a [`TokenDescriptor`] beyond what's
//! needed to lay out bytes, and it has no notion of packets or sockets.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{write_b_varchar, write_us_varchar};
use crate::types::Value;

/// Login environment fields carried in a `{login, env}` descriptor.
#[derive(Debug, Clone, Default)]
pub struct LoginEnv {
    /// Client host name.
    pub host: String,
    /// Login user name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Client application name.
    pub app_name: String,
    /// Client library name.
    pub lib_name: String,
    /// Requested session language.
    pub language: String,
    /// Requested TDS packet size in bytes.
    pub packet_size: u32,
}

/// Which dynamic (prepared-statement) operation a `dynamic` descriptor performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicOp {
    /// Create a server-side prepared statement.
    Prepare,
    /// Invoke a previously prepared statement.
    Execute,
}

bitflags! {
    /// Flags accompanying a `dynamic` descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DynamicFlags: u8 {
        /// The request supplies argument values (a `paramsformat` + `params`
        /// pair follows).
        const HASARGS = 0x01;
    }
}

/// One logical token to encode into a request's byte stream.
///
/// This mirrors §6 of the core specification: the core only ever builds
/// requests out of these six shapes.
#[derive(Debug, Clone)]
pub enum TokenDescriptor {
    /// `{login, env}` — the login bundle.
    Login(LoginEnv),
    /// `{logout, []}`.
    Logout,
    /// `{language, bytes}` — pre-converted query text.
    Language(Vec<u8>),
    /// `{dynamic, op, flags, stmt_id, body}`.
    Dynamic {
        /// Prepare or execute.
        op: DynamicOp,
        /// Request flags.
        flags: DynamicFlags,
        /// Statement identifier.
        stmt_id: Vec<u8>,
        /// Statement body (SQL text for `prepare`, empty for `execute`).
        body: Vec<u8>,
    },
    /// `{params, values}`.
    Params(Vec<Value>),
    /// Verbatim re-emission of a previously received `paramsformat` token.
    ParamsFormatEcho(Bytes),
}

fn encode_login(dst: &mut BytesMut, env: &LoginEnv) {
    dst.put_u8(0x02); // pre-TDS7-style login packet marker, kept for readability
    write_b_varchar(dst, &env.host);
    write_b_varchar(dst, &env.user);
    write_b_varchar(dst, &env.password);
    write_b_varchar(dst, &env.app_name);
    write_b_varchar(dst, &env.lib_name);
    write_b_varchar(dst, &env.language);
    dst.put_u32_le(env.packet_size);
}

fn encode_dynamic(
    dst: &mut BytesMut,
    op: DynamicOp,
    flags: DynamicFlags,
    stmt_id: &[u8],
    body: &[u8],
) {
    dst.put_u8(0xE7); // TDS_DYNAMIC
    dst.put_u8(match op {
        DynamicOp::Prepare => 0x01,
        DynamicOp::Execute => 0x02,
    });
    dst.put_u8(flags.bits());
    dst.put_u8(stmt_id.len().min(255) as u8);
    dst.put_slice(&stmt_id[..stmt_id.len().min(255)]);
    dst.put_u16_le(body.len().min(u16::MAX as usize) as u16);
    dst.put_slice(&body[..body.len().min(u16::MAX as usize)]);
}

fn encode_params(dst: &mut BytesMut, values: &[Value]) {
    dst.put_u8(0xD7); // TDS_PARAMS
    dst.put_u16_le(values.len().min(u16::MAX as usize) as u16);
    for value in values {
        encode_value(dst, value);
    }
}

fn encode_value(dst: &mut BytesMut, value: &Value) {
    match value {
        Value::Null => {
            dst.put_u8(0x1F); // TypeId::Null
            dst.put_u8(0);
        }
        Value::Int(n) => {
            dst.put_u8(0x7F); // TypeId::Int8
            dst.put_i64_le(*n);
        }
        Value::Float(f) => {
            dst.put_u8(0x3E); // TypeId::Float8
            dst.put_f64_le(*f);
        }
        Value::Bool(b) => {
            dst.put_u8(0x32); // TypeId::Bit
            dst.put_u8(u8::from(*b));
        }
        Value::Text(s) => {
            dst.put_u8(0x27); // TypeId::VarChar
            let bytes = s.as_bytes();
            dst.put_u8(bytes.len().min(255) as u8);
            dst.put_slice(&bytes[..bytes.len().min(255)]);
        }
        Value::Binary(b) => {
            dst.put_u8(0x25); // TypeId::VarBinary
            dst.put_u8(b.len().min(255) as u8);
            dst.put_slice(&b[..b.len().min(255)]);
        }
    }
}

/// Encode a list of logical token descriptors into the request body.
#[must_use]
pub fn encode_tokens(descriptors: &[TokenDescriptor]) -> Bytes {
    let mut dst = BytesMut::new();
    for descriptor in descriptors {
        match descriptor {
            TokenDescriptor::Login(env) => encode_login(&mut dst, env),
            TokenDescriptor::Logout => dst.put_u8(0x01), // TDS_LOGOUT-equivalent marker
            TokenDescriptor::Language(bytes) => {
                dst.put_u8(0x21); // TDS_LANGUAGE
                dst.put_u32_le(bytes.len() as u32);
                dst.put_slice(bytes);
            }
            TokenDescriptor::Dynamic { op, flags, stmt_id, body } => {
                encode_dynamic(&mut dst, *op, *flags, stmt_id, body);
            }
            TokenDescriptor::Params(values) => encode_params(&mut dst, values),
            TokenDescriptor::ParamsFormatEcho(bytes) => dst.put_slice(bytes),
        }
    }
    dst.freeze()
}

/// UTF-8 text to UTF-16LE bytes, the conversion the wire expects for
/// character data. The core calls this once per query; the codec never
/// sees the text again, so nothing downstream can double-encode it.
#[must_use]
pub fn encode_query_text(text: &str) -> Vec<u8> {
    let mut dst = BytesMut::new();
    write_us_varchar(&mut dst, text);
    dst.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_descriptor_encodes_nonempty() {
        let env = LoginEnv {
            host: "client1".into(),
            user: "sa".into(),
            password: "secret".into(),
            app_name: "tds5-client".into(),
            lib_name: "tds5".into(),
            language: "us_english".into(),
            packet_size: 512,
        };
        let bytes = encode_tokens(&[TokenDescriptor::Login(env)]);
        assert!(!bytes.is_empty());
    }

    #[test]
    fn dynamic_execute_with_args_includes_params() {
        let bytes = encode_tokens(&[
            TokenDescriptor::Dynamic {
                op: DynamicOp::Execute,
                flags: DynamicFlags::HASARGS,
                stmt_id: b"s1".to_vec(),
                body: vec![],
            },
            TokenDescriptor::ParamsFormatEcho(Bytes::from_static(b"\xEC\x00")),
            TokenDescriptor::Params(vec![Value::Int(7), Value::Text("x".into())]),
        ]);
        assert!(bytes.len() > 4);
    }
}
