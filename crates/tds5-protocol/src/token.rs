//! TDS 5.0 token stream definitions.
//!
//! Tokens are the fundamental units of a TDS reply. The server sends a
//! stream of tokens describing connection-level side effects (login
//! acknowledgement, capability negotiation, environment changes), result
//! data (row formats, rows, procedure parameters), and boundaries (`done`).
//!
//! Row and parameter value decoding needs the most recently seen
//! `rowformat`/`paramsformat` token to know how many columns to expect and
//! what type each one is; [`DecodeContext`] carries that across calls to
//! [`decode_token`], playing the role of the `token_accumulator` argument.

use bitflags::bitflags;
use bytes::{Buf, Bytes};

use crate::codec::{read_b_varchar, read_us_varchar};
use crate::error::ProtocolError;
use crate::types::{TypeId, Value};
use crate::version::TdsVersion;

/// Raw token type identifier byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Row format / column metadata (TDS_ROWFMT).
    RowFormat = 0x61,
    /// Parameter format (TDS_PARAMFMT).
    ParamsFormat = 0xEC,
    /// Row data (TDS_ROW).
    Row = 0xD1,
    /// Parameter values (TDS_PARAMS).
    Params = 0xD7,
    /// Return status from a stored procedure (TDS_RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Column ordering (TDS_ORDER).
    OrderBy = 0xA9,
    /// Extended error/info message (TDS_EED).
    Message = 0xE5,
    /// Login acknowledgment (TDS_LOGINACK).
    LoginAck = 0xAD,
    /// Capability negotiation (TDS_CAPABILITY).
    Capability = 0xE2,
    /// Environment change (TDS_ENVCHANGE).
    EnvChange = 0xE3,
    /// Dynamic (prepare/execute) acknowledgment (TDS_DYNAMIC).
    Dynamic = 0xE7,
    /// Statement completion (TDS_DONE).
    Done = 0xFD,
    /// Stored procedure completion (TDS_DONEPROC).
    DoneProc = 0xFE,
    /// Completion within a stored procedure (TDS_DONEINPROC).
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Resolve a raw byte to a known token type.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x61 => Some(Self::RowFormat),
            0xEC => Some(Self::ParamsFormat),
            0xD1 => Some(Self::Row),
            0xD7 => Some(Self::Params),
            0x79 => Some(Self::ReturnStatus),
            0xA9 => Some(Self::OrderBy),
            0xE5 => Some(Self::Message),
            0xAD => Some(Self::LoginAck),
            0xE2 => Some(Self::Capability),
            0xE3 => Some(Self::EnvChange),
            0xE7 => Some(Self::Dynamic),
            0xFD => Some(Self::Done),
            0xFE => Some(Self::DoneProc),
            0xFF => Some(Self::DoneInProc),
            _ => None,
        }
    }
}

bitflags! {
    /// `done` status flags, per §3 of the core specification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DoneStatus: u16 {
        /// More result segments follow this one.
        const MORE = 0x0001;
        /// `count` carries a valid affected-row count.
        const COUNT = 0x0002;
        /// This segment concludes a stored procedure call.
        const PROC = 0x0004;
        /// Server-side event notification.
        const EVENT = 0x0008;
        /// Attention acknowledgment.
        const ATTN = 0x0010;
        /// A transaction is in progress.
        const TRANS = 0x0020;
        /// The segment terminated with an error.
        const ERROR = 0x0040;
    }
}

/// Statement/procedure completion token.
#[derive(Debug, Clone, Copy)]
pub struct Done {
    /// Status flags describing how this segment concluded.
    pub status: DoneStatus,
    /// Transaction state at completion, opaque to this core.
    pub txn_state: u16,
    /// Affected-row count (meaningful only when `status` contains `COUNT`).
    pub count: u64,
}

impl Done {
    const SIZE: usize = 12;

    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: Self::SIZE,
                actual: src.remaining(),
            });
        }
        let status = DoneStatus::from_bits_truncate(src.get_u16_le());
        let txn_state = src.get_u16_le();
        let count = src.get_u64_le();
        Ok(Self { status, txn_state, count })
    }
}

/// Sub-state carried by a `loginack` reply, per the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginSubState {
    /// Login succeeded; the connection is ready for requests.
    Connected,
    /// Server demands a further authentication exchange this core doesn't drive.
    AuthNegotiate,
}

/// Server identity reported in a `loginack`.
#[derive(Debug, Clone, Default)]
pub struct ServerIdentity {
    /// Server product name.
    pub name: String,
    /// Server product version, as four raw bytes.
    pub version: [u8; 4],
}

/// Login acknowledgment token.
#[derive(Debug, Clone)]
pub struct LoginAck {
    /// Whether the server considers login complete or wants more negotiation.
    pub sub_state: LoginSubState,
    /// Negotiated TDS version.
    pub tds_version: TdsVersion,
    /// Server name/version.
    pub server: ServerIdentity,
}

impl LoginAck {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 1 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let sub_state = match src.get_u8() {
            0 => LoginSubState::Connected,
            _ => LoginSubState::AuthNegotiate,
        };
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let tds_version = TdsVersion::new(src.get_u32_le());
        let name = read_b_varchar(src).ok_or(ProtocolError::InvalidCharacterData("loginack.name"))?;
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let mut version = [0u8; 4];
        src.copy_to_slice(&mut version);
        Ok(Self {
            sub_state,
            tds_version,
            server: ServerIdentity { name, version },
        })
    }
}

/// A single capability bitmask, as requested or as acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityMask(pub u64);

/// Capability negotiation token: what the client requested, and what the
/// server actually granted.
#[derive(Debug, Clone, Copy)]
pub struct Capability {
    /// Capabilities the client requested at login.
    pub requested: CapabilityMask,
    /// Capabilities the server responded with.
    pub responded: CapabilityMask,
}

impl Capability {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 16 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let requested = CapabilityMask(src.get_u64_le());
        let responded = CapabilityMask(src.get_u64_le());
        Ok(Self { requested, responded })
    }
}

/// One `(key, new, old)` entry of an `envchange` token.
#[derive(Debug, Clone)]
pub struct EnvChangeEntry {
    /// Well-known environment key, e.g. `"packet_size"`, `"database"`.
    pub key: String,
    /// New value as sent by the server.
    pub new_value: String,
    /// Previous value as sent by the server (may be empty).
    pub old_value: String,
}

/// Environment change token: the server pushing an update to one or more
/// session parameters.
#[derive(Debug, Clone, Default)]
pub struct EnvChange {
    /// The `(key, new, old)` entries carried by this token.
    pub entries: Vec<EnvChangeEntry>,
}

fn env_key_name(raw: u8) -> String {
    match raw {
        1 => "database".to_string(),
        2 => "language".to_string(),
        3 => "character_set".to_string(),
        4 => "packet_size".to_string(),
        other => format!("env_{other}"),
    }
}

impl EnvChange {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 1 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let raw_type = src.get_u8();
        let key = env_key_name(raw_type);
        let new_value = read_b_varchar(src).unwrap_or_default();
        let old_value = read_b_varchar(src).unwrap_or_default();
        Ok(Self {
            entries: vec![EnvChangeEntry { key, new_value, old_value }],
        })
    }
}

/// A single column's name and wire type, shared by `rowformat` and
/// `paramsformat` tokens.
#[derive(Debug, Clone)]
pub struct ColumnFormat {
    /// Display label assigned by the query (e.g. a column alias).
    pub label_name: String,
    /// Underlying column name, used when `label_name` is empty.
    pub column_name: String,
    /// Wire type of this column.
    pub type_id: TypeId,
}

impl ColumnFormat {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let label_name = read_b_varchar(src).unwrap_or_default();
        let column_name = read_b_varchar(src).unwrap_or_default();
        if src.remaining() < 1 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let type_byte = src.get_u8();
        let type_id = TypeId::from_u8(type_byte).ok_or(ProtocolError::InvalidTokenType(type_byte))?;
        Ok(Self { label_name, column_name, type_id })
    }

    /// The field name a result set should expose for this column: the
    /// label if the query gave one, otherwise the underlying column name.
    #[must_use]
    pub fn field_name(&self) -> &str {
        if self.label_name.is_empty() {
            &self.column_name
        } else {
            &self.label_name
        }
    }
}

/// `rowformat` token: describes the columns of the rows that follow.
#[derive(Debug, Clone, Default)]
pub struct RowFormat {
    /// Column descriptors, in wire order.
    pub columns: Vec<ColumnFormat>,
}

impl RowFormat {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let count = src.get_u16_le() as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(ColumnFormat::decode(src)?);
        }
        Ok(Self { columns })
    }

    fn decode_row(&self, src: &mut impl Buf) -> Result<Vec<Value>, ProtocolError> {
        self.columns.iter().map(|col| decode_value(src, col.type_id)).collect()
    }
}

/// `paramsformat` token: the parameter descriptor returned at `prepare` time
/// and replayed verbatim at `execute` time.
#[derive(Debug, Clone, Default)]
pub struct ParamsFormat {
    /// Parameter descriptors, in positional order.
    pub params: Vec<ColumnFormat>,
}

impl ParamsFormat {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let inner = RowFormat::decode(src)?;
        Ok(Self { params: inner.columns })
    }
}

fn decode_value(src: &mut impl Buf, type_id: TypeId) -> Result<Value, ProtocolError> {
    if type_id.is_fixed_length() {
        return decode_fixed_value(src, type_id);
    }
    if src.remaining() < 1 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let len = src.get_u8() as usize;
    if len == 0 {
        return Ok(Value::Null);
    }
    if src.remaining() < len {
        return Err(ProtocolError::IncompletePacket { expected: len, actual: src.remaining() });
    }
    match type_id {
        TypeId::VarChar | TypeId::Text => {
            let mut bytes = vec![0u8; len];
            src.copy_to_slice(&mut bytes);
            let text = String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidCharacterData("varchar"))?;
            Ok(Value::Text(text))
        }
        _ => {
            let mut bytes = vec![0u8; len];
            src.copy_to_slice(&mut bytes);
            Ok(Value::Binary(bytes))
        }
    }
}

fn decode_fixed_value(src: &mut impl Buf, type_id: TypeId) -> Result<Value, ProtocolError> {
    match type_id {
        TypeId::Null => Ok(Value::Null),
        TypeId::Int1 => {
            require(src, 1)?;
            Ok(Value::Int(src.get_u8() as i64))
        }
        TypeId::Bit => {
            require(src, 1)?;
            Ok(Value::Bool(src.get_u8() != 0))
        }
        TypeId::Int2 => {
            require(src, 2)?;
            Ok(Value::Int(src.get_i16_le() as i64))
        }
        TypeId::Int4 => {
            require(src, 4)?;
            Ok(Value::Int(src.get_i32_le() as i64))
        }
        TypeId::Int8 => {
            require(src, 8)?;
            Ok(Value::Int(src.get_i64_le()))
        }
        TypeId::Float4 => {
            require(src, 4)?;
            Ok(Value::Float(src.get_f32_le() as f64))
        }
        TypeId::Float8 => {
            require(src, 8)?;
            Ok(Value::Float(src.get_f64_le()))
        }
        TypeId::DateTime => {
            require(src, 8)?;
            let mut bytes = [0u8; 8];
            src.copy_to_slice(&mut bytes);
            Ok(Value::Binary(bytes.to_vec()))
        }
        _ => unreachable!("decode_fixed_value called with variable-length type"),
    }
}

fn require(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        Err(ProtocolError::IncompletePacket { expected: n, actual: src.remaining() })
    } else {
        Ok(())
    }
}

/// Procedure return status, message text, or error/info from the server.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message number.
    pub number: i32,
    /// Severity class; per design notes, only class > 10 is truly an error.
    pub class: u8,
    /// Message state.
    pub state: u8,
    /// Human-readable message text.
    pub text: String,
    /// Originating server name.
    pub server: String,
    /// Originating stored procedure, if any.
    pub procedure: String,
    /// Line number within the batch/procedure.
    pub line: i32,
}

impl Message {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let number = src.get_i32_le();
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let state = src.get_u8();
        let class = src.get_u8();
        let text = read_us_varchar(src).ok_or(ProtocolError::InvalidCharacterData("message.text"))?;
        let server = read_b_varchar(src).unwrap_or_default();
        let procedure = read_b_varchar(src).unwrap_or_default();
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let line = src.get_i32_le();
        Ok(Self { number, class, state, text, server, procedure, line })
    }
}

/// `dynamic(ack, status, id)`: acknowledgment of a `prepare`/`execute`
/// request naming the statement identifier it applies to.
#[derive(Debug, Clone)]
pub struct DynamicAck {
    /// Server-reported status byte (0 = success).
    pub status: u8,
    /// Statement identifier this ack applies to.
    pub id: Vec<u8>,
}

impl DynamicAck {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let _op = src.get_u8();
        let status = src.get_u8();
        if src.remaining() < 1 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let id_len = src.get_u8() as usize;
        if src.remaining() < id_len {
            return Err(ProtocolError::IncompletePacket { expected: id_len, actual: src.remaining() });
        }
        let mut id = vec![0u8; id_len];
        src.copy_to_slice(&mut id);
        Ok(Self { status, id })
    }
}

/// Column ordering metadata, carried as `meta` on a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBy {
    /// Ordered column indices (1-based, as sent on the wire).
    pub columns: Vec<u16>,
}

impl OrderBy {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let byte_len = src.get_u16_le() as usize;
        let count = byte_len / 2;
        if src.remaining() < byte_len {
            return Err(ProtocolError::IncompletePacket { expected: byte_len, actual: src.remaining() });
        }
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(src.get_u16_le());
        }
        Ok(Self { columns })
    }
}

/// An unrecognized token, preserved verbatim.
///
/// The core never needs to interpret these; it buffers them in arrival
/// order along with everything else until the next `done`.
#[derive(Debug, Clone)]
pub struct Generic {
    /// Raw token type byte.
    pub type_byte: u8,
    /// Raw token payload (length-prefix, if any, already stripped).
    pub payload: Bytes,
}

/// A single decoded TDS 5.0 token.
#[derive(Debug, Clone)]
pub enum Token {
    /// Login acknowledgment (side-effect).
    LoginAck(LoginAck),
    /// Capability negotiation result (side-effect).
    Capability(Capability),
    /// Environment change (side-effect).
    EnvChange(EnvChange),
    /// Row format describing the columns of subsequent `row` tokens.
    RowFormat(RowFormat),
    /// One row of data.
    Row(Vec<Value>),
    /// Parameter values, e.g. stored-procedure OUTPUT parameters.
    Params(Vec<Value>),
    /// Parameter format for a prepared statement.
    ParamsFormat(ParamsFormat),
    /// Stored procedure return status.
    ReturnStatus(i32),
    /// Column ordering metadata.
    OrderBy(OrderBy),
    /// Informational or error message from the server.
    Message(Message),
    /// Dynamic (prepare/execute) acknowledgment.
    Dynamic(DynamicAck),
    /// Segment boundary.
    Done(Done),
    /// Unrecognized token, kept verbatim.
    Generic(Generic),
}

/// Mutable context threaded through successive [`decode_token`] calls.
///
/// Row and parameter values are positional: decoding a `row` token requires
/// knowing the column count and types from the most recent `rowformat`.
#[derive(Debug, Clone, Default)]
pub struct DecodeContext {
    /// Most recently seen `rowformat`, used to decode subsequent `row` tokens.
    pub current_row_format: Option<RowFormat>,
}

/// Decode one token from the front of `buf`.
///
/// Returns `Ok(None)` once `buf` is fully consumed (a clean end of stream,
/// not an error). `ctx` is updated in place so the next call can decode a
/// `row` token that depends on a preceding `rowformat`.
pub fn decode_token(
    buf: &[u8],
    ctx: &mut DecodeContext,
) -> Result<Option<(Token, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = buf;
    let type_byte = cursor.get_u8();
    let token_type = TokenType::from_u8(type_byte);

    let token = match token_type {
        Some(TokenType::Done) | Some(TokenType::DoneProc) | Some(TokenType::DoneInProc) => {
            Token::Done(Done::decode(&mut cursor)?)
        }
        Some(TokenType::LoginAck) => Token::LoginAck(LoginAck::decode(&mut cursor)?),
        Some(TokenType::Capability) => Token::Capability(Capability::decode(&mut cursor)?),
        Some(TokenType::EnvChange) => Token::EnvChange(EnvChange::decode(&mut cursor)?),
        Some(TokenType::RowFormat) => {
            let format = RowFormat::decode(&mut cursor)?;
            ctx.current_row_format = Some(format.clone());
            Token::RowFormat(format)
        }
        Some(TokenType::ParamsFormat) => Token::ParamsFormat(ParamsFormat::decode(&mut cursor)?),
        Some(TokenType::Row) => {
            let format = ctx
                .current_row_format
                .as_ref()
                .ok_or(ProtocolError::InvalidTokenType(type_byte))?;
            Token::Row(format.decode_row(&mut cursor)?)
        }
        Some(TokenType::Params) => {
            if cursor.remaining() < 2 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let count = cursor.get_u16_le() as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                if cursor.remaining() < 1 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let type_byte = cursor.get_u8();
                let type_id = TypeId::from_u8(type_byte).ok_or(ProtocolError::InvalidTokenType(type_byte))?;
                values.push(decode_value(&mut cursor, type_id)?);
            }
            Token::Params(values)
        }
        Some(TokenType::ReturnStatus) => {
            if cursor.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }
            Token::ReturnStatus(cursor.get_i32_le())
        }
        Some(TokenType::OrderBy) => Token::OrderBy(OrderBy::decode(&mut cursor)?),
        Some(TokenType::Message) => Token::Message(Message::decode(&mut cursor)?),
        Some(TokenType::Dynamic) => Token::Dynamic(DynamicAck::decode(&mut cursor)?),
        None => {
            // Unknown tokens are 2-byte length-prefixed by TDS 5.0 convention,
            // so they can always be skipped without understanding them.
            if cursor.remaining() < 2 {
                return Err(ProtocolError::InvalidTokenType(type_byte));
            }
            let len = cursor.get_u16_le() as usize;
            if cursor.remaining() < len {
                return Err(ProtocolError::IncompletePacket { expected: len, actual: cursor.remaining() });
            }
            let payload = Bytes::copy_from_slice(&cursor[..len]);
            cursor.advance(len);
            Token::Generic(Generic { type_byte, payload })
        }
    };

    let consumed = buf.len() - cursor.remaining();
    Ok(Some((token, consumed)))
}
