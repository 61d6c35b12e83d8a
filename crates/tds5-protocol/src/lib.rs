//! # tds5-protocol
//!
//! Pure implementation of the TDS 5.0 wire protocol spoken by Sybase-family
//! database servers: packet framing, the token stream, and the encoding of
//! the handful of logical requests this client ever sends.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic
//! and makes no assumptions about the async runtime; `tds5-client` builds the
//! connection state machine and socket handling on top of it.
//!
//! Byte-exact layout of individual tokens is this crate's business and
//! nobody else's: callers only ever see the typed [`token::Token`] values,
//! never raw bytes, except for the opaque [`token::Generic`] fallback and the
//! verbatim `paramsformat` echo used when replaying a prepared statement's
//! parameter format back to the server.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod encode;
pub mod error;
pub mod packet;
pub mod token;
pub mod types;
pub mod version;

pub use encode::{DynamicFlags, DynamicOp, LoginEnv, TokenDescriptor, encode_query_text, encode_tokens};
pub use error::ProtocolError;
pub use packet::{
    DecodedPacket, PacketHeader, PacketStatus, PacketType, decode_packet, encode_packets,
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE,
};
pub use token::{
    Capability, CapabilityMask, ColumnFormat, Done, DoneStatus, DynamicAck, EnvChange,
    EnvChangeEntry, Generic, LoginAck, LoginSubState, Message, OrderBy, ParamsFormat, RowFormat,
    ServerIdentity, Token, TokenType, decode_token, DecodeContext,
};
pub use types::{TypeId, Value};
pub use version::TdsVersion;
