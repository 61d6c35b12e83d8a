//! Protocol-level error types.

use thiserror::Error;

/// Errors produced while decoding or encoding TDS 5.0 wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not enough bytes were available to decode a complete structure.
    #[error("incomplete data: expected at least {expected} bytes, have {actual}")]
    IncompletePacket {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes actually available.
        actual: usize,
    },

    /// A packet header carried an unrecognized packet type byte.
    #[error("invalid packet type byte: {0:#04x}")]
    InvalidPacketType(u8),

    /// A packet header carried an unrecognized status byte.
    #[error("invalid packet status byte: {0:#04x}")]
    InvalidPacketStatus(u8),

    /// A token stream byte did not match any known token type.
    #[error("invalid token type byte: {0:#04x}")]
    InvalidTokenType(u8),

    /// The buffer ended before a token could be fully decoded.
    #[error("unexpected end of token stream")]
    UnexpectedEof,

    /// A string field contained bytes that are not valid UTF-16LE / UTF-8.
    #[error("invalid character data in {0}")]
    InvalidCharacterData(&'static str),

    /// An `envchange(packet_size, ...)` value could not be parsed as an integer.
    #[error("invalid packet_size value in envchange: {0:?}")]
    InvalidPacketSizeValue(String),
}
