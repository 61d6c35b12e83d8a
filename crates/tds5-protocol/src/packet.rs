//! TDS packet header definitions and packet-level framing.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Maximum TDS packet size (64KB - 1).
pub const MAX_PACKET_SIZE: usize = 65535;

/// Default TDS packet size, used until a server `envchange(packet_size)` renegotiates it.
pub const DEFAULT_PACKET_SIZE: usize = 512;

/// The kind of logical message a packet run carries.
///
/// This is the `kind` parameter threaded through [`encode_packets`]; it
/// corresponds to the two request shapes this core ever sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Login request.
    Login = 0x02,
    /// Query / language / dynamic request.
    Query = 0x01,
    /// Tabular response (what the server always sends back).
    TabularResult = 0x04,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x02 => Ok(Self::Login),
            0x01 => Ok(Self::Query),
            0x04 => Ok(Self::TabularResult),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// Normal packet, more packets to follow.
        const NORMAL = 0x00;
        /// Last packet of the logical message.
        const LAST = 0x01;
    }
}

/// TDS packet header.
///
/// Every TDS packet begins with an 8-byte header describing the packet
/// type, status, and length of the packet (header included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header.
    pub length: u16,
    /// Server process ID (SPID). Always 0 on client-sent packets.
    pub spid: u16,
    /// Packet sequence number (wraps at 255).
    pub packet_id: u8,
    /// Window (unused, must be 0).
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Parse a packet header from bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status_byte = src.get_u8();
        let status = PacketStatus::from_bits(status_byte)
            .ok_or(ProtocolError::InvalidPacketStatus(status_byte))?;
        let length = src.get_u16();
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        Ok(Self {
            packet_type,
            status,
            length,
            spid,
            packet_id,
            window,
        })
    }

    /// Encode the packet header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Whether this is the last packet of a logical message.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.status.contains(PacketStatus::LAST)
    }
}

/// Outcome of [`decode_packet`].
pub enum DecodedPacket {
    /// A full packet was extracted.
    Packet {
        /// True if this was the last packet of the logical message.
        last: bool,
        /// The packet body (payload only, header stripped).
        body: Bytes,
        /// Bytes consumed from the front of the input buffer.
        consumed: usize,
    },
    /// Not enough bytes were buffered yet to extract a whole packet.
    Incomplete,
}

/// Attempt to extract one packet from the front of `buf`.
///
/// Returns [`DecodedPacket::Incomplete`] (never an error) when `buf` simply
/// doesn't hold a full header + body yet; the caller should read more bytes
/// from the socket and retry. This is the single place packet boundaries are
/// interpreted; everything above it deals only in reassembled payloads.
pub fn decode_packet(buf: &[u8]) -> Result<DecodedPacket, ProtocolError> {
    if buf.len() < PACKET_HEADER_SIZE {
        return Ok(DecodedPacket::Incomplete);
    }

    let mut cursor = buf;
    let header = PacketHeader::decode(&mut cursor)?;
    let total_len = header.length as usize;
    if total_len < PACKET_HEADER_SIZE {
        return Err(ProtocolError::InvalidPacketStatus(header.status.bits()));
    }
    if buf.len() < total_len {
        return Ok(DecodedPacket::Incomplete);
    }

    let body = Bytes::copy_from_slice(&buf[PACKET_HEADER_SIZE..total_len]);
    Ok(DecodedPacket::Packet {
        last: header.is_last(),
        body,
        consumed: total_len,
    })
}

/// Fragment `body` into one or more packets of at most `packet_size` bytes
/// (header included), tagging the final packet with [`PacketStatus::LAST`].
///
/// `packet_size` below [`PACKET_HEADER_SIZE`] + 1 is clamped up so that every
/// call makes progress.
#[must_use]
pub fn encode_packets(body: &[u8], kind: PacketType, packet_size: usize) -> Bytes {
    let packet_size = packet_size.max(PACKET_HEADER_SIZE + 1);
    let chunk_len = packet_size - PACKET_HEADER_SIZE;
    let mut out = BytesMut::with_capacity(body.len() + PACKET_HEADER_SIZE);

    let mut chunks = body.chunks(chunk_len).peekable();
    let mut packet_id: u8 = 1;
    if chunks.peek().is_none() {
        // Empty body still needs one empty, final packet.
        let header = PacketHeader::new(kind, PacketStatus::LAST, PACKET_HEADER_SIZE as u16)
            .with_packet_id(packet_id);
        header.encode(&mut out);
        return out.freeze();
    }
    while let Some(chunk) = chunks.next() {
        let last = chunks.peek().is_none();
        let status = if last { PacketStatus::LAST } else { PacketStatus::NORMAL };
        let length = (PACKET_HEADER_SIZE + chunk.len()) as u16;
        let header = PacketHeader::new(kind, status, length).with_packet_id(packet_id);
        header.encode(&mut out);
        out.put_slice(chunk);
        packet_id = packet_id.wrapping_add(1);
    }
    out.freeze()
}

impl PacketHeader {
    /// Set the packet sequence id, builder-style.
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}
