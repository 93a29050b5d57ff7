//! Ferry wire format: the two messages of a transfer and their framing.
//!
//! A transfer stream carries, in order: any number of CHUNK frames, one
//! END frame (the sender is done writing), then exactly one ACK frame in
//! the other direction. Every frame is
//!
//! ```text
//! [kind: u8][body length: u32 BE][body]
//! ```
//!
//! Chunk and acknowledgment bodies open with a fixed-size header whose
//! integers are little-endian, followed by the variable-length fields.
//! Header layouts are checked at compile time; changing a field here is a
//! breaking protocol change.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::checksum::Digest;

/// Wire format version carried in every header.
pub const WIRE_VERSION: u8 = 0x01;

/// Largest payload a single chunk may carry.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Longest transfer name, in bytes.
pub const MAX_NAME_LEN: usize = 4096;

/// Longest error text in an acknowledgment. Longer text is truncated.
pub const MAX_ERROR_LEN: usize = 64 * 1024;

/// Size of the `[kind][length]` frame prefix.
pub const FRAME_PREFIX_LEN: usize = 5;

/// Largest frame body accepted by a reader.
pub const MAX_FRAME_LEN: usize = CHUNK_HEADER_LEN + MAX_NAME_LEN + MAX_CHUNK_SIZE;

pub const CHUNK_HEADER_LEN: usize = 100;
pub const ACK_HEADER_LEN: usize = 56;

const FLAG_LAST_CHUNK: u8 = 0x01;
const FLAG_BROADCAST_SET: u8 = 0x02;
const FLAG_RESERVED: u8 = !(FLAG_LAST_CHUNK | FLAG_BROADCAST_SET);

// ── Frame prefix ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Sender → receiver, one per chunk.
    Chunk = 0x01,
    /// Sender → receiver, empty body: no more chunks follow.
    End = 0x02,
    /// Receiver → sender, exactly one per transfer.
    Ack = 0x03,
}

impl FrameKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Chunk),
            0x02 => Some(Self::End),
            0x03 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// Encode the prefix for a frame of `kind` with a body of `body_len` bytes.
pub fn frame_prefix(kind: FrameKind, body_len: usize) -> Result<[u8; FRAME_PREFIX_LEN], WireError> {
    if body_len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(body_len));
    }
    let mut prefix = [0u8; FRAME_PREFIX_LEN];
    prefix[0] = kind as u8;
    prefix[1..].copy_from_slice(&(body_len as u32).to_be_bytes());
    Ok(prefix)
}

/// Decode a frame prefix, rejecting unknown kinds and oversize bodies
/// before any body bytes are read.
pub fn parse_frame_prefix(prefix: &[u8; FRAME_PREFIX_LEN]) -> Result<(FrameKind, usize), WireError> {
    let kind = FrameKind::from_u8(prefix[0]).ok_or(WireError::UnknownKind(prefix[0]))?;
    let len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    Ok((kind, len))
}

// ── Chunk ─────────────────────────────────────────────────────────────────────

/// Fixed part of a CHUNK body. Followed by `name_len` bytes of UTF-8 name,
/// then the payload (everything up to the end of the frame).
///
/// Wire size: 100 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ChunkHeader {
    pub version: u8,
    /// bit 0: last chunk, bit 1: broadcast set, bits 2-7 reserved (zero).
    pub flags: u8,
    pub name_len: U16<LittleEndian>,
    pub chunk_number: U64<LittleEndian>,
    /// Declared payload length. The receiver checks it against the payload.
    pub size_in_bytes: U64<LittleEndian>,
    pub send_time_nanos: U64<LittleEndian>,
    pub transfer_start_time_nanos: U64<LittleEndian>,
    /// BLAKE3 of this chunk's payload alone.
    pub chunk_checksum: [u8; 32],
    /// BLAKE3 running state after absorbing this chunk's payload.
    pub cumulative_checksum: [u8; 32],
}

assert_eq_size!(ChunkHeader, [u8; CHUNK_HEADER_LEN]);

/// One bounded piece of a transfer, with its integrity metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Transfer identity. Constant across all chunks of one stream.
    pub filepath: String,
    /// Sequential from 0 within a transfer.
    pub chunk_number: u64,
    /// Declared payload length.
    pub size_in_bytes: u64,
    pub payload: Bytes,
    pub chunk_checksum: Digest,
    pub cumulative_checksum: Digest,
    pub is_last_chunk: bool,
    /// Opaque routing hint, carried through untouched.
    pub is_broadcast_set: bool,
    pub send_time_nanos: u64,
    pub transfer_start_time_nanos: u64,
}

impl Chunk {
    /// Serialize into a CHUNK frame body.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let name = self.filepath.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(WireError::NameTooLong(name.len()));
        }
        if self.payload.len() > MAX_CHUNK_SIZE {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }

        let mut flags = 0;
        if self.is_last_chunk {
            flags |= FLAG_LAST_CHUNK;
        }
        if self.is_broadcast_set {
            flags |= FLAG_BROADCAST_SET;
        }

        let header = ChunkHeader {
            version: WIRE_VERSION,
            flags,
            name_len: U16::new(name.len() as u16),
            chunk_number: U64::new(self.chunk_number),
            size_in_bytes: U64::new(self.size_in_bytes),
            send_time_nanos: U64::new(self.send_time_nanos),
            transfer_start_time_nanos: U64::new(self.transfer_start_time_nanos),
            chunk_checksum: self.chunk_checksum,
            cumulative_checksum: self.cumulative_checksum,
        };

        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_LEN + name.len() + self.payload.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(name);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse a CHUNK frame body. The payload shares `body`'s allocation.
    pub fn decode(body: Bytes) -> Result<Self, WireError> {
        let header =
            ChunkHeader::read_from_prefix(&body[..]).ok_or(WireError::TooShort(body.len()))?;
        if header.version != WIRE_VERSION {
            return Err(WireError::Version(header.version));
        }
        if header.flags & FLAG_RESERVED != 0 {
            return Err(WireError::ReservedFlags(header.flags));
        }

        let name_len = header.name_len.get() as usize;
        if name_len > MAX_NAME_LEN {
            return Err(WireError::NameTooLong(name_len));
        }
        let name_end = CHUNK_HEADER_LEN + name_len;
        if body.len() < name_end {
            return Err(WireError::TooShort(body.len()));
        }
        let filepath = std::str::from_utf8(&body[CHUNK_HEADER_LEN..name_end])
            .map_err(|_| WireError::BadName)?
            .to_owned();

        Ok(Self {
            filepath,
            chunk_number: header.chunk_number.get(),
            size_in_bytes: header.size_in_bytes.get(),
            payload: body.slice(name_end..),
            chunk_checksum: header.chunk_checksum,
            cumulative_checksum: header.cumulative_checksum,
            is_last_chunk: header.flags & FLAG_LAST_CHUNK != 0,
            is_broadcast_set: header.flags & FLAG_BROADCAST_SET != 0,
            send_time_nanos: header.send_time_nanos.get(),
            transfer_start_time_nanos: header.transfer_start_time_nanos.get(),
        })
    }
}

// ── Acknowledgment ────────────────────────────────────────────────────────────

/// Fixed part of an ACK body. Followed by the UTF-8 name (`name_len`
/// bytes) and the UTF-8 error text (`error_len` bytes).
///
/// Wire size: 56 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct AckHeader {
    pub version: u8,
    pub reserved: u8,
    pub name_len: U16<LittleEndian>,
    pub error_len: U32<LittleEndian>,
    pub size_in_bytes: U64<LittleEndian>,
    pub receive_time_nanos: U64<LittleEndian>,
    pub whole_file_checksum: [u8; 32],
}

assert_eq_size!(AckHeader, [u8; ACK_HEADER_LEN]);

/// The receiver's single verdict on a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    pub filepath: String,
    /// Total payload bytes that passed verification.
    pub size_in_bytes: u64,
    pub receive_time_nanos: u64,
    /// Receiver's running hash over every verified payload, in arrival order.
    pub whole_file_checksum: Digest,
    /// Empty on success.
    pub error_message: String,
}

impl Acknowledgment {
    pub fn is_success(&self) -> bool {
        self.error_message.is_empty()
    }

    /// Serialize into an ACK frame body. Error text beyond
    /// `MAX_ERROR_LEN` is cut at a character boundary.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let name = self.filepath.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(WireError::NameTooLong(name.len()));
        }
        let error = truncate_utf8(&self.error_message, MAX_ERROR_LEN).as_bytes();

        let header = AckHeader {
            version: WIRE_VERSION,
            reserved: 0,
            name_len: U16::new(name.len() as u16),
            error_len: U32::new(error.len() as u32),
            size_in_bytes: U64::new(self.size_in_bytes),
            receive_time_nanos: U64::new(self.receive_time_nanos),
            whole_file_checksum: self.whole_file_checksum,
        };

        let mut buf = BytesMut::with_capacity(ACK_HEADER_LEN + name.len() + error.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(name);
        buf.put_slice(error);
        Ok(buf.freeze())
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let header = AckHeader::read_from_prefix(body).ok_or(WireError::TooShort(body.len()))?;
        if header.version != WIRE_VERSION {
            return Err(WireError::Version(header.version));
        }

        let name_len = header.name_len.get() as usize;
        if name_len > MAX_NAME_LEN {
            return Err(WireError::NameTooLong(name_len));
        }
        let name_end = ACK_HEADER_LEN + name_len;
        let error_end = name_end + header.error_len.get() as usize;
        if body.len() != error_end {
            return Err(WireError::TooShort(body.len()));
        }

        let filepath = std::str::from_utf8(&body[ACK_HEADER_LEN..name_end])
            .map_err(|_| WireError::BadName)?
            .to_owned();
        let error_message = std::str::from_utf8(&body[name_end..error_end])
            .map_err(|_| WireError::BadErrorText)?
            .to_owned();

        Ok(Self {
            filepath,
            size_in_bytes: header.size_in_bytes.get(),
            receive_time_nanos: header.receive_time_nanos.get(),
            whole_file_checksum: header.whole_file_checksum,
            error_message,
        })
    }
}

fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Nanoseconds since the Unix epoch, for the latency timestamps.
pub fn unix_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame body too short or inconsistent: {0} bytes")]
    TooShort(usize),
    #[error("unsupported wire version {0:#04x}")]
    Version(u8),
    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),
    #[error("frame body of {0} bytes exceeds limit of {}", MAX_FRAME_LEN)]
    FrameTooLarge(usize),
    #[error("chunk payload of {0} bytes exceeds limit of {}", MAX_CHUNK_SIZE)]
    PayloadTooLarge(usize),
    #[error("name of {0} bytes exceeds limit of {}", MAX_NAME_LEN)]
    NameTooLong(usize),
    #[error("reserved chunk flag bits set: {0:#04x}")]
    ReservedFlags(u8),
    #[error("transfer name is not valid UTF-8")]
    BadName,
    #[error("acknowledgment error text is not valid UTF-8")]
    BadErrorText,
}
