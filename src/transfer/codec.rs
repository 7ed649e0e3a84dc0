//! Transfer unit codec.
//!
//! Every unit exchanged on either characteristic uses this layout:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────┬─────────────────┐
//! │ total    │ whole_cs │ index    │ chunk_cs │ len      │ payload[len]    │
//! │ LE u16   │ LE u16   │ LE u16   │ LE u16   │ LE u16   │ len ≤ 502       │
//! └──────────┴──────────┴──────────┴──────────┴──────────┴─────────────────┘
//! ```
//!
//! Only `HEADER_SIZE + len` bytes go on the air. The receiving side of the
//! config service is handed a full 512-byte buffer by some peers, so the
//! decoder clamps `len` to what is actually present rather than trusting it.
//!
//! Checksums are carried for wire compatibility only. Peers put a constant
//! in both fields and nobody verifies them.

use crate::error::CodecError;

/// Fixed header: five little-endian `u16` fields.
pub const HEADER_SIZE: usize = 10;

/// Largest payload a single unit can carry.
pub const MAX_PAYLOAD: usize = 502;

/// Header plus full payload.
pub const PACKET_CAPACITY: usize = HEADER_SIZE + MAX_PAYLOAD;

/// Value written to both checksum fields.
pub const PLACEHOLDER_CHECKSUM: u16 = 0xDEAD;

/// One wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPacket {
    pub total_units: u16,
    pub whole_checksum: u16,
    pub chunk_index: u16,
    pub chunk_checksum: u16,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD>,
}

impl TransferPacket {
    /// Build unit `index` of `total` carrying `chunk`.
    pub fn chunk(total: u16, index: u16, chunk: &[u8]) -> Result<Self, CodecError> {
        let payload = heapless::Vec::from_slice(chunk)
            .map_err(|()| CodecError::PayloadTooLarge { len: chunk.len() })?;
        Ok(Self {
            total_units: total,
            whole_checksum: PLACEHOLDER_CHECKSUM,
            chunk_index: index,
            chunk_checksum: PLACEHOLDER_CHECKSUM,
            payload,
        })
    }

    /// Bytes this unit occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialise into `out`. Returns the number of bytes written.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        let needed = self.encoded_len();
        if out.len() < needed {
            return Err(CodecError::BufferTooSmall { needed });
        }
        let fields = [
            self.total_units,
            self.whole_checksum,
            self.chunk_index,
            self.chunk_checksum,
            self.payload.len() as u16,
        ];
        for (slot, value) in out.chunks_exact_mut(2).zip(fields) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        out[HEADER_SIZE..needed].copy_from_slice(&self.payload);
        Ok(needed)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.encoded_len()];
        // Sized exactly above.
        let _ = self.encode(&mut out);
        out
    }

    /// Parse one unit.
    ///
    /// Rejects anything shorter than the header. A declared length larger
    /// than the remaining bytes (or than [`MAX_PAYLOAD`]) is clamped.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::Truncated { len: buf.len() });
        }
        let field = |i: usize| u16::from_le_bytes([buf[i * 2], buf[i * 2 + 1]]);
        let declared = field(4) as usize;
        let len = declared.min(buf.len() - HEADER_SIZE).min(MAX_PAYLOAD);
        let payload = heapless::Vec::from_slice(&buf[HEADER_SIZE..HEADER_SIZE + len])
            .map_err(|()| CodecError::PayloadTooLarge { len })?;
        Ok(Self {
            total_units: field(0),
            whole_checksum: field(1),
            chunk_index: field(2),
            chunk_checksum: field(3),
            payload,
        })
    }
}

/// Whether `buf` is plausibly a transfer unit rather than a raw command.
///
/// True when the buffer holds a full header, a non-zero total, an index
/// inside that total, and exactly the declared number of payload bytes.
/// A full-capacity buffer also counts since some peers always send 512.
pub fn looks_like_packet(buf: &[u8]) -> bool {
    if buf.len() < HEADER_SIZE {
        return false;
    }
    let field = |i: usize| u16::from_le_bytes([buf[i * 2], buf[i * 2 + 1]]);
    let total = field(0);
    let index = field(2);
    let len = field(4) as usize;
    if total == 0 || index >= total || len > MAX_PAYLOAD {
        return false;
    }
    buf.len() == HEADER_SIZE + len || buf.len() == PACKET_CAPACITY
}

// ── Tests ────────────────────────────────────────────────────
