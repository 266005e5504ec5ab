use byteorder::{ByteOrder, LittleEndian};

use crate::{ProtocolError, MAX_FRAME};

/// Bytes in the fixed frame header.
pub const HEADER_SIZE: usize = 12;

/// The leading `{len, type, seq}` of every frame. `len` counts the whole
/// frame, header included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub len: u32,
    pub ty: u32,
    pub seq: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0; HEADER_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.len);
        LittleEndian::write_u32(&mut buf[4..8], self.ty);
        LittleEndian::write_u32(&mut buf[8..12], self.seq);
        buf
    }

    /// Parse and bounds-check a header.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let header = FrameHeader {
            len: LittleEndian::read_u32(&buf[0..4]),
            ty: LittleEndian::read_u32(&buf[4..8]),
            seq: LittleEndian::read_u32(&buf[8..12]),
        };
        if (header.len as usize) < HEADER_SIZE || header.len as usize > MAX_FRAME {
            return Err(ProtocolError::BadLength(header.len));
        }
        Ok(header)
    }

    /// Bytes of payload following the header.
    pub fn body_len(&self) -> usize {
        self.len as usize - HEADER_SIZE
    }
}

/// Build a full frame around an already-encoded payload.
pub fn frame(ty: u32, seq: u32, body: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        len: (HEADER_SIZE + body.len()) as u32,
        ty,
        seq,
    };
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf
}
