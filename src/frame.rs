//! HTTP/2 frames (RFC 7540 Section 4 and 6).
//!
//! A [`Frame`] is the in-memory form of one frame: stream id, type, flags
//! and the raw payload. Payload helpers strip padding and priority
//! prefixes and parse the fixed-shape control payloads.

use crate::error::ErrorCode;

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const ACK: u8 = 0x1;
    pub const END_STREAM: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Mask clearing the reserved high bit of stream ids and increments.
pub const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2FrameHeader {
    pub length: u32, // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl H2FrameHeader {
    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & STREAM_ID_MASK;

        Some(Self {
            length,
            frame_type: data[3],
            flags: data[4],
            stream_id,
        })
    }

    /// Serialize into the 9-byte wire form.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            (self.length >> 16) as u8,
            (self.length >> 8) as u8,
            self.length as u8,
            self.frame_type,
            self.flags,
        ]);
        out.extend_from_slice(&(self.stream_id & STREAM_ID_MASK).to_be_bytes());
    }
}

/// Priority information carried by PRIORITY frames and prioritized HEADERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub dependency: u32,
    pub exclusive: bool,
    pub weight: u8,
}

impl Priority {
    const SIZE: usize = 5;

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        Some(Self {
            dependency: raw & STREAM_ID_MASK,
            exclusive: raw & !STREAM_ID_MASK != 0,
            weight: data[4],
        })
    }
}

/// One HTTP/2 frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(stream_id: u32, frame_type: u8, flags: u8, payload: Vec<u8>) -> Self {
        Self {
            stream_id,
            frame_type,
            flags,
            payload,
        }
    }

    pub fn header(&self) -> H2FrameHeader {
        H2FrameHeader {
            length: self.payload.len() as u32,
            frame_type: self.frame_type,
            flags: self.flags,
            stream_id: self.stream_id,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    /// Check if END_STREAM flag is set
    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    /// Check if END_HEADERS flag is set
    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    pub fn is_padded(&self) -> bool {
        self.flags & flags::PADDED != 0
    }

    pub fn is_priority(&self) -> bool {
        self.flags & flags::PRIORITY != 0
    }

    /// Extract DATA payload, handling PADDED flag.
    pub fn data_payload(&self) -> Result<&[u8], ErrorCode> {
        if !self.is_padded() {
            return Ok(&self.payload);
        }
        let (&pad_length, rest) = self.payload.split_first().ok_or(ErrorCode::ProtocolError)?;
        let pad_length = pad_length as usize;
        if pad_length > rest.len() {
            return Err(ErrorCode::ProtocolError);
        }
        Ok(&rest[..rest.len() - pad_length])
    }

    /// Extract the header block fragment of a HEADERS frame, handling the
    /// PADDED and PRIORITY flags.
    pub fn header_block(&self) -> Result<(&[u8], Option<Priority>), ErrorCode> {
        let mut block: &[u8] = &self.payload;
        let mut pad_length = 0;

        if self.is_padded() {
            let (&n, rest) = block.split_first().ok_or(ErrorCode::ProtocolError)?;
            pad_length = n as usize;
            block = rest;
        }

        let mut priority = None;
        if self.is_priority() {
            let p = Priority::parse(block).ok_or(ErrorCode::ProtocolError)?;
            priority = Some(p);
            block = &block[Priority::SIZE..];
        }

        if pad_length > block.len() {
            return Err(ErrorCode::ProtocolError);
        }
        Ok((&block[..block.len() - pad_length], priority))
    }

    /// Parse a PRIORITY frame payload.
    pub fn decode_priority(&self) -> Result<Priority, ErrorCode> {
        if self.payload.len() != Priority::SIZE {
            return Err(ErrorCode::FrameSizeError);
        }
        Priority::parse(&self.payload).ok_or(ErrorCode::FrameSizeError)
    }

    /// Parse a RST_STREAM frame payload.
    pub fn decode_rst_stream(&self) -> Result<ErrorCode, ErrorCode> {
        match self.payload[..] {
            [a, b, c, d] => Ok(ErrorCode::from_u32(u32::from_be_bytes([a, b, c, d]))),
            _ => Err(ErrorCode::FrameSizeError),
        }
    }

    /// Parse a GOAWAY frame payload into (last stream id, error code).
    /// Trailing debug data is ignored.
    pub fn decode_goaway(&self) -> Result<(u32, ErrorCode), ErrorCode> {
        if self.payload.len() < 8 {
            return Err(ErrorCode::FrameSizeError);
        }
        let p = &self.payload;
        let last_stream_id = u32::from_be_bytes([p[0], p[1], p[2], p[3]]) & STREAM_ID_MASK;
        let code = u32::from_be_bytes([p[4], p[5], p[6], p[7]]);
        Ok((last_stream_id, ErrorCode::from_u32(code)))
    }

    /// Parse a PING frame payload.
    pub fn decode_ping(&self) -> Result<[u8; 8], ErrorCode> {
        self.payload
            .as_slice()
            .try_into()
            .map_err(|_| ErrorCode::FrameSizeError)
    }

    /// Parse a WINDOW_UPDATE payload. An increment of zero is a
    /// PROTOCOL_ERROR; the caller decides its scope from the stream id.
    pub fn decode_window_update(&self) -> Result<u32, ErrorCode> {
        let increment = match self.payload[..] {
            [a, b, c, d] => u32::from_be_bytes([a, b, c, d]) & STREAM_ID_MASK,
            _ => return Err(ErrorCode::FrameSizeError),
        };
        if increment == 0 {
            return Err(ErrorCode::ProtocolError);
        }
        Ok(increment)
    }

    /// Build a WINDOW_UPDATE frame.
    /// stream_id=0 updates connection-level window, otherwise stream-level
    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        let increment = increment & STREAM_ID_MASK;
        Self::new(
            stream_id,
            frame_type::WINDOW_UPDATE,
            0,
            increment.to_be_bytes().to_vec(),
        )
    }

    /// Build a SETTINGS ACK frame.
    pub fn settings_ack() -> Self {
        Self::new(0, frame_type::SETTINGS, flags::ACK, Vec::new())
    }

    /// Build a PING frame, or its acknowledgement.
    pub fn ping(data: [u8; 8], ack: bool) -> Self {
        let flags = if ack { flags::ACK } else { 0 };
        Self::new(0, frame_type::PING, flags, data.to_vec())
    }
}
