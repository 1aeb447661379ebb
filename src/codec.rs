//! HTTP/2 frame codec.
//!
//! [`FrameDecoder`] is an incremental deframer: it accepts the inbound
//! byte-stream in fragments of any size (a fragment may split a frame
//! header or payload at any byte) and hands out complete frames.
//! [`FrameEncoder`] serializes frames into an output buffer.
//!
//! Reference: RFC 7540 Section 4.1

use tracing::trace;

use crate::error::ErrorCode;
use crate::frame::{frame_type, Frame, H2FrameHeader, FRAME_HEADER_SIZE};
use crate::settings::DEFAULT_MAX_FRAME_SIZE;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Maximum header block size (256KB) to prevent memory exhaustion from
/// unbounded HEADERS + CONTINUATION sequences.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.starts_with(CONNECTION_PREFACE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Header,
    Payload,
    /// Discarding the payload of an oversized DATA frame.
    Skip,
    Failed(ErrorCode),
}

/// What [`FrameDecoder::feed`] hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deframed<'a> {
    Frame(&'a Frame),
    /// A DATA frame longer than the max frame size. Only its header is
    /// reported; the payload is skipped without being buffered.
    OversizedData(H2FrameHeader),
}

/// Incremental frame deframer.
///
/// The decoder owns one reusable [`Frame`] whose payload buffer is cleared
/// and refilled for every frame, so steady-state decoding does not
/// allocate per frame.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    header: [u8; FRAME_HEADER_SIZE],
    header_len: usize,
    payload_len: usize,
    frame: Frame,
    max_frame_size: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            header: [0; FRAME_HEADER_SIZE],
            header_len: 0,
            payload_len: 0,
            frame: Frame::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Largest payload accepted before a frame is rejected with
    /// FRAME_SIZE_ERROR. This is the value we advertise in SETTINGS.
    pub fn set_max_frame_size(&mut self, n: u32) {
        self.max_frame_size = n;
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// The error that stopped decoding, if any.
    pub fn error(&self) -> Option<ErrorCode> {
        match self.state {
            DecodeState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Forget any partial frame and clear a previous error.
    pub fn reset(&mut self) {
        self.state = DecodeState::Header;
        self.header_len = 0;
        self.payload_len = 0;
        self.frame.payload.clear();
    }

    /// Consume a fragment of the inbound byte-stream, calling `on_frame`
    /// for each complete frame in order.
    ///
    /// A structurally invalid frame (an oversized DATA frame included), or
    /// an error returned by `on_frame`, stops decoding: the error is
    /// returned now and on every later call until [`reset`](Self::reset).
    pub fn deframe<F>(&mut self, data: &[u8], mut on_frame: F) -> Result<(), ErrorCode>
    where
        F: FnMut(&Frame) -> Result<(), ErrorCode>,
    {
        self.feed(data, |deframed| match deframed {
            Deframed::Frame(frame) => on_frame(frame),
            Deframed::OversizedData(_) => Err(ErrorCode::FrameSizeError),
        })
    }

    /// Like [`deframe`](Self::deframe), but an oversized DATA frame is
    /// reported to `on_event` and skipped rather than failing the decoder,
    /// so the caller can treat it as a stream error. Oversized frames of
    /// any other type still fail with FRAME_SIZE_ERROR.
    pub fn feed<F>(&mut self, mut data: &[u8], mut on_event: F) -> Result<(), ErrorCode>
    where
        F: FnMut(Deframed<'_>) -> Result<(), ErrorCode>,
    {
        while !data.is_empty() {
            match self.state {
                DecodeState::Failed(err) => return Err(err),
                DecodeState::Header => {
                    let n = (FRAME_HEADER_SIZE - self.header_len).min(data.len());
                    self.header[self.header_len..self.header_len + n].copy_from_slice(&data[..n]);
                    self.header_len += n;
                    data = &data[n..];
                    if self.header_len < FRAME_HEADER_SIZE {
                        break;
                    }
                    self.header_len = 0;
                    let header = H2FrameHeader::parse(&self.header).ok_or(ErrorCode::InternalError)?;
                    if header.length > self.max_frame_size {
                        trace!(
                            length = header.length,
                            max = self.max_frame_size,
                            frame_type = header.frame_type,
                            "frame exceeds max frame size"
                        );
                        if header.frame_type != frame_type::DATA || header.stream_id == 0 {
                            return self.fail(ErrorCode::FrameSizeError);
                        }
                        if let Err(err) = on_event(Deframed::OversizedData(header)) {
                            return self.fail(err);
                        }
                        self.payload_len = header.length as usize;
                        self.state = DecodeState::Skip;
                        continue;
                    }
                    self.frame.stream_id = header.stream_id;
                    self.frame.frame_type = header.frame_type;
                    self.frame.flags = header.flags;
                    self.frame.payload.clear();
                    self.payload_len = header.length as usize;
                    self.state = DecodeState::Payload;
                }
                DecodeState::Payload => {
                    let n = (self.payload_len - self.frame.payload.len()).min(data.len());
                    self.frame.payload.extend_from_slice(&data[..n]);
                    data = &data[n..];
                }
                DecodeState::Skip => {
                    let n = self.payload_len.min(data.len());
                    self.payload_len -= n;
                    data = &data[n..];
                    if self.payload_len == 0 {
                        self.state = DecodeState::Header;
                    }
                    continue;
                }
            }

            if self.state == DecodeState::Payload && self.frame.payload.len() == self.payload_len {
                self.state = DecodeState::Header;
                trace!(
                    stream_id = self.frame.stream_id,
                    frame_type = self.frame.frame_type,
                    flags = self.frame.flags,
                    length = self.payload_len,
                    "deframed"
                );
                if let Err(err) = on_event(Deframed::Frame(&self.frame)) {
                    return self.fail(err);
                }
            }
        }

        match self.state {
            DecodeState::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    fn fail(&mut self, err: ErrorCode) -> Result<(), ErrorCode> {
        self.state = DecodeState::Failed(err);
        Err(err)
    }
}

/// Frame serializer. Stateless: every builder appends to a caller-owned
/// output buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameEncoder;

impl FrameEncoder {
    /// Write the 9-byte header followed by the payload.
    pub fn frame(frame: &Frame, out: &mut Vec<u8>) {
        Self::write(out, frame.stream_id, frame.frame_type, frame.flags, &frame.payload);
    }

    /// Write one frame from its parts without building a [`Frame`].
    pub fn write(out: &mut Vec<u8>, stream_id: u32, frame_type: u8, flags: u8, payload: &[u8]) {
        Self::header(out, stream_id, frame_type, flags, payload.len());
        out.extend_from_slice(payload);
    }

    /// Write only a frame header; the caller appends `length` payload bytes.
    pub fn header(out: &mut Vec<u8>, stream_id: u32, frame_type: u8, flags: u8, length: usize) {
        trace!(stream_id, frame_type, flags, length, "framed");
        H2FrameHeader {
            length: length as u32,
            frame_type,
            flags,
            stream_id,
        }
        .write(out);
    }

    /// Create a RST_STREAM frame
    pub fn rst_stream(stream_id: u32, err: ErrorCode, out: &mut Vec<u8>) {
        Self::write(out, stream_id, frame_type::RST_STREAM, 0, &err.as_u32().to_be_bytes());
    }

    /// Create a GOAWAY frame carrying the last processed stream id.
    pub fn goaway(last_stream_id: u32, err: ErrorCode, out: &mut Vec<u8>) {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&last_stream_id.to_be_bytes());
        payload[4..].copy_from_slice(&err.as_u32().to_be_bytes());
        Self::write(out, 0, frame_type::GOAWAY, 0, &payload);
    }
}
