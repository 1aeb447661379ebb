//! HTTP/2 stream state machine (RFC 7540 Section 5.1).
//!
//! A [`StreamBase`] tracks one stream's state, its two flow-control
//! windows, the inbound message as it is delivered downstream, and the
//! outbound message waiting to be framed. Everything connection-wide
//! (HPACK state, settings, the connection windows, the output buffer) is
//! reached through the [`Connection`] passed into each call, so the
//! endpoint can own its streams in a plain map.

use std::collections::VecDeque;

use tracing::debug;

use crate::codec::FrameEncoder;
use crate::endpoint::{Connection, H2Event, Role};
use crate::error::{ErrorCode, H2Error};
use crate::flow_control::{RecvWindow, Window};
use crate::frame::{flags, frame_type, Frame};
use crate::hpack::H2Header;
use crate::message::{MessageEvent, MessageHead};

/// HTTP/2 stream states (RFC 7540 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

#[derive(Debug)]
pub struct StreamBase {
    id: u32,
    state: StreamState,
    send_window: Window,
    recv_window: RecvWindow,

    // inbound
    head_received: bool,
    recv_payload_size: u64,
    content_length: Option<u64>,
    skip_length_check: bool,

    // outbound
    head: Option<MessageHead>,
    head_sent: bool,
    send_buffer: VecDeque<u8>,
    end_pending: bool,
    trailers: Option<Vec<H2Header>>,
    end_sent: bool,
}

impl StreamBase {
    pub(crate) fn new(id: u32, send_window: u32, recv_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window: Window::new(send_window),
            recv_window: RecvWindow::new(recv_window),
            head_received: false,
            recv_payload_size: 0,
            content_length: None,
            skip_length_check: false,
            head: None,
            head_sent: false,
            send_buffer: VecDeque::new(),
            end_pending: false,
            trailers: None,
            end_sent: false,
        }
    }

    /// A stream whose request arrived outside HTTP/2 framing (h2c
    /// upgrade): the request is complete and only the response remains.
    pub(crate) fn upgraded(id: u32, send_window: u32, recv_window: u32) -> Self {
        let mut stream = Self::new(id, send_window, recv_window);
        stream.state = StreamState::HalfClosedRemote;
        stream.head_received = true;
        stream
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn send_window(&self) -> Window {
        self.send_window
    }

    pub fn recv_window(&self) -> RecvWindow {
        self.recv_window
    }

    /// Outbound body bytes waiting for flow-control credit.
    pub fn buffered(&self) -> usize {
        self.send_buffer.len()
    }

    pub(crate) fn head_received(&self) -> bool {
        self.head_received
    }

    /// Waiting for its first HEADERS to go out.
    pub(crate) fn is_pending(&self) -> bool {
        self.state == StreamState::Idle
    }

    pub(crate) fn has_head(&self) -> bool {
        self.head.is_some()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// The application has handed over the whole outbound message.
    pub(crate) fn outbound_ended(&self) -> bool {
        self.end_pending
    }

    fn is_receiving(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::HalfClosedLocal)
    }

    fn emit(&self, conn: &mut Connection, event: MessageEvent) {
        conn.events.push(H2Event::Message {
            stream_id: self.id,
            event,
        });
    }

    fn error(&self, code: ErrorCode) -> H2Error {
        H2Error::stream(self.id, code)
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// A complete header block arrived on this stream. `head` is the
    /// decoder's verdict on the block.
    pub(crate) fn on_headers(
        &mut self,
        conn: &mut Connection,
        head: Result<MessageHead, ErrorCode>,
        end_stream: bool,
    ) -> Result<(), H2Error> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
                debug!(stream_id = self.id, state = ?self.state, "stream opened by peer");
            }
            StreamState::Open | StreamState::HalfClosedLocal => {}
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(self.error(ErrorCode::StreamClosed));
            }
            StreamState::ReservedLocal | StreamState::ReservedRemote => {
                return Err(self.error(ErrorCode::ProtocolError));
            }
        }
        let head = head.map_err(|code| self.error(code))?;

        if self.head_received {
            // Trailers end the message.
            if !end_stream {
                return Err(self.error(ErrorCode::ProtocolError));
            }
            return self.recv_end(conn, Some(head.headers));
        }

        if conn.role == Role::Client && head.is_informational() {
            if end_stream {
                return Err(self.error(ErrorCode::ProtocolError));
            }
            debug!(stream_id = self.id, status = ?head.status, "informational response dropped");
            return Ok(());
        }

        self.head_received = true;
        self.content_length = conn.header_decoder.content_length();
        if head.is_connect() || matches!(head.status, Some(204) | Some(304)) {
            self.skip_length_check = true;
        }
        self.emit(conn, MessageEvent::Start(head));

        if end_stream {
            return self.recv_end(conn, None);
        }
        Ok(())
    }

    /// A DATA frame arrived on this stream. The connection window has
    /// already been charged.
    pub(crate) fn on_data(&mut self, conn: &mut Connection, frame: &Frame) -> Result<(), H2Error> {
        if !self.is_receiving() {
            return Err(self.error(ErrorCode::StreamClosed));
        }
        let data = frame.data_payload().map_err(H2Error::Connection)?;
        self.recv_window
            .consume(frame.payload.len())
            .map_err(|code| self.error(code))?;
        if !self.head_received {
            return Err(self.error(ErrorCode::ProtocolError));
        }

        self.recv_payload_size += data.len() as u64;
        if let Some(expected) = self.content_length {
            if !self.skip_length_check && self.recv_payload_size > expected {
                return Err(self.error(ErrorCode::ProtocolError));
            }
        }
        if !data.is_empty() {
            self.emit(conn, MessageEvent::Data(data.to_vec()));
        }

        if frame.is_end_stream() {
            return self.recv_end(conn, None);
        }
        Ok(())
    }

    fn recv_end(&mut self, conn: &mut Connection, trailers: Option<Vec<H2Header>>) -> Result<(), H2Error> {
        if let Some(expected) = self.content_length {
            if !self.skip_length_check && self.recv_payload_size != expected {
                return Err(self.error(ErrorCode::ProtocolError));
            }
        }
        self.emit(conn, MessageEvent::End(trailers));
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            state => state,
        };
        Ok(())
    }

    pub(crate) fn on_window_update(&mut self, increment: u32) -> Result<(), H2Error> {
        self.send_window
            .increase(increment)
            .map_err(|code| self.error(code))
    }

    /// Follow a change of the peer's SETTINGS_INITIAL_WINDOW_SIZE.
    pub(crate) fn adjust_send_window(&mut self, delta: i64) -> Result<(), ErrorCode> {
        self.send_window.adjust(delta)
    }

    /// WINDOW_UPDATE increment to send for this stream, if it is due.
    pub(crate) fn take_window_update(&mut self) -> Option<u32> {
        if !self.is_receiving() {
            return None;
        }
        self.recv_window.take_update()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    pub(crate) fn send_start(&mut self, head: MessageHead) -> Result<(), H2Error> {
        if self.head.is_some() || self.head_sent {
            return Err(H2Error::InvalidEvent("message already started"));
        }
        if matches!(self.state, StreamState::HalfClosedLocal | StreamState::Closed) {
            return Err(H2Error::InvalidEvent("stream closed for sending"));
        }
        if head.is_head_request() || head.is_connect() {
            self.skip_length_check = true;
        }
        self.head = Some(head);
        Ok(())
    }

    pub(crate) fn send_data(&mut self, data: Vec<u8>) -> Result<(), H2Error> {
        self.check_sending()?;
        self.send_buffer.extend(data);
        Ok(())
    }

    pub(crate) fn send_end(&mut self, trailers: Option<Vec<H2Header>>) -> Result<(), H2Error> {
        self.check_sending()?;
        self.end_pending = true;
        self.trailers = trailers.filter(|t| !t.is_empty());
        Ok(())
    }

    fn check_sending(&self) -> Result<(), H2Error> {
        if self.head.is_none() && !self.head_sent {
            return Err(H2Error::InvalidEvent("message not started"));
        }
        if self.end_pending {
            return Err(H2Error::InvalidEvent("message already ended"));
        }
        Ok(())
    }

    /// Write whatever can be written now: the pending head, DATA frames as
    /// far as both windows and the peer's frame size allow, then the end
    /// of the message once the buffer has drained.
    pub(crate) fn pump(&mut self, conn: &mut Connection) {
        if let Some(head) = self.head.take() {
            let end_stream = self.end_pending && self.send_buffer.is_empty() && self.trailers.is_none();
            self.write_headers(conn, &head, false, end_stream);
            self.head_sent = true;
            if self.state == StreamState::Idle {
                self.state = StreamState::Open;
            }
            if end_stream {
                self.end_sent();
            }
        }
        if !self.head_sent || self.end_sent {
            return;
        }

        let max_frame_size = conn.peer_settings.max_frame_size as usize;
        while !self.send_buffer.is_empty() {
            let n = self
                .send_buffer
                .len()
                .min(self.send_window.available())
                .min(conn.send_window.available())
                .min(max_frame_size);
            if n == 0 {
                break;
            }
            let last = n == self.send_buffer.len() && self.end_pending && self.trailers.is_none();
            let flags = if last { flags::END_STREAM } else { 0 };
            FrameEncoder::header(&mut conn.output, self.id, frame_type::DATA, flags, n);
            conn.output.extend(self.send_buffer.drain(..n));
            self.send_window.deduct(n);
            conn.send_window.deduct(n);
            if last {
                self.end_sent();
                return;
            }
        }

        if self.end_pending && self.send_buffer.is_empty() {
            match self.trailers.take() {
                Some(headers) => {
                    let trailers = MessageHead {
                        headers,
                        ..MessageHead::default()
                    };
                    self.write_headers(conn, &trailers, true, true);
                }
                None => {
                    FrameEncoder::write(&mut conn.output, self.id, frame_type::DATA, flags::END_STREAM, &[]);
                }
            }
            self.end_sent();
        }
    }

    fn end_sent(&mut self) {
        self.end_sent = true;
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            state => state,
        };
    }

    /// Encode `head` and write it as HEADERS plus as many CONTINUATION
    /// frames as the peer's max frame size requires.
    fn write_headers(&self, conn: &mut Connection, head: &MessageHead, is_tail: bool, end_stream: bool) {
        let mut block = Vec::new();
        let is_response = conn.role == Role::Server;
        conn.header_encoder.encode(is_response, is_tail, head, &mut block);

        let max_frame_size = conn.peer_settings.max_frame_size as usize;
        let (first, mut rest) = block.split_at(block.len().min(max_frame_size));
        let mut frame_flags = if end_stream { flags::END_STREAM } else { 0 };
        if rest.is_empty() {
            frame_flags |= flags::END_HEADERS;
        }
        FrameEncoder::write(&mut conn.output, self.id, frame_type::HEADERS, frame_flags, first);

        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(rest.len().min(max_frame_size));
            rest = tail;
            let frame_flags = if rest.is_empty() { flags::END_HEADERS } else { 0 };
            FrameEncoder::write(&mut conn.output, self.id, frame_type::CONTINUATION, frame_flags, chunk);
        }
    }

    /// Close the stream after a reset in either direction.
    pub(crate) fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.send_buffer.clear();
        self.head = None;
    }
}
