//! Connection-level HTTP/2 engine.
//!
//! An [`Endpoint`] owns every stream of one connection together with the
//! shared connection state: HPACK tables, local and peer settings and the
//! connection flow-control windows. It is sans-I/O: feed inbound bytes to
//! [`process`](Endpoint::process), collect outbound bytes with
//! [`take_output`](Endpoint::take_output).
//!
//! Frames produced while handling one call are batched into a single
//! output buffer.

use std::collections::BTreeMap;
use std::mem;

use tracing::{debug, trace, warn};

use crate::codec::{Deframed, FrameDecoder, FrameEncoder, CONNECTION_PREFACE, MAX_HEADER_BLOCK_SIZE};
use crate::error::{ErrorCode, H2Error};
use crate::flow_control::{RecvWindow, Window};
use crate::frame::{frame_type, Frame, H2FrameHeader, STREAM_ID_MASK};
use crate::hpack::{DynamicTable, HeaderDecoder, HeaderEncoder};
use crate::message::{MessageEvent, MessageHead};
use crate::settings::{
    Settings, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
    MAX_MAX_FRAME_SIZE, MAX_WINDOW_SIZE,
};
use crate::stream::{StreamBase, StreamState};

/// Which side of the connection this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Whether `stream_id` belongs to streams this side initiates
    /// (odd for a client, even for a server).
    pub fn is_local(self, stream_id: u32) -> bool {
        match self {
            Role::Server => stream_id % 2 == 0,
            Role::Client => stream_id % 2 == 1,
        }
    }
}

/// Endpoint configuration. The SETTINGS we advertise are derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOptions {
    /// Connection receive window we grant the peer.
    pub connection_window_size: u32,
    /// Per-stream receive window, advertised as SETTINGS_INITIAL_WINDOW_SIZE.
    pub stream_window_size: u32,
    pub header_table_size: u32,
    pub max_frame_size: u32,
    pub max_concurrent_streams: Option<u32>,
    pub max_header_list_size: Option<u32>,
    /// Huffman-code header strings when that makes them shorter.
    pub use_huffman: bool,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            connection_window_size: 0x100000,
            stream_window_size: 0x100000,
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: None,
            max_header_list_size: None,
            use_huffman: true,
        }
    }
}

impl EndpointOptions {
    fn connection_window(&self) -> u32 {
        self.connection_window_size
            .clamp(DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE)
    }

    fn stream_window(&self) -> u32 {
        self.stream_window_size
            .clamp(DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE)
    }

    fn settings(&self, role: Role) -> Settings {
        Settings {
            header_table_size: self.header_table_size,
            enable_push: role == Role::Server,
            max_concurrent_streams: self.max_concurrent_streams,
            initial_window_size: self.stream_window(),
            max_frame_size: self
                .max_frame_size
                .clamp(DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE),
            max_header_list_size: self.max_header_list_size,
        }
    }
}

/// Events produced by processing inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H2Event {
    /// A step of the inbound message on a stream. Every stream ends with
    /// exactly one `MessageEvent::StreamEnd`, after which it is forgotten.
    Message { stream_id: u32, event: MessageEvent },
    /// The peer is shutting the connection down.
    GoAway { last_stream_id: u32, error_code: ErrorCode },
    /// We detected a connection error and sent GOAWAY.
    ConnectionError { error_code: ErrorCode },
    PingAck { data: [u8; 8] },
}

/// Connection-wide state shared by all streams.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) role: Role,
    pub(crate) options: EndpointOptions,
    pub(crate) local_settings: Settings,
    pub(crate) peer_settings: Settings,
    pub(crate) header_decoder: HeaderDecoder,
    pub(crate) header_encoder: HeaderEncoder,
    pub(crate) send_window: Window,
    pub(crate) recv_window: RecvWindow,
    pub(crate) output: Vec<u8>,
    pub(crate) events: Vec<H2Event>,
}

impl Connection {
    pub(crate) fn new(role: Role, options: EndpointOptions) -> Self {
        let local_settings = options.settings(role);
        let mut header_decoder = HeaderDecoder::new(local_settings.header_table_size as usize);
        header_decoder.set_max_header_list_size(local_settings.max_header_list_size.map(|n| n as usize));

        Self {
            role,
            header_encoder: HeaderEncoder::new(options.use_huffman),
            header_decoder,
            peer_settings: Settings::default(),
            local_settings,
            send_window: Window::new(DEFAULT_INITIAL_WINDOW_SIZE),
            recv_window: RecvWindow::new(options.connection_window()),
            options,
            output: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// What to do with a header block once it is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockTarget {
    Stream,
    /// Decode only to keep HPACK state in sync.
    Discard,
    /// Decode, then reset the stream with this code.
    Refuse(ErrorCode),
}

/// A header block spread over HEADERS and CONTINUATION frames.
#[derive(Debug, Clone, Copy)]
struct HeaderBlock {
    stream_id: u32,
    end_stream: bool,
    size: usize,
    target: BlockTarget,
}

/// One HTTP/2 connection, client or server side.
#[derive(Debug)]
pub struct Endpoint {
    conn: Connection,
    streams: BTreeMap<u32, StreamBase>,
    frame_decoder: FrameDecoder,
    header_block: Option<HeaderBlock>,
    opened: bool,
    // Bytes of the client preface a server has yet to see.
    preface_remaining: usize,
    settings_received: bool,
    next_stream_id: u32,
    // Highest stream id the peer has opened, accepted or not.
    last_peer_stream_id: u32,
    // Highest peer stream id we accepted; reported in GOAWAY.
    last_processed_stream_id: u32,
    goaway_sent: bool,
    goaway_received: bool,
    closed: bool,
}

impl Endpoint {
    pub fn new(role: Role, options: EndpointOptions) -> Self {
        let conn = Connection::new(role, options);
        let mut frame_decoder = FrameDecoder::new();
        frame_decoder.set_max_frame_size(conn.local_settings.max_frame_size);

        Self {
            conn,
            streams: BTreeMap::new(),
            frame_decoder,
            header_block: None,
            opened: false,
            preface_remaining: match role {
                Role::Server => CONNECTION_PREFACE.len(),
                Role::Client => 0,
            },
            settings_received: false,
            next_stream_id: match role {
                Role::Server => 2,
                Role::Client => 1,
            },
            last_peer_stream_id: 0,
            last_processed_stream_id: 0,
            goaway_sent: false,
            goaway_received: false,
            closed: false,
        }
    }

    /// Write the opening sequence: the preface (client only), our SETTINGS
    /// and a WINDOW_UPDATE growing the connection receive window to its
    /// configured size. Called implicitly by the first `process` or `send`.
    pub fn open(&mut self) {
        if self.opened || self.closed {
            return;
        }
        self.opened = true;

        let out = &mut self.conn.output;
        if self.conn.role == Role::Client {
            out.extend_from_slice(CONNECTION_PREFACE);
        }
        let mut payload = Vec::new();
        self.conn.local_settings.encode(&mut payload);
        FrameEncoder::write(out, 0, frame_type::SETTINGS, 0, &payload);

        let increment = self.conn.recv_window.max() - DEFAULT_INITIAL_WINDOW_SIZE;
        if increment > 0 {
            FrameEncoder::frame(&Frame::window_update(0, increment), out);
        }
        debug!(role = ?self.conn.role, settings = ?self.conn.local_settings, "connection opened");
    }

    /// Consume inbound bytes, which may split frames anywhere.
    ///
    /// Returns the events produced, including those queued by earlier
    /// [`send`](Self::send) calls.
    pub fn process(&mut self, mut data: &[u8]) -> Vec<H2Event> {
        self.open();
        if self.closed {
            return self.take_events();
        }

        if self.preface_remaining > 0 {
            let offset = CONNECTION_PREFACE.len() - self.preface_remaining;
            let n = self.preface_remaining.min(data.len());
            if data[..n] != CONNECTION_PREFACE[offset..offset + n] {
                self.connection_error(ErrorCode::ProtocolError);
                return self.take_events();
            }
            self.preface_remaining -= n;
            data = &data[n..];
        }

        let mut decoder = mem::take(&mut self.frame_decoder);
        let result = decoder.feed(data, |deframed| match deframed {
            Deframed::Frame(frame) => self.on_frame(frame),
            Deframed::OversizedData(header) => self.on_oversized_data(&header),
        });
        self.frame_decoder = decoder;

        match result {
            Ok(()) => {
                self.flush();
                self.send_window_updates();
            }
            Err(code) => self.connection_error(code),
        }
        self.take_events()
    }

    /// Hand an outbound message event to a stream.
    ///
    /// Frames are written as far as flow control allows; the rest is
    /// written as credit arrives.
    pub fn send(&mut self, stream_id: u32, event: MessageEvent) -> Result<(), H2Error> {
        self.enqueue(stream_id, event)?;
        self.flush();
        Ok(())
    }

    /// Like [`send`](Self::send) but leaves writing frames to the next
    /// flush, so a batch of events is framed together.
    pub(crate) fn enqueue(&mut self, stream_id: u32, event: MessageEvent) -> Result<(), H2Error> {
        if self.closed {
            return Err(H2Error::Closed);
        }
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(H2Error::UnknownStream(stream_id))?;

        match event {
            MessageEvent::Start(head) => stream.send_start(head)?,
            MessageEvent::Data(data) => stream.send_data(data)?,
            MessageEvent::End(trailers) => stream.send_end(trailers)?,
            MessageEvent::StreamEnd(None) if stream.outbound_ended() => {}
            MessageEvent::StreamEnd(code) => {
                self.reset_stream(stream_id, code.unwrap_or(ErrorCode::Cancel));
            }
        }
        Ok(())
    }

    /// Open a new locally initiated stream. Its HEADERS go out once the
    /// application starts the message and the peer's concurrency limit
    /// allows; streams are activated in the order they were opened.
    pub fn open_stream(&mut self) -> Result<u32, H2Error> {
        if self.closed {
            return Err(H2Error::Closed);
        }
        if self.goaway_received {
            return Err(H2Error::GoneAway);
        }
        let id = self.next_stream_id;
        if id > STREAM_ID_MASK {
            return Err(H2Error::StreamIdsExhausted);
        }
        self.next_stream_id += 2;
        let stream = StreamBase::new(id, self.conn.peer_settings.initial_window_size, self.conn.options.stream_window());
        self.streams.insert(id, stream);
        Ok(id)
    }

    /// Reset a stream with RST_STREAM and forget it. Unknown streams are
    /// ignored.
    pub fn reset_stream(&mut self, stream_id: u32, code: ErrorCode) {
        let Some(mut stream) = self.streams.remove(&stream_id) else {
            return;
        };
        // A stream that never sent HEADERS does not exist for the peer.
        if !stream.is_pending() {
            FrameEncoder::rst_stream(stream_id, code, &mut self.conn.output);
        }
        stream.reset();
        debug!(stream_id, code = %code, "stream reset locally");
        self.end_stream(stream_id, Some(code));
        self.flush();
    }

    /// Graceful shutdown: announce GOAWAY(NO_ERROR) and stop accepting new
    /// streams while the existing ones finish.
    pub fn go_away(&mut self) {
        if self.goaway_sent || self.closed {
            return;
        }
        self.open();
        self.goaway_sent = true;
        debug!(last_stream_id = self.last_processed_stream_id, "sending GOAWAY");
        FrameEncoder::goaway(self.last_processed_stream_id, ErrorCode::NoError, &mut self.conn.output);
    }

    /// Tear the connection down with GOAWAY carrying `code`. Every stream
    /// ends with `StreamEnd(Some(code))`.
    pub fn close(&mut self, code: ErrorCode) {
        self.teardown(code);
    }

    pub fn ping(&mut self, data: [u8; 8]) -> Result<(), H2Error> {
        if self.closed {
            return Err(H2Error::Closed);
        }
        self.open();
        FrameEncoder::frame(&Frame::ping(data, false), &mut self.conn.output);
        Ok(())
    }

    /// Install an HTTP/1 request received before an h2c upgrade as stream 1,
    /// already half-closed (remote).
    pub fn upgrade_request(&mut self, head: MessageHead, body: Vec<u8>) -> Result<(), H2Error> {
        if self.conn.role != Role::Server || self.last_peer_stream_id != 0 {
            return Err(H2Error::InvalidEvent("upgrade must precede all streams"));
        }
        let id = 1;
        self.last_peer_stream_id = id;
        self.last_processed_stream_id = id;
        let stream = StreamBase::upgraded(id, self.conn.peer_settings.initial_window_size, self.conn.options.stream_window());
        self.streams.insert(id, stream);

        self.emit(id, MessageEvent::Start(head));
        if !body.is_empty() {
            self.emit(id, MessageEvent::Data(body));
        }
        self.emit(id, MessageEvent::End(None));
        debug!("h2c upgrade request installed as stream 1");
        Ok(())
    }

    /// Take the bytes to write to the transport.
    pub fn take_output(&mut self) -> Vec<u8> {
        mem::take(&mut self.conn.output)
    }

    /// Take events queued outside of [`process`](Self::process).
    pub fn take_events(&mut self) -> Vec<H2Event> {
        mem::take(&mut self.conn.events)
    }

    pub fn role(&self) -> Role {
        self.conn.role
    }

    pub fn stream(&self, stream_id: u32) -> Option<&StreamBase> {
        self.streams.get(&stream_id)
    }

    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.streams.get(&stream_id).map(StreamBase::state)
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Connection send window.
    pub fn send_window(&self) -> Window {
        self.conn.send_window
    }

    /// Connection receive window.
    pub fn recv_window(&self) -> RecvWindow {
        self.conn.recv_window
    }

    pub fn local_settings(&self) -> &Settings {
        &self.conn.local_settings
    }

    pub fn peer_settings(&self) -> &Settings {
        &self.conn.peer_settings
    }

    /// HPACK table of header blocks we send.
    pub fn send_table(&self) -> &DynamicTable {
        self.conn.header_encoder.table()
    }

    /// HPACK table of header blocks we receive.
    pub fn recv_table(&self) -> &DynamicTable {
        self.conn.header_decoder.table()
    }

    pub fn last_peer_stream_id(&self) -> u32 {
        self.last_peer_stream_id
    }

    pub fn has_gone_away(&self) -> bool {
        self.goaway_received
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ========================================================================
    // Frame dispatch
    // ========================================================================

    fn on_frame(&mut self, frame: &Frame) -> Result<(), ErrorCode> {
        let result = self.dispatch(frame);
        self.settle(result)
    }

    /// A DATA frame over our max frame size was skipped by the deframer.
    /// It only dooms its stream, but still counts against the connection.
    fn on_oversized_data(&mut self, header: &H2FrameHeader) -> Result<(), ErrorCode> {
        let result = self.check_sequence(header.frame_type, false).and_then(|()| {
            self.conn
                .recv_window
                .consume(header.length as usize)
                .map_err(H2Error::Connection)?;
            if self.is_idle(header.stream_id) {
                return Err(H2Error::Connection(ErrorCode::ProtocolError));
            }
            if self.is_ignored(header.stream_id) {
                return Ok(());
            }
            Err(H2Error::stream(header.stream_id, ErrorCode::FrameSizeError))
        });
        self.settle(result)
    }

    /// Turn a handler's verdict into what the deframer needs: stream errors
    /// are dealt with here, connection errors stop decoding.
    fn settle(&mut self, result: Result<(), H2Error>) -> Result<(), ErrorCode> {
        match result {
            Ok(()) => Ok(()),
            Err(H2Error::Stream { stream_id, code }) => {
                self.stream_error(stream_id, code);
                Ok(())
            }
            Err(H2Error::Connection(code)) => Err(code),
            Err(err) => {
                warn!(error = %err, "unexpected error while processing frame");
                Err(ErrorCode::InternalError)
            }
        }
    }

    /// Frame ordering rules: nothing may interrupt a header block, and the
    /// peer's first frame must be a non-ACK SETTINGS.
    fn check_sequence(&self, frame_type: u8, is_ack: bool) -> Result<(), H2Error> {
        if self.header_block.is_some() && frame_type != frame_type::CONTINUATION {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        if !self.settings_received && (frame_type != frame_type::SETTINGS || is_ack) {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        Ok(())
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<(), H2Error> {
        self.check_sequence(frame.frame_type, frame.is_ack())?;
        if let Some(block) = self.header_block {
            if frame.stream_id != block.stream_id {
                return Err(H2Error::Connection(ErrorCode::ProtocolError));
            }
        }

        match frame.frame_type {
            frame_type::DATA => self.on_data(frame),
            frame_type::HEADERS => self.on_headers(frame),
            frame_type::PRIORITY => self.on_priority(frame),
            frame_type::RST_STREAM => self.on_rst_stream(frame),
            frame_type::SETTINGS => self.on_settings(frame),
            frame_type::PUSH_PROMISE => Err(H2Error::Connection(ErrorCode::ProtocolError)),
            frame_type::PING => self.on_ping(frame),
            frame_type::GOAWAY => self.on_goaway(frame),
            frame_type::WINDOW_UPDATE => self.on_window_update(frame),
            frame_type::CONTINUATION => self.on_continuation(frame),
            other => {
                trace!(frame_type = other, "ignoring unknown frame type");
                Ok(())
            }
        }
    }

    /// Whether `stream_id` is idle as far as the peer can tell. A local
    /// stream that has not sent its HEADERS yet counts as idle. An unknown
    /// id is idle if neither side could have opened it yet; otherwise it
    /// belongs to a stream that has closed.
    fn is_idle(&self, stream_id: u32) -> bool {
        let role = self.conn.role;
        if let Some(stream) = self.streams.get(&stream_id) {
            return role.is_local(stream_id) && stream.is_pending();
        }
        if role.is_local(stream_id) {
            stream_id >= self.next_stream_id
        } else {
            stream_id > self.last_peer_stream_id
        }
    }

    /// A peer stream opened after our GOAWAY, which we neither processed
    /// nor answer.
    fn is_ignored(&self, stream_id: u32) -> bool {
        self.goaway_sent && !self.conn.role.is_local(stream_id) && stream_id > self.last_processed_stream_id
    }

    fn on_data(&mut self, frame: &Frame) -> Result<(), H2Error> {
        let id = frame.stream_id;
        if id == 0 {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        // The whole frame counts against the connection, even on a closed stream.
        self.conn
            .recv_window
            .consume(frame.payload.len())
            .map_err(H2Error::Connection)?;
        if self.is_idle(id) {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        let ignored = self.is_ignored(id);

        match self.streams.get_mut(&id) {
            Some(stream) => {
                stream.on_data(&mut self.conn, frame)?;
                self.retire(id);
                Ok(())
            }
            None if ignored => Ok(()),
            None => Err(H2Error::stream(id, ErrorCode::StreamClosed)),
        }
    }

    fn on_headers(&mut self, frame: &Frame) -> Result<(), H2Error> {
        let id = frame.stream_id;
        if id == 0 {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        let (fragment, priority) = frame.header_block().map_err(H2Error::Connection)?;

        let mut target = self.header_target(id)?;
        if priority.map_or(false, |p| p.dependency == id) {
            target = BlockTarget::Refuse(ErrorCode::ProtocolError);
        }

        let is_response = self.conn.role == Role::Client;
        let is_trailer = self.streams.get(&id).map_or(false, StreamBase::head_received);
        self.conn.header_decoder.start(is_response, is_trailer);

        let block = HeaderBlock {
            stream_id: id,
            end_stream: frame.is_end_stream(),
            size: 0,
            target,
        };
        self.header_fragment(block, fragment, frame.is_end_headers())
    }

    fn on_continuation(&mut self, frame: &Frame) -> Result<(), H2Error> {
        let Some(block) = self.header_block else {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        };
        self.header_fragment(block, &frame.payload, frame.is_end_headers())
    }

    /// Decide where a header block opening on `stream_id` goes, creating
    /// the stream if the peer is opening a new one.
    fn header_target(&mut self, stream_id: u32) -> Result<BlockTarget, H2Error> {
        let role = self.conn.role;
        let idle = self.is_idle(stream_id);
        if role.is_local(stream_id) {
            if idle {
                return Err(H2Error::Connection(ErrorCode::ProtocolError));
            }
            return Ok(if self.streams.contains_key(&stream_id) {
                BlockTarget::Stream
            } else {
                BlockTarget::Refuse(ErrorCode::StreamClosed)
            });
        }
        if self.streams.contains_key(&stream_id) {
            return Ok(BlockTarget::Stream);
        }
        if !idle {
            return Ok(if self.is_ignored(stream_id) {
                BlockTarget::Discard
            } else {
                BlockTarget::Refuse(ErrorCode::StreamClosed)
            });
        }
        // Push is never enabled, so a server cannot open streams.
        if role == Role::Client {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }

        self.last_peer_stream_id = stream_id;
        if self.goaway_sent {
            return Ok(BlockTarget::Discard);
        }
        self.last_processed_stream_id = stream_id;
        let active = self.streams.keys().filter(|&&id| !role.is_local(id)).count();
        if matches!(self.conn.local_settings.max_concurrent_streams, Some(max) if active >= max as usize) {
            debug!(stream_id, active, "refusing stream over concurrency limit");
            return Ok(BlockTarget::Refuse(ErrorCode::RefusedStream));
        }

        let stream = StreamBase::new(stream_id, self.conn.peer_settings.initial_window_size, self.conn.options.stream_window());
        self.streams.insert(stream_id, stream);
        Ok(BlockTarget::Stream)
    }

    fn header_fragment(&mut self, mut block: HeaderBlock, fragment: &[u8], end_headers: bool) -> Result<(), H2Error> {
        block.size += fragment.len();
        if block.size > MAX_HEADER_BLOCK_SIZE {
            return Err(H2Error::Connection(ErrorCode::EnhanceYourCalm));
        }
        self.conn
            .header_decoder
            .decode(fragment)
            .map_err(H2Error::Connection)?;
        if !end_headers {
            self.header_block = Some(block);
            return Ok(());
        }
        self.header_block = None;

        let head = self.conn.header_decoder.end();
        if let Err(ErrorCode::CompressionError) = head {
            return Err(H2Error::Connection(ErrorCode::CompressionError));
        }

        let id = block.stream_id;
        match block.target {
            BlockTarget::Stream => {
                if let Some(stream) = self.streams.get_mut(&id) {
                    stream.on_headers(&mut self.conn, head, block.end_stream)?;
                    self.retire(id);
                }
                Ok(())
            }
            BlockTarget::Discard => Ok(()),
            BlockTarget::Refuse(code) => Err(H2Error::stream(id, code)),
        }
    }

    fn on_priority(&mut self, frame: &Frame) -> Result<(), H2Error> {
        let id = frame.stream_id;
        if id == 0 {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        let priority = frame.decode_priority().map_err(|code| H2Error::stream(id, code))?;
        if priority.dependency == id {
            return Err(H2Error::stream(id, ErrorCode::ProtocolError));
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: &Frame) -> Result<(), H2Error> {
        let id = frame.stream_id;
        if id == 0 {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        let code = frame.decode_rst_stream().map_err(H2Error::Connection)?;
        if self.is_idle(id) {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        if let Some(mut stream) = self.streams.remove(&id) {
            stream.reset();
            debug!(stream_id = id, code = %code, "stream reset by peer");
            self.end_stream(id, Some(code));
        }
        Ok(())
    }

    fn on_settings(&mut self, frame: &Frame) -> Result<(), H2Error> {
        if frame.stream_id != 0 {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        if frame.is_ack() {
            if !frame.payload.is_empty() {
                return Err(H2Error::Connection(ErrorCode::FrameSizeError));
            }
            debug!("settings acknowledged");
            return Ok(());
        }

        let old_window = self.conn.peer_settings.initial_window_size;
        self.conn
            .peer_settings
            .decode(&frame.payload)
            .map_err(H2Error::Connection)?;
        self.settings_received = true;

        let peer = &self.conn.peer_settings;
        self.conn
            .header_encoder
            .set_max_table_size(peer.header_table_size as usize);
        let delta = peer.initial_window_size as i64 - old_window as i64;
        if delta != 0 {
            for stream in self.streams.values_mut() {
                stream
                    .adjust_send_window(delta)
                    .map_err(H2Error::Connection)?;
            }
        }

        debug!(settings = ?self.conn.peer_settings, "peer settings applied");
        FrameEncoder::frame(&Frame::settings_ack(), &mut self.conn.output);
        Ok(())
    }

    fn on_ping(&mut self, frame: &Frame) -> Result<(), H2Error> {
        if frame.stream_id != 0 {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        let data = frame.decode_ping().map_err(H2Error::Connection)?;
        if frame.is_ack() {
            self.conn.events.push(H2Event::PingAck { data });
        } else {
            FrameEncoder::frame(&Frame::ping(data, true), &mut self.conn.output);
        }
        Ok(())
    }

    fn on_goaway(&mut self, frame: &Frame) -> Result<(), H2Error> {
        if frame.stream_id != 0 {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        let (last_stream_id, error_code) = frame.decode_goaway().map_err(H2Error::Connection)?;
        self.goaway_received = true;
        debug!(last_stream_id, code = %error_code, "GOAWAY received");

        // Our streams above the peer's last id were never processed and are
        // safe to retry elsewhere.
        let role = self.conn.role;
        let refused: Vec<u32> = self
            .streams
            .keys()
            .copied()
            .filter(|&id| role.is_local(id) && id > last_stream_id)
            .collect();
        for id in refused {
            if let Some(mut stream) = self.streams.remove(&id) {
                stream.reset();
                self.end_stream(id, Some(ErrorCode::RefusedStream));
            }
        }

        self.conn.events.push(H2Event::GoAway {
            last_stream_id,
            error_code,
        });
        Ok(())
    }

    fn on_window_update(&mut self, frame: &Frame) -> Result<(), H2Error> {
        let id = frame.stream_id;
        let increment = match frame.decode_window_update() {
            Ok(increment) => increment,
            Err(ErrorCode::ProtocolError) if id != 0 => {
                return Err(H2Error::stream(id, ErrorCode::ProtocolError));
            }
            Err(code) => return Err(H2Error::Connection(code)),
        };

        if id == 0 {
            self.conn
                .send_window
                .increase(increment)
                .map_err(H2Error::Connection)?;
            trace!(increment, window = self.conn.send_window.size(), "connection window update");
            return Ok(());
        }
        if self.is_idle(id) {
            return Err(H2Error::Connection(ErrorCode::ProtocolError));
        }
        match self.streams.get_mut(&id) {
            Some(stream) => stream.on_window_update(increment),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Output and teardown
    // ========================================================================

    /// Pump every stream in id order. Local streams still waiting for their
    /// first HEADERS are activated in order while the peer's
    /// SETTINGS_MAX_CONCURRENT_STREAMS allows.
    pub(crate) fn flush(&mut self) {
        self.open();
        if self.closed {
            return;
        }
        let role = self.conn.role;
        let limit = self.conn.peer_settings.max_concurrent_streams.map(|n| n as usize);
        let mut active = self
            .streams
            .iter()
            .filter(|(&id, stream)| role.is_local(id) && !stream.is_pending())
            .count();
        let mut blocked = false;
        let mut closed = Vec::new();

        for (&id, stream) in self.streams.iter_mut() {
            if role.is_local(id) && stream.is_pending() {
                if blocked || !stream.has_head() || matches!(limit, Some(max) if active >= max) {
                    blocked = true;
                    continue;
                }
                active += 1;
                debug!(stream_id = id, "stream opened");
            }
            stream.pump(&mut self.conn);
            if stream.is_closed() {
                closed.push(id);
            }
        }
        for id in closed {
            self.retire(id);
        }
    }

    fn send_window_updates(&mut self) {
        if let Some(increment) = self.conn.recv_window.take_update() {
            trace!(increment, "connection window update sent");
            FrameEncoder::frame(&Frame::window_update(0, increment), &mut self.conn.output);
        }
        for (&id, stream) in self.streams.iter_mut() {
            if let Some(increment) = stream.take_window_update() {
                trace!(stream_id = id, increment, "stream window update sent");
                FrameEncoder::frame(&Frame::window_update(id, increment), &mut self.conn.output);
            }
        }
    }

    /// Forget a stream that has closed normally.
    fn retire(&mut self, stream_id: u32) {
        if self.streams.get(&stream_id).map_or(false, StreamBase::is_closed) {
            self.streams.remove(&stream_id);
            debug!(stream_id, "stream closed");
            self.end_stream(stream_id, None);
        }
    }

    fn stream_error(&mut self, stream_id: u32, code: ErrorCode) {
        warn!(stream_id, code = %code, "stream error");
        FrameEncoder::rst_stream(stream_id, code, &mut self.conn.output);
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            stream.reset();
            self.end_stream(stream_id, Some(code));
        }
    }

    fn connection_error(&mut self, code: ErrorCode) {
        if self.closed {
            return;
        }
        warn!(code = %code, last_stream_id = self.last_processed_stream_id, "connection error");
        self.teardown(code);
        self.conn.events.push(H2Event::ConnectionError { error_code: code });
    }

    fn teardown(&mut self, code: ErrorCode) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.header_block = None;
        FrameEncoder::goaway(self.last_processed_stream_id, code, &mut self.conn.output);
        for (id, mut stream) in mem::take(&mut self.streams) {
            stream.reset();
            self.end_stream(id, Some(code));
        }
    }

    fn end_stream(&mut self, stream_id: u32, code: Option<ErrorCode>) {
        self.emit(stream_id, MessageEvent::StreamEnd(code));
    }

    fn emit(&mut self, stream_id: u32, event: MessageEvent) {
        self.conn.events.push(H2Event::Message { stream_id, event });
    }
}
