//! Integration tests for the connection engine

mod connection;
mod flow_control;

use std::mem;

use h2_mux::{
    flags, frame_type, Client, Endpoint, EndpointOptions, Frame, FrameDecoder, FrameEncoder, H2Event, H2Header,
    HeaderEncoder, MessageEvent, MessageHead, Pipeline, Role, Server, CONNECTION_PREFACE,
};

pub fn get(path: &str) -> MessageHead {
    MessageHead::request("GET", "https", "example.com", path)
}

pub fn post(path: &str) -> MessageHead {
    MessageHead::request("POST", "https", "example.com", path)
}

/// Split endpoint output into frames, skipping a client preface.
pub fn frames(data: &[u8]) -> Vec<Frame> {
    let data = data.strip_prefix(CONNECTION_PREFACE).unwrap_or(data);
    let mut frames = Vec::new();
    FrameDecoder::new()
        .deframe(data, |f| {
            frames.push(f.clone());
            Ok(())
        })
        .unwrap();
    frames
}

/// The message events of one stream, in order.
pub fn messages(events: &[H2Event], stream_id: u32) -> Vec<MessageEvent> {
    events
        .iter()
        .filter_map(|event| match event {
            H2Event::Message { stream_id: id, event } if *id == stream_id => Some(event.clone()),
            _ => None,
        })
        .collect()
}

/// A hand-driven peer that writes raw frames.
pub struct Peer {
    encoder: HeaderEncoder,
    is_server: bool,
    out: Vec<u8>,
}

impl Peer {
    /// A client that has sent its preface and an empty SETTINGS frame.
    pub fn client() -> Self {
        let mut out = CONNECTION_PREFACE.to_vec();
        FrameEncoder::write(&mut out, 0, frame_type::SETTINGS, 0, &[]);
        Self {
            encoder: HeaderEncoder::new(false),
            is_server: false,
            out,
        }
    }

    /// A server that has sent an empty SETTINGS frame.
    pub fn server() -> Self {
        let mut out = Vec::new();
        FrameEncoder::write(&mut out, 0, frame_type::SETTINGS, 0, &[]);
        Self {
            encoder: HeaderEncoder::new(false),
            is_server: true,
            out,
        }
    }

    pub fn block(&mut self, head: &MessageHead) -> Vec<u8> {
        let mut block = Vec::new();
        self.encoder.encode(self.is_server, false, head, &mut block);
        block
    }

    pub fn headers(&mut self, stream_id: u32, head: &MessageHead, end_stream: bool) {
        let block = self.block(head);
        let mut frame_flags = flags::END_HEADERS;
        if end_stream {
            frame_flags |= flags::END_STREAM;
        }
        FrameEncoder::write(&mut self.out, stream_id, frame_type::HEADERS, frame_flags, &block);
    }

    pub fn trailers(&mut self, stream_id: u32, headers: Vec<H2Header>, end_stream: bool) {
        let trailers = MessageHead {
            headers,
            ..MessageHead::default()
        };
        let mut block = Vec::new();
        self.encoder.encode(self.is_server, true, &trailers, &mut block);
        let mut frame_flags = flags::END_HEADERS;
        if end_stream {
            frame_flags |= flags::END_STREAM;
        }
        FrameEncoder::write(&mut self.out, stream_id, frame_type::HEADERS, frame_flags, &block);
    }

    pub fn data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        let frame_flags = if end_stream { flags::END_STREAM } else { 0 };
        FrameEncoder::write(&mut self.out, stream_id, frame_type::DATA, frame_flags, data);
    }

    pub fn settings(&mut self, params: &[(u16, u32)]) {
        let mut payload = Vec::new();
        for (id, value) in params {
            payload.extend_from_slice(&id.to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
        }
        FrameEncoder::write(&mut self.out, 0, frame_type::SETTINGS, 0, &payload);
    }

    pub fn frame(&mut self, frame: &Frame) {
        FrameEncoder::frame(frame, &mut self.out);
    }

    pub fn take(&mut self) -> Vec<u8> {
        mem::take(&mut self.out)
    }
}

/// A server endpoint that has accepted a client's preface and SETTINGS,
/// with its own opening frames already taken.
pub fn server_endpoint(options: EndpointOptions) -> (Endpoint, Peer) {
    let mut server = Endpoint::new(Role::Server, options);
    let mut peer = Peer::client();
    let events = server.process(&peer.take());
    assert!(events.is_empty());
    server.take_output();
    (server, peer)
}

/// Answers every request with 200, echoing its body and trailers.
pub struct Echo {
    body: Vec<u8>,
}

impl Pipeline for Echo {
    fn on_event(&mut self, event: MessageEvent, output: &mut Vec<MessageEvent>) {
        match event {
            MessageEvent::Data(data) => self.body.extend_from_slice(&data),
            MessageEvent::End(trailers) => {
                let head = MessageHead::response(200).with_header("x-echo-length", self.body.len().to_string());
                output.push(MessageEvent::Start(head));
                if !self.body.is_empty() {
                    output.push(MessageEvent::Data(mem::take(&mut self.body)));
                }
                output.push(MessageEvent::End(trailers));
            }
            _ => {}
        }
    }
}

pub type EchoServer = Server<fn(u32) -> Echo>;

pub fn echo_server(options: EndpointOptions) -> EchoServer {
    fn echo(_stream_id: u32) -> Echo {
        Echo { body: Vec::new() }
    }
    Server::new(options, echo as fn(u32) -> Echo)
}

/// Move bytes between the two sides until both are quiet, returning the
/// client's events.
pub fn drive(client: &mut Client, server: &mut EchoServer) -> Vec<H2Event> {
    client.open();
    let mut events = Vec::new();
    for _ in 0..64 {
        let to_server = client.take_output();
        if !to_server.is_empty() {
            server.process(&to_server);
        }
        let to_client = server.take_output();
        if to_server.is_empty() && to_client.is_empty() {
            break;
        }
        events.extend(client.process(&to_client));
    }
    events
}
