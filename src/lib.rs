//! h2-mux: A sans-I/O HTTP/2 protocol engine
//!
//! This crate implements the HTTP/2 wire protocol as a synchronous state
//! machine: bytes in, bytes and events out. It owns no sockets, timers or
//! threads, so it runs anywhere a `Vec<u8>` does.
//!
//! # Features
//!
//! - **Frame codec**: incremental deframing from arbitrarily split input,
//!   frame builders for every control frame
//! - **HPACK**: static and dynamic tables, Huffman coding, size-update
//!   signalling, interoperable with other HPACK implementations
//! - **Streams**: the RFC 7540 state machine, header validation,
//!   content-length checks, trailers
//! - **Flow Control**: per-stream and per-connection windows in both
//!   directions, with automatic WINDOW_UPDATE generation
//! - **Roles**: a [`Server`] that runs one [`Pipeline`] per request and a
//!   [`Client`] with caller-owned request streams
//!
//! # Quick Start
//!
//! ```rust
//! use h2_mux::{Client, EndpointOptions, H2Event, MessageEvent, MessageHead, Pipeline, Server};
//!
//! struct Hello;
//!
//! impl Pipeline for Hello {
//!     fn on_event(&mut self, event: MessageEvent, output: &mut Vec<MessageEvent>) {
//!         if let MessageEvent::End(_) = event {
//!             output.push(MessageEvent::Start(MessageHead::response(200)));
//!             output.push(MessageEvent::Data(b"hello".to_vec()));
//!             output.push(MessageEvent::End(None));
//!         }
//!     }
//! }
//!
//! let mut server = Server::new(EndpointOptions::default(), |_stream_id: u32| Hello);
//! let mut client = Client::new(EndpointOptions::default());
//!
//! let request = client.stream()?;
//! let head = MessageHead::request("GET", "https", "example.com", "/");
//! client.send(&request, MessageEvent::Start(head))?;
//! client.send(&request, MessageEvent::End(None))?;
//!
//! // Normally the transport moves these bytes.
//! let mut body = Vec::new();
//! for _ in 0..3 {
//!     server.process(&client.take_output());
//!     for event in client.process(&server.take_output()) {
//!         if let H2Event::Message { event: MessageEvent::Data(data), .. } = event {
//!             body.extend(data);
//!         }
//!     }
//! }
//! assert_eq!(body, b"hello");
//! # Ok::<(), h2_mux::H2Error>(())
//! ```
//!
//! # Architecture
//!
//! Leaves first:
//! - [`settings`], [`frame`], [`codec`]: the wire format
//! - [`hpack`]: header compression
//! - [`stream`], [`flow_control`]: one stream and its windows
//! - [`endpoint`]: one connection, either role
//! - [`server`], [`client`]: the role-specific surfaces
//!
//! It does NOT provide:
//! - TCP transport or TLS (you provide the bytes)
//! - HTTP/1 parsing (an h2c upgrade hands over an already parsed request)
//! - Server push
//!
//! The crate logs through `tracing` and never installs a subscriber.

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod hpack;
pub mod message;
pub mod server;
pub mod settings;
pub mod stream;

pub use client::{Client, ClientStream};
pub use codec::{is_h2c_preface, Deframed, FrameDecoder, FrameEncoder, CONNECTION_PREFACE, MAX_HEADER_BLOCK_SIZE};
pub use endpoint::{Endpoint, EndpointOptions, H2Event, Role};
pub use error::{ErrorCode, H2Error};
pub use flow_control::{RecvWindow, Window};
pub use frame::{flags, frame_type, Frame, H2FrameHeader, Priority};
pub use hpack::{DynamicTable, H2Header, HeaderDecoder, HeaderEncoder, TableEntry};
pub use message::{MessageEvent, MessageHead};
pub use server::{Pipeline, PipelineFactory, Server};
pub use settings::{settings_id, Settings};
pub use stream::{StreamBase, StreamState};
