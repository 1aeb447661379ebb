//! Client role: caller-owned request streams.

use tracing::debug;

use crate::endpoint::{Endpoint, EndpointOptions, H2Event, Role};
use crate::error::{ErrorCode, H2Error};
use crate::message::MessageEvent;

/// Handle to a request stream opened with [`Client::stream`].
///
/// The caller owns it; the stream's id is never reused on this connection.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ClientStream {
    id: u32,
}

impl ClientStream {
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Client side of an HTTP/2 connection.
#[derive(Debug)]
pub struct Client {
    endpoint: Endpoint,
}

impl Client {
    pub fn new(options: EndpointOptions) -> Self {
        Self {
            endpoint: Endpoint::new(Role::Client, options),
        }
    }

    /// Write the connection preface and our SETTINGS.
    pub fn open(&mut self) {
        self.endpoint.open();
    }

    /// Open a request stream with the next odd stream id.
    ///
    /// Fails once the server has sent GOAWAY or the id space is used up.
    pub fn stream(&mut self) -> Result<ClientStream, H2Error> {
        let id = self.endpoint.open_stream()?;
        debug!(stream_id = id, "request stream allocated");
        Ok(ClientStream { id })
    }

    /// Send a request event on `stream`. The request is written once its
    /// `Start` is sent and the server's concurrency limit allows.
    pub fn send(&mut self, stream: &ClientStream, event: MessageEvent) -> Result<(), H2Error> {
        self.endpoint.send(stream.id, event)
    }

    /// Release a stream handle, cancelling the stream if it is still active.
    pub fn close(&mut self, stream: ClientStream) {
        if self.endpoint.stream(stream.id).is_some() {
            self.endpoint.reset_stream(stream.id, ErrorCode::Cancel);
        }
    }

    /// Consume inbound bytes. Response events arrive as
    /// [`H2Event::Message`] keyed by stream id.
    pub fn process(&mut self, data: &[u8]) -> Vec<H2Event> {
        self.endpoint.process(data)
    }

    pub fn go_away(&mut self) {
        self.endpoint.go_away();
    }

    pub fn ping(&mut self, data: [u8; 8]) -> Result<(), H2Error> {
        self.endpoint.ping(data)
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        self.endpoint.take_output()
    }

    /// Events queued by `send`/`close` since the last `process`.
    pub fn take_events(&mut self) -> Vec<H2Event> {
        self.endpoint.take_events()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
