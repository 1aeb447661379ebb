//! Server role: one pipeline per inbound stream.
//!
//! The [`Server`] feeds every inbound stream to a fresh [`Pipeline`] made by
//! its [`PipelineFactory`], and writes the events the pipeline produces back
//! on the same stream.

use std::collections::HashMap;
use std::mem;

use tracing::debug;

use crate::endpoint::{Endpoint, EndpointOptions, H2Event, Role};
use crate::error::{ErrorCode, H2Error};
use crate::message::{MessageEvent, MessageHead};

/// Per-stream downstream processing.
pub trait Pipeline {
    /// Handle one inbound event. Events pushed to `output` are sent back on
    /// the stream, in order.
    fn on_event(&mut self, event: MessageEvent, output: &mut Vec<MessageEvent>);
}

/// Creates the pipeline for a new inbound stream.
pub trait PipelineFactory {
    type Pipeline: Pipeline;

    fn new_pipeline(&mut self, stream_id: u32) -> Self::Pipeline;
}

impl<F, P> PipelineFactory for F
where
    F: FnMut(u32) -> P,
    P: Pipeline,
{
    type Pipeline = P;

    fn new_pipeline(&mut self, stream_id: u32) -> P {
        self(stream_id)
    }
}

/// An HTTP/1 request buffered during an in-place h2c upgrade.
#[derive(Debug)]
struct UpgradeRequest {
    head: MessageHead,
    body: Vec<u8>,
}

/// Server side of an HTTP/2 connection.
pub struct Server<F: PipelineFactory> {
    endpoint: Endpoint,
    factory: F,
    pipelines: HashMap<u32, F::Pipeline>,
    upgrade: Option<UpgradeRequest>,
    // Connection-level events not yet returned by `process`.
    events: Vec<H2Event>,
}

impl<F: PipelineFactory> Server<F> {
    pub fn new(options: EndpointOptions, factory: F) -> Self {
        Self {
            endpoint: Endpoint::new(Role::Server, options),
            factory,
            pipelines: HashMap::new(),
            upgrade: None,
            events: Vec::new(),
        }
    }

    /// Write our SETTINGS without waiting for the client.
    pub fn open(&mut self) {
        self.endpoint.open();
    }

    /// Consume inbound bytes and run the affected pipelines.
    ///
    /// Message events are consumed by pipelines; the connection-level
    /// events (GOAWAY, PING ACK, connection errors) are returned.
    pub fn process(&mut self, data: &[u8]) -> Vec<H2Event> {
        let events = self.endpoint.process(data);
        self.dispatch(events);
        mem::take(&mut self.events)
    }

    /// Feed the HTTP/1 request that arrived before an h2c upgrade. On `End`
    /// it becomes stream 1 and is delivered to a new pipeline.
    pub fn initial_stream_event(&mut self, event: MessageEvent) -> Result<(), H2Error> {
        match event {
            MessageEvent::Start(head) => {
                if self.upgrade.is_some() {
                    return Err(H2Error::InvalidEvent("upgrade request already started"));
                }
                self.upgrade = Some(UpgradeRequest {
                    head,
                    body: Vec::new(),
                });
            }
            MessageEvent::Data(data) => {
                let upgrade = self
                    .upgrade
                    .as_mut()
                    .ok_or(H2Error::InvalidEvent("upgrade request body before its head"))?;
                upgrade.body.extend_from_slice(&data);
            }
            MessageEvent::End(_) => {
                let UpgradeRequest { head, body } = self
                    .upgrade
                    .take()
                    .ok_or(H2Error::InvalidEvent("upgrade request ended before its head"))?;
                self.endpoint.upgrade_request(head, body)?;
                let events = self.endpoint.take_events();
                self.dispatch(events);
            }
            MessageEvent::StreamEnd(_) => self.upgrade = None,
        }
        Ok(())
    }

    /// Send on a stream outside of a pipeline callback.
    pub fn send(&mut self, stream_id: u32, event: MessageEvent) -> Result<(), H2Error> {
        self.endpoint.send(stream_id, event)
    }

    pub fn go_away(&mut self) {
        self.endpoint.go_away();
    }

    pub fn close(&mut self, code: ErrorCode) {
        self.endpoint.close(code);
        let events = self.endpoint.take_events();
        self.dispatch(events);
    }

    pub fn ping(&mut self, data: [u8; 8]) -> Result<(), H2Error> {
        self.endpoint.ping(data)
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        self.endpoint.take_output()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Streams with a live pipeline.
    pub fn active_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    fn dispatch(&mut self, mut events: Vec<H2Event>) {
        // Replies can complete streams, which queues more events.
        while !events.is_empty() {
            for event in events {
                match event {
                    H2Event::Message { stream_id, event } => self.deliver(stream_id, event),
                    other => self.events.push(other),
                }
            }
            events = self.endpoint.take_events();
        }
    }

    fn deliver(&mut self, stream_id: u32, event: MessageEvent) {
        if let MessageEvent::StreamEnd(code) = event {
            if let Some(mut pipeline) = self.pipelines.remove(&stream_id) {
                debug!(stream_id, ?code, "pipeline finished");
                pipeline.on_event(event, &mut Vec::new());
            }
            return;
        }

        let factory = &mut self.factory;
        let pipeline = self.pipelines.entry(stream_id).or_insert_with(|| {
            debug!(stream_id, "new pipeline");
            factory.new_pipeline(stream_id)
        });
        let mut replies = Vec::new();
        pipeline.on_event(event, &mut replies);

        if replies.is_empty() {
            return;
        }
        for reply in replies {
            if let Err(err) = self.endpoint.enqueue(stream_id, reply) {
                debug!(stream_id, error = %err, "dropping reply");
                break;
            }
        }
        self.endpoint.flush();
    }
}
