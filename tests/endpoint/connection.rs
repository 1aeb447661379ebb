//! Tests for connection-level frames: SETTINGS, GOAWAY, CONTINUATION and teardown

use h2_mux::{
    flags, frame_type, settings_id, Client, EndpointOptions, ErrorCode, Frame, H2Error, H2Event, HeaderDecoder,
    MessageEvent, MessageHead, StreamState,
};

use super::{drive, echo_server, frames, get, messages, post, server_endpoint, Peer};

fn goaway_frame(last_stream_id: u32, code: ErrorCode) -> Frame {
    let mut payload = Vec::new();
    payload.extend_from_slice(&last_stream_id.to_be_bytes());
    payload.extend_from_slice(&code.as_u32().to_be_bytes());
    Frame::new(0, frame_type::GOAWAY, 0, payload)
}

#[test]
fn test_settings_applied_and_acknowledged() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.settings(&[
        (settings_id::MAX_CONCURRENT_STREAMS, 10),
        (settings_id::MAX_FRAME_SIZE, 32768),
    ]);
    assert!(server.process(&peer.take()).is_empty());

    assert_eq!(server.peer_settings().max_concurrent_streams, Some(10));
    assert_eq!(server.peer_settings().max_frame_size, 32768);
    let ack = frames(&server.take_output()).pop().unwrap();
    assert_eq!(ack.frame_type, frame_type::SETTINGS);
    assert!(ack.is_ack());
    assert!(ack.payload.is_empty());
}

#[test]
fn test_header_table_size_zero_empties_send_table() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    let response = MessageHead::response(200).with_header("x-request-id", "abc123");

    peer.headers(1, &get("/"), true);
    server.process(&peer.take());
    server.send(1, MessageEvent::Start(response.clone())).unwrap();
    server.send(1, MessageEvent::End(None)).unwrap();
    assert_eq!(server.send_table().len(), 1);

    peer.settings(&[(settings_id::HEADER_TABLE_SIZE, 0)]);
    peer.headers(3, &get("/"), true);
    server.process(&peer.take());
    assert!(server.send_table().is_empty());
    server.send(3, MessageEvent::Start(response.clone())).unwrap();
    server.send(3, MessageEvent::End(None)).unwrap();

    let blocks: Vec<Vec<u8>> = frames(&server.take_output())
        .into_iter()
        .filter(|f| f.frame_type == frame_type::HEADERS)
        .map(|f| f.payload)
        .collect();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1][0], 0x20);

    let mut decoder = HeaderDecoder::new(4096);
    for block in &blocks {
        decoder.start(true, false);
        decoder.decode(block).unwrap();
        assert_eq!(decoder.end(), Ok(response.clone()));
    }
    assert!(decoder.table().is_empty());
}

#[test]
fn test_malformed_settings() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.frame(&Frame::new(0, frame_type::SETTINGS, 0, vec![0; 5]));
    let events = server.process(&peer.take());
    assert_eq!(
        events,
        vec![H2Event::ConnectionError {
            error_code: ErrorCode::FrameSizeError
        }]
    );
    assert!(server.is_closed());
    assert_eq!(
        server.send(1, MessageEvent::Start(MessageHead::response(200))),
        Err(H2Error::Closed)
    );
}

#[test]
fn test_goaway_refuses_unprocessed_streams() {
    let mut client = Client::new(EndpointOptions::default());
    let mut peer = Peer::server();
    client.open();
    client.process(&peer.take());

    let mut ids = Vec::new();
    for _ in 0..3 {
        let stream = client.stream().unwrap();
        client.send(&stream, MessageEvent::Start(get("/"))).unwrap();
        client.send(&stream, MessageEvent::End(None)).unwrap();
        ids.push(stream.id());
    }
    assert_eq!(ids, vec![1, 3, 5]);
    client.take_output();

    peer.frame(&goaway_frame(1, ErrorCode::NoError));
    let events = client.process(&peer.take());
    assert_eq!(
        events,
        vec![
            H2Event::Message {
                stream_id: 3,
                event: MessageEvent::StreamEnd(Some(ErrorCode::RefusedStream)),
            },
            H2Event::Message {
                stream_id: 5,
                event: MessageEvent::StreamEnd(Some(ErrorCode::RefusedStream)),
            },
            H2Event::GoAway {
                last_stream_id: 1,
                error_code: ErrorCode::NoError,
            },
        ]
    );
    assert_eq!(client.stream(), Err(H2Error::GoneAway));
    assert_eq!(client.endpoint().stream_state(1), Some(StreamState::HalfClosedLocal));
    assert!(client.endpoint().has_gone_away());
}

#[test]
fn test_graceful_go_away_ignores_new_streams() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &post("/"), false);
    server.process(&peer.take());

    server.go_away();
    let goaway = frames(&server.take_output()).pop().unwrap();
    assert_eq!(goaway.decode_goaway(), Ok((1, ErrorCode::NoError)));

    peer.headers(3, &get("/"), true);
    peer.data(1, b"x", true);
    let events = server.process(&peer.take());
    assert!(messages(&events, 3).is_empty());
    assert_eq!(server.stream_state(3), None);
    assert_eq!(
        messages(&events, 1),
        vec![MessageEvent::Data(b"x".to_vec()), MessageEvent::End(None)]
    );
    assert!(!server.is_closed());
}

#[test]
fn test_push_promise_rejected() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.frame(&Frame::new(1, frame_type::PUSH_PROMISE, flags::END_HEADERS, vec![0, 0, 0, 2]));
    let events = server.process(&peer.take());
    assert_eq!(
        events,
        vec![H2Event::ConnectionError {
            error_code: ErrorCode::ProtocolError
        }]
    );
}

#[test]
fn test_client_rejects_server_initiated_stream() {
    let mut client = Client::new(EndpointOptions::default());
    let mut peer = Peer::server();
    client.open();
    client.process(&peer.take());

    let head = MessageHead::response(200);
    peer.headers(2, &head, true);
    let events = client.process(&peer.take());
    assert_eq!(
        events,
        vec![H2Event::ConnectionError {
            error_code: ErrorCode::ProtocolError
        }]
    );
}

#[test]
fn test_continuation_reassembly_keeps_end_stream() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    let block = peer.block(&get("/"));
    let third = block.len() / 3;

    peer.frame(&Frame::new(1, frame_type::HEADERS, flags::END_STREAM, block[..third].to_vec()));
    peer.frame(&Frame::new(1, frame_type::CONTINUATION, 0, block[third..2 * third].to_vec()));
    peer.frame(&Frame::new(
        1,
        frame_type::CONTINUATION,
        flags::END_HEADERS,
        block[2 * third..].to_vec(),
    ));
    let events = server.process(&peer.take());
    assert_eq!(
        messages(&events, 1),
        vec![MessageEvent::Start(get("/")), MessageEvent::End(None)]
    );
    assert_eq!(server.stream_state(1), Some(StreamState::HalfClosedRemote));
}

#[test]
fn test_frame_interleaved_in_header_block() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    let block = peer.block(&get("/"));
    peer.frame(&Frame::new(1, frame_type::HEADERS, flags::END_STREAM, block[..2].to_vec()));
    peer.frame(&Frame::ping([0; 8], false));
    let events = server.process(&peer.take());
    assert_eq!(
        events.last(),
        Some(&H2Event::ConnectionError {
            error_code: ErrorCode::ProtocolError
        })
    );
}

#[test]
fn test_header_block_size_limit() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    // 17 frames of 16KiB: one more than the 256KiB limit allows.
    let fragment = vec![0x82; 16384];
    peer.frame(&Frame::new(1, frame_type::HEADERS, flags::END_STREAM, fragment.clone()));
    for _ in 0..16 {
        peer.frame(&Frame::new(1, frame_type::CONTINUATION, 0, fragment.clone()));
    }
    let events = server.process(&peer.take());
    assert_eq!(
        events.last(),
        Some(&H2Event::ConnectionError {
            error_code: ErrorCode::EnhanceYourCalm
        })
    );
    assert!(server.is_closed());
}

#[test]
fn test_close_ends_every_stream() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &post("/"), false);
    peer.headers(3, &post("/"), false);
    server.process(&peer.take());

    server.close(ErrorCode::InternalError);
    let events = server.take_events();
    assert_eq!(
        messages(&events, 1),
        vec![MessageEvent::StreamEnd(Some(ErrorCode::InternalError))]
    );
    assert_eq!(
        messages(&events, 3),
        vec![MessageEvent::StreamEnd(Some(ErrorCode::InternalError))]
    );
    let goaway = frames(&server.take_output()).pop().unwrap();
    assert_eq!(goaway.decode_goaway(), Ok((3, ErrorCode::InternalError)));
    assert_eq!(server.active_streams(), 0);
}

#[test]
fn test_streams_activate_in_order_under_peer_limit() {
    let mut client = Client::new(EndpointOptions::default());
    let mut server = echo_server(EndpointOptions {
        max_concurrent_streams: Some(1),
        ..EndpointOptions::default()
    });
    drive(&mut client, &mut server);
    assert_eq!(client.endpoint().peer_settings().max_concurrent_streams, Some(1));

    let first = client.stream().unwrap();
    let second = client.stream().unwrap();
    for stream in [&first, &second] {
        client.send(stream, MessageEvent::Start(get("/"))).unwrap();
        client.send(stream, MessageEvent::End(None)).unwrap();
    }
    assert_eq!(client.endpoint().stream_state(second.id()), Some(StreamState::Idle));

    let out = client.take_output();
    let opened: Vec<u32> = frames(&out)
        .iter()
        .filter(|f| f.frame_type == frame_type::HEADERS)
        .map(|f| f.stream_id)
        .collect();
    assert_eq!(opened, vec![first.id()]);

    server.process(&out);
    let events = drive(&mut client, &mut server);
    for id in [first.id(), second.id()] {
        assert_eq!(messages(&events, id).last(), Some(&MessageEvent::StreamEnd(None)));
    }
}

#[test]
fn test_oversized_data_resets_only_its_stream() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &post("/"), false);
    peer.headers(3, &post("/"), false);
    server.process(&peer.take());
    server.take_output();

    peer.data(1, &[0; 16385], false);
    peer.data(3, b"ok", false);
    let events = server.process(&peer.take());
    assert_eq!(
        events,
        vec![
            H2Event::Message {
                stream_id: 1,
                event: MessageEvent::StreamEnd(Some(ErrorCode::FrameSizeError)),
            },
            H2Event::Message {
                stream_id: 3,
                event: MessageEvent::Data(b"ok".to_vec()),
            },
        ]
    );
    assert!(!server.is_closed());
    assert_eq!(server.stream_state(3), Some(StreamState::Open));
    // The skipped payload still counts against the connection.
    assert_eq!(server.recv_window().available(), 0x100000 - 16387);

    let resets: Vec<(u32, ErrorCode)> = frames(&server.take_output())
        .iter()
        .filter(|f| f.frame_type == frame_type::RST_STREAM)
        .map(|f| (f.stream_id, f.decode_rst_stream().unwrap()))
        .collect();
    assert_eq!(resets, vec![(1, ErrorCode::FrameSizeError)]);
}

#[test]
fn test_oversized_headers_is_connection_error() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.frame(&Frame::new(1, frame_type::HEADERS, flags::END_HEADERS, vec![0x82; 16385]));
    let events = server.process(&peer.take());
    assert_eq!(
        events,
        vec![H2Event::ConnectionError {
            error_code: ErrorCode::FrameSizeError
        }]
    );
    assert!(server.is_closed());
}

#[test]
fn test_goaway_reports_last_processed_stream() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &post("/"), false);
    server.process(&peer.take());
    server.go_away();
    server.take_output();

    // Opened after our GOAWAY: ignored, and never reported as processed.
    peer.headers(3, &post("/"), false);
    peer.data(3, b"late", false);
    assert!(server.process(&peer.take()).is_empty());
    assert!(frames(&server.take_output()).is_empty());
    assert_eq!(server.last_peer_stream_id(), 3);

    server.close(ErrorCode::InternalError);
    let goaway = frames(&server.take_output()).pop().unwrap();
    assert_eq!(goaway.decode_goaway(), Ok((1, ErrorCode::InternalError)));
}
