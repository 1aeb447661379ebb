//! Tests for flow-control accounting on a live connection

use h2_mux::{
    frame_type, settings_id, EndpointOptions, ErrorCode, Frame, H2Event, MessageEvent, MessageHead, StreamState,
};

use super::{frames, get, messages, post, server_endpoint};

fn data_sent(out: &[u8]) -> usize {
    frames(out)
        .iter()
        .filter(|f| f.frame_type == frame_type::DATA)
        .map(|f| f.payload.len())
        .sum()
}

#[test]
fn test_send_windows_move_by_exact_amounts() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &get("/"), true);
    server.process(&peer.take());

    let connection_before = server.send_window().size();
    server.send(1, MessageEvent::Start(MessageHead::response(200))).unwrap();
    server.send(1, MessageEvent::Data(vec![7; 1000])).unwrap();
    assert_eq!(server.send_window().size(), connection_before - 1000);
    assert_eq!(server.stream(1).unwrap().send_window().size(), 65535 - 1000);

    peer.frame(&Frame::window_update(1, 500));
    peer.frame(&Frame::window_update(0, 700));
    server.process(&peer.take());
    assert_eq!(server.send_window().size(), connection_before - 1000 + 700);
    assert_eq!(server.stream(1).unwrap().send_window().size(), 65535 - 1000 + 500);
}

#[test]
fn test_data_waits_for_credit() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &get("/"), true);
    server.process(&peer.take());
    server.take_output();

    server.send(1, MessageEvent::Start(MessageHead::response(200))).unwrap();
    server.send(1, MessageEvent::Data(vec![1; 100_000])).unwrap();
    server.send(1, MessageEvent::End(None)).unwrap();

    let out = server.take_output();
    assert_eq!(data_sent(&out), 65535);
    assert!(frames(&out).iter().all(|f| f.payload.len() <= 16384));
    assert_eq!(server.stream(1).unwrap().buffered(), 100_000 - 65535);
    assert_eq!(server.send_window().size(), 0);

    peer.frame(&Frame::window_update(0, 50_000));
    peer.frame(&Frame::window_update(1, 50_000));
    let events = server.process(&peer.take());
    let out = server.take_output();
    assert_eq!(data_sent(&out), 100_000 - 65535);
    assert!(frames(&out).last().unwrap().is_end_stream());
    assert_eq!(server.stream_state(1), None);
    assert_eq!(messages(&events, 1), vec![MessageEvent::StreamEnd(None)]);
}

#[test]
fn test_connection_window_overflow() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.frame(&Frame::window_update(0, 0x7fff_ffff));
    let events = server.process(&peer.take());
    assert_eq!(
        events,
        vec![H2Event::ConnectionError {
            error_code: ErrorCode::FlowControlError
        }]
    );
    let goaway = frames(&server.take_output()).pop().unwrap();
    assert_eq!(goaway.decode_goaway(), Ok((0, ErrorCode::FlowControlError)));
}

#[test]
fn test_stream_window_overflow() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &post("/"), false);
    server.process(&peer.take());
    server.take_output();

    peer.frame(&Frame::window_update(1, 0x7fff_ffff));
    let events = server.process(&peer.take());
    assert_eq!(
        events,
        vec![H2Event::Message {
            stream_id: 1,
            event: MessageEvent::StreamEnd(Some(ErrorCode::FlowControlError)),
        }]
    );
    let rst = frames(&server.take_output()).pop().unwrap();
    assert_eq!(rst.frame_type, frame_type::RST_STREAM);
    assert_eq!(rst.decode_rst_stream(), Ok(ErrorCode::FlowControlError));
    assert!(!server.is_closed());
}

#[test]
fn test_initial_window_change_can_go_negative() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &get("/"), true);
    server.process(&peer.take());

    server.send(1, MessageEvent::Start(MessageHead::response(200))).unwrap();
    server.send(1, MessageEvent::Data(vec![0; 60_000])).unwrap();
    assert_eq!(server.stream(1).unwrap().send_window().size(), 5535);

    peer.settings(&[(settings_id::INITIAL_WINDOW_SIZE, 1000)]);
    server.process(&peer.take());
    assert_eq!(server.stream(1).unwrap().send_window().size(), -59000);
    server.take_output();

    server.send(1, MessageEvent::Data(vec![0; 10])).unwrap();
    assert_eq!(server.stream(1).unwrap().buffered(), 10);
    assert_eq!(data_sent(&server.take_output()), 0);

    peer.frame(&Frame::window_update(1, 60_000));
    server.process(&peer.take());
    assert_eq!(data_sent(&server.take_output()), 10);
    assert_eq!(server.stream(1).unwrap().send_window().size(), 990);
}

#[test]
fn test_receive_credit_returned_at_half_window() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &post("/"), false);
    server.process(&peer.take());
    server.take_output();

    let chunk = vec![3; 16384];
    let mut sent = 0;
    while sent + chunk.len() <= 600_000 {
        peer.data(1, &chunk, false);
        sent += chunk.len();
    }
    peer.data(1, &vec![3; 600_000 - sent], false);
    server.process(&peer.take());

    let updates: Vec<(u32, u32)> = frames(&server.take_output())
        .iter()
        .filter(|f| f.frame_type == frame_type::WINDOW_UPDATE)
        .map(|f| (f.stream_id, f.decode_window_update().unwrap()))
        .collect();
    assert_eq!(updates, vec![(0, 600_000), (1, 600_000)]);
    assert_eq!(server.recv_window().available(), 0x100000);
}

#[test]
fn test_stream_receive_window_overrun() {
    let options = EndpointOptions {
        connection_window_size: 0x200000,
        stream_window_size: 65535,
        ..EndpointOptions::default()
    };
    let (mut server, mut peer) = server_endpoint(options);
    peer.headers(1, &post("/"), false);
    for _ in 0..4 {
        peer.data(1, &[0; 16384], false);
    }
    let events = server.process(&peer.take());

    let stream = messages(&events, 1);
    assert_eq!(stream.len(), 5);
    assert_eq!(stream[4], MessageEvent::StreamEnd(Some(ErrorCode::FlowControlError)));
    assert_eq!(server.stream_state(1), None);
    assert!(!server.is_closed());
}

#[test]
fn test_window_update_on_half_closed_stream() {
    let (mut server, mut peer) = server_endpoint(EndpointOptions::default());
    peer.headers(1, &get("/"), true);
    server.process(&peer.take());
    assert_eq!(server.stream_state(1), Some(StreamState::HalfClosedRemote));

    peer.frame(&Frame::window_update(1, 100));
    assert!(server.process(&peer.take()).is_empty());
    assert_eq!(server.stream(1).unwrap().send_window().size(), 65635);
}
