use std::io::Cursor;
use std::time::Duration;

use crate::error::SimError;
use crate::protocol::codec::{MAX_FRAME_BYTES, decode, encode, read_frame, write_frame};
use crate::protocol::{
    ChannelTransport, Decision, Envelope, PROTOCOL_VERSION, ProtocolSession, SimEvent, Transport,
    UnixSocketTransport,
};
use crate::registry::JobId;
use crate::sim::SimTime;

#[test]
fn frames_are_length_prefixed() {
    let mut buf = Vec::new();
    write_frame(&mut buf, b"{}").expect("write");
    write_frame(&mut buf, b"[1]").expect("write");
    assert_eq!(&buf[..4], &2u32.to_le_bytes());

    let mut cursor = Cursor::new(buf);
    assert_eq!(read_frame(&mut cursor).expect("first"), b"{}");
    assert_eq!(read_frame(&mut cursor).expect("second"), b"[1]");
    let eof = read_frame(&mut cursor).expect_err("eof");
    assert_eq!(eof.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[test]
fn zero_and_oversized_frames_are_invalid() {
    let mut cursor = Cursor::new(0u32.to_le_bytes().to_vec());
    assert_eq!(
        read_frame(&mut cursor).expect_err("zero").kind(),
        std::io::ErrorKind::InvalidData
    );
    let too_big = (MAX_FRAME_BYTES as u32 + 1).to_le_bytes().to_vec();
    assert_eq!(
        read_frame(&mut Cursor::new(too_big)).expect_err("big").kind(),
        std::io::ErrorKind::InvalidData
    );
}

#[test]
fn decisions_use_tagged_json() {
    let raw = br#"{"now": 10.0, "events": [
        {"type": "EXECUTE_JOB", "data": {"job_id": "w0!1", "alloc": "0-1"}},
        {"type": "SET_PSTATE", "data": {"machines": "2-3", "pstate": 1}},
        {"type": "CALL_ME_LATER", "data": {"timestamp": 12.5}},
        {"type": "FINISHED"}
    ]}"#;
    let env: Envelope<Decision> = decode(raw).expect("decode");
    assert_eq!(env.now, 10.0);
    assert_eq!(env.events.len(), 4);
    match &env.events[0] {
        Decision::ExecuteJob { job_id, alloc } => {
            assert_eq!(job_id, &JobId::from("w0!1"));
            assert_eq!(alloc.to_string(), "0-1");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(env.events[3], Decision::Finished);

    let empty: Envelope<Decision> = decode(br#"{"now": 0}"#).expect("events default to empty");
    assert!(empty.events.is_empty());
}

#[test]
fn malformed_payloads_are_protocol_errors() {
    let cases: [&[u8]; 3] = [
        b"not json",
        br#"{"now": 1, "events": [{"type": "DANCE"}]}"#,
        br#"{"now": 1, "events": [{"type": "EXECUTE_JOB", "data": {"job_id": "a!b", "alloc": "3-1"}}]}"#,
    ];
    for raw in cases {
        let err = decode::<Decision>(raw).expect_err("malformed");
        assert!(matches!(err, SimError::MalformedMessage(_)), "{err:?}");
        assert_eq!(err.exit_code(), 3);
    }
}

#[test]
fn events_serialize_with_type_and_data() {
    let env = Envelope {
        now: 0.0,
        events: vec![SimEvent::JobKilled {
            job_ids: vec![JobId::from("w!1")],
        }],
    };
    let v: serde_json::Value =
        serde_json::from_slice(&encode(&env).expect("encode")).expect("json");
    assert_eq!(v["events"][0]["type"], "JOB_KILLED");
    assert_eq!(v["events"][0]["data"]["job_ids"][0], "w!1");
}

fn answer(peer: &crate::protocol::ChannelPeer, now: f64, events: Vec<Decision>) {
    peer.send(encode(&Envelope { now, events }).expect("encode"))
        .expect("send");
}

#[test]
fn session_allows_one_outstanding_request() {
    let (transport, peer) = ChannelTransport::pair();
    let mut session = ProtocolSession::new(transport, Duration::from_secs(5));

    session.send(SimTime::from_secs(1), vec![]).expect("send");
    assert!(session.is_pending());
    assert!(matches!(
        session.send(SimTime::from_secs(1), vec![]),
        Err(SimError::RequestPending)
    ));

    peer.recv().expect("request");
    answer(&peer, 1.5, vec![Decision::Finished]);
    let reply = session.wait_reply().expect("reply");
    assert_eq!(reply.at, SimTime(1_500_000_000));
    assert_eq!(reply.decisions, vec![Decision::Finished]);
    assert_eq!(session.messages(), 1);
    assert!(matches!(session.wait_reply(), Err(SimError::NoPendingRequest)));

    // 请求时间不得倒退
    assert!(matches!(
        session.send(SimTime::ZERO, vec![]),
        Err(SimError::BackwardTime { .. })
    ));
}

#[test]
fn session_rejects_replies_in_the_past() {
    let (transport, peer) = ChannelTransport::pair();
    let mut session = ProtocolSession::new(transport, Duration::from_secs(5));
    session.send(SimTime::from_secs(3), vec![]).expect("send");
    peer.recv().expect("request");
    answer(&peer, 2.0, vec![]);
    match session.wait_reply() {
        Err(SimError::BackwardTime { got, min }) => {
            assert_eq!(got, SimTime::from_secs(2));
            assert_eq!(min, SimTime::from_secs(3));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn requests_cannot_precede_the_last_reply() {
    let (transport, peer) = ChannelTransport::pair();
    let mut session = ProtocolSession::new(transport, Duration::from_secs(5));
    session.send(SimTime::ZERO, vec![]).expect("send");
    peer.recv().expect("request");
    answer(&peer, 5.0, vec![]);
    session.wait_reply().expect("reply");
    assert_eq!(session.horizon(), SimTime::from_secs(5));

    match session.send(SimTime::from_secs(3), vec![]) {
        Err(SimError::BackwardTime { got, min }) => {
            assert_eq!(got, SimTime::from_secs(3));
            assert_eq!(min, SimTime::from_secs(5));
        }
        other => panic!("unexpected {other:?}"),
    }
    session.send(SimTime::from_secs(5), vec![]).expect("send at the reply time");
}

#[test]
fn session_times_out_and_detects_disconnects() {
    let (transport, peer) = ChannelTransport::pair();
    let mut session = ProtocolSession::new(transport, Duration::from_millis(20));
    let err = session.request(SimTime::ZERO, vec![]).expect_err("timeout");
    assert!(matches!(err, SimError::ReplyTimeout(_)));
    assert_eq!(err.reason_code(), "PROTOCOL_TIMEOUT");

    drop(peer);
    let (mut transport, peer) = ChannelTransport::pair();
    drop(peer);
    assert!(matches!(transport.send(vec![1]), Err(SimError::Disconnected)));
    assert!(matches!(
        transport.recv(Duration::from_millis(10)),
        Err(SimError::Disconnected)
    ));
}

#[test]
fn unix_socket_gives_up_when_nobody_connects() {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let path = std::env::temp_dir().join(format!("rjmsim-accept-{}-{nanos}.sock", std::process::id()));
    let mut transport =
        UnixSocketTransport::bind(&path, Duration::from_millis(50)).expect("bind");
    assert!(path.exists());

    let started = std::time::Instant::now();
    let err = transport.send(vec![1]).expect_err("no decision-maker");
    assert!(matches!(err, SimError::ConnectTimeout(_)));
    assert_eq!(err.reason_code(), "PROTOCOL_CONNECT_TIMEOUT");
    assert_eq!(err.exit_code(), 3);
    assert!(started.elapsed() < Duration::from_secs(5));

    drop(transport);
    assert!(!path.exists(), "socket file removed on drop");
}

#[test]
fn handshake_returns_remaining_decisions() {
    let (transport, peer) = ChannelTransport::pair();
    let handle = std::thread::spawn(move || {
        let frame = peer.recv().expect("begins");
        let env: Envelope<SimEvent> = decode(&frame).expect("decode");
        answer(
            &peer,
            0.0,
            vec![
                Decision::Hello {
                    protocol_version: PROTOCOL_VERSION.into(),
                },
                Decision::Finished,
            ],
        );
        env
    });
    let mut session = ProtocolSession::new(transport, Duration::from_secs(5));
    let reply = session.handshake(vec![], 4, false).expect("handshake");
    assert_eq!(reply.decisions, vec![Decision::Finished]);

    let begins = handle.join().expect("peer");
    match &begins.events[..] {
        [SimEvent::SimulationBegins { protocol_version, nb_resources, allow_time_sharing, .. }] => {
            assert_eq!(protocol_version, PROTOCOL_VERSION);
            assert_eq!(*nb_resources, 4);
            assert!(!allow_time_sharing);
        }
        other => panic!("unexpected {other:?}"),
    }
}
