//! Inbound parsing and outbound routing over loopback sockets
//!
//! Usage:
//!   cargo test --test routing

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use common::{decode_notice, Harness};
use herald::core::{ClientId, NetworkId, RpcId};
use herald::network::ConnectionConfig;
use herald::protocol::{ByteSpan, FrameBuffer, Message, Notice, Payload, RpcArgument};
use herald::{Connection, Hooks};

const MOVE: RpcId = RpcId::from_raw(12);

fn envelope(rpc: RpcId, target: NetworkId, args: Vec<RpcArgument>) -> Vec<u8> {
    let mut buffer = FrameBuffer::new(512);
    Message::broadcast(ClientId::none(), rpc, target, args)
        .encode_into(&mut buffer)
        .unwrap();
    buffer.as_bytes().to_vec()
}

fn decode(frame: &[u8], ids: &herald::Identities) -> Message {
    Message::decode(ClientId::none(), ByteSpan::from_slice(frame).unwrap(), ids).unwrap()
}

#[test]
fn test_inbound_frames_reach_the_queue() {
    let mut h = Harness::new(4);
    let (mut a, id_a) = h.join();

    let first = envelope(MOVE, NetworkId::from_raw(5), vec![7u32.into()]);
    let second = envelope(MOVE, NetworkId::from_raw(6), vec!["hi".into()]);
    let mut stream = first.clone();
    stream.extend_from_slice(&second);
    a.send_raw(&stream);

    assert!(h.tick_until(|h| h.inbound.len() == 2));
    let got = h.inbound.drain();
    assert_eq!(got[0].caller, id_a);
    assert!(got[0].callee.is_none());
    assert_eq!(got[0].rpc, MOVE);
    assert_eq!(got[0].target, NetworkId::from_raw(5));
    assert_eq!(got[0].payload, Payload::Encoded(vec![7, 0, 0, 0]));
    assert_eq!(got[1].target, NetworkId::from_raw(6));
    assert_eq!(got[1].payload, Payload::Encoded(vec![2, 0, b'h', b'i']));
    assert_eq!(h.stats.snapshot().messages_received, 2);
}

#[test]
fn test_frame_split_across_writes() {
    let mut h = Harness::new(4);
    let (mut a, _) = h.join();

    let bytes = envelope(MOVE, NetworkId::from_raw(1), vec![1u64.into()]);
    let (head, tail) = bytes.split_at(5);
    a.send_raw(head);
    h.settle();
    assert!(h.inbound.is_empty());

    a.send_raw(tail);
    assert!(h.tick_until(|h| h.inbound.len() == 1));
}

#[test]
fn test_malformed_frame_drops_only_sender() {
    let mut h = Harness::new(4);
    let (mut a, id_a) = h.join();
    let (mut b, id_b) = h.join();
    h.notices(&mut a, 1);

    a.send_raw(&[0, 0, 1, 2, 3]);
    assert!(h.wait_closed(&mut a));
    assert_eq!(h.notices(&mut b, 1), vec![Notice::ClientDisconnected(id_a)]);
    assert!(h.server.is_connected(id_b));
    assert_eq!(h.stats.snapshot().protocol_errors, 1);
}

#[test]
fn test_truncated_envelope_drops_sender() {
    let mut h = Harness::new(4);
    let (mut a, id_a) = h.join();

    a.send_frame(&[12, 0, 1]);
    assert!(h.wait_closed(&mut a));
    assert!(!h.server.is_connected(id_a));
    assert!(h.inbound.is_empty());
}

#[test]
fn test_unicast_reaches_only_callee() {
    let mut h = Harness::new(4);
    let (mut a, _) = h.join();
    let (mut b, id_b) = h.join();
    h.notices(&mut a, 1);

    h.outbound.enqueue(Message::new(
        ClientId::none(),
        id_b,
        MOVE,
        NetworkId::from_raw(3),
        vec![2.5f32.into()],
    ));

    let frames = h.frames(&mut b, 1);
    let ids = herald::Identities::new();
    let msg = decode(&frames[0], &ids);
    assert_eq!(msg.rpc, MOVE);
    assert_eq!(msg.target, NetworkId::from_raw(3));
    assert_eq!(msg.payload, Payload::Encoded(2.5f32.to_le_bytes().to_vec()));

    h.settle();
    assert!(a.poll_frames().is_empty());
    assert_eq!(h.stats.snapshot().messages_routed, 1);
}

#[test]
fn test_unknown_callee_is_dropped() {
    let mut h = Harness::new(4);
    let (mut a, _) = h.join();

    h.outbound.enqueue(Message::new(
        ClientId::none(),
        ClientId::from_raw(999),
        MOVE,
        NetworkId::none(),
        vec![],
    ));
    h.settle();

    assert!(a.poll_frames().is_empty());
    assert!(h.outbound.is_empty());
    let stats = h.stats.snapshot();
    assert_eq!(stats.messages_dropped, 1);
    assert_eq!(stats.messages_routed, 0);
}

#[test]
fn test_broadcast_reaches_everyone() {
    let mut h = Harness::new(4);
    let (mut a, _) = h.join();
    let (mut b, _) = h.join();
    h.notices(&mut a, 1);

    h.outbound.enqueue(Message::broadcast(
        ClientId::none(),
        MOVE,
        NetworkId::from_raw(4),
        vec![1u8.into()],
    ));

    let expected = envelope(MOVE, NetworkId::from_raw(4), vec![1u8.into()]);
    assert_eq!(h.frames(&mut a, 1)[0], expected[2..]);
    assert_eq!(h.frames(&mut b, 1)[0], expected[2..]);
}

#[test]
fn test_spawn_ignores_callee_and_broadcasts() {
    let mut h = Harness::new(4);
    let (mut a, id_a) = h.join();
    let (mut b, _) = h.join();
    h.notices(&mut a, 1);

    h.outbound.enqueue(Message::new(
        ClientId::none(),
        id_a,
        RpcId::OBJECT_SPAWN,
        NetworkId::from_raw(40),
        vec![],
    ));

    let ids = herald::Identities::new();
    for client in [&mut a, &mut b] {
        let frames = h.frames(client, 1);
        let msg = decode(&frames[0], &ids);
        assert_eq!(msg.rpc, RpcId::OBJECT_SPAWN);
        assert_eq!(msg.target, NetworkId::from_raw(40));
    }
}

#[test]
fn test_messages_queued_in_one_tick_share_a_flush() {
    let mut h = Harness::new(4);
    let (mut a, _) = h.join();

    for target in 1..=3 {
        h.outbound.enqueue(Message::broadcast(
            ClientId::none(),
            MOVE,
            NetworkId::from_raw(target),
            vec![],
        ));
    }

    let ids = herald::Identities::new();
    let targets: Vec<u32> = h
        .frames(&mut a, 3)
        .iter()
        .map(|frame| decode(frame, &ids).target.get())
        .collect();
    assert_eq!(targets, vec![1, 2, 3]);
}

/// Read one length-prefixed frame from a blocking socket.
fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut prefix = [0u8; 2];
    stream.read_exact(&mut prefix).unwrap();
    let mut payload = vec![0u8; u16::from_le_bytes(prefix) as usize];
    stream.read_exact(&mut payload).unwrap();
    payload
}

#[test]
fn test_threaded_connection_round_trip() {
    common::init_logging();
    let config = ConnectionConfig::ephemeral().threaded(Duration::from_millis(2));
    let mut conn = Connection::new(config, Hooks::new()).unwrap();

    let mut stream = TcpStream::connect(conn.local_addr()).unwrap();
    stream.set_read_timeout(Some(common::DEADLINE)).unwrap();
    let id = match decode_notice(&read_frame(&mut stream)) {
        Notice::LocalClientConnected(id) => id,
        other => panic!("unexpected {:?}", other),
    };

    conn.add_message(Message::broadcast(
        conn.local_id(),
        MOVE,
        NetworkId::from_raw(2),
        vec!["ping".into()],
    ));
    let reply = read_frame(&mut stream);
    let msg = decode(&reply, conn.identities());
    assert_eq!(msg.payload, Payload::Encoded(vec![4, 0, b'p', b'i', b'n', b'g']));

    stream
        .write_all(&envelope(MOVE, NetworkId::from_raw(9), vec![5u16.into()]))
        .unwrap();
    let deadline = Instant::now() + common::DEADLINE;
    let inbound = loop {
        if let Some(msg) = conn.next_message() {
            break msg;
        }
        assert!(Instant::now() < deadline, "no inbound message");
        std::thread::sleep(Duration::from_millis(2));
    };
    assert_eq!(inbound.caller, id);
    assert_eq!(inbound.target, NetworkId::from_raw(9));

    assert!(conn.kick(id));
    let mut rest = Vec::new();
    assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);

    conn.disconnect().unwrap();
    assert!(!conn.is_active());
}
