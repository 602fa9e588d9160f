//! Session transport driven over the loopback backend.

use bytes::Bytes;
use pretty_assertions::assert_eq;
use session_transport::{Destination, SessionTransport, TransportError};
use shared::transport::{LoopbackNetwork, LoopbackSubstrate};
use shared::{
    ConnId, LocalConnectionState, PeerId, RemoteConnectionState, Side, TransportEvent,
};

const HOST: PeerId = PeerId::new(76561198000000001);
const GUEST: PeerId = PeerId::new(76561198000000002);
const THIRD: PeerId = PeerId::new(76561198000000003);

type Transport = SessionTransport<LoopbackSubstrate>;

fn endpoint(network: &LoopbackNetwork, peer: PeerId) -> Transport {
    let (substrate, _) = network.attach(peer, peer.to_string()).unwrap();
    SessionTransport::new(substrate)
}

fn tick(transport: &mut Transport) -> Vec<TransportEvent> {
    transport.pump_signals();
    transport.poll_inbound();
    let mut out = Vec::new();
    transport.drain_events(&mut out);
    out
}

fn started(conn: u32) -> TransportEvent {
    TransportEvent::RemoteConnectionStateChanged {
        conn: ConnId::new(conn),
        state: RemoteConnectionState::Started,
    }
}

fn stopped(conn: u32) -> TransportEvent {
    TransportEvent::RemoteConnectionStateChanged {
        conn: ConnId::new(conn),
        state: RemoteConnectionState::Stopped,
    }
}

fn remote_events(events: &[TransportEvent]) -> Vec<TransportEvent> {
    events
        .iter()
        .filter(|event| matches!(event, TransportEvent::RemoteConnectionStateChanged { .. }))
        .cloned()
        .collect()
}

#[test_log::test]
fn duplicate_session_requests_bind_one_connection() {
    let network = LoopbackNetwork::new();
    let mut host = endpoint(&network, HOST);
    host.start(Side::Host).unwrap();
    tick(&mut host);

    network.request_session(HOST, GUEST);
    network.request_session(HOST, GUEST);
    network.request_session(HOST, GUEST);

    let events = tick(&mut host);
    assert_eq!(remote_events(&events), vec![started(0)]);
    assert_eq!(host.connection_count(), 1);
    assert_eq!(host.conn_for_peer(GUEST), Some(ConnId::new(0)));
    assert_eq!(host.connection_address(ConnId::new(0)), GUEST.to_string());
}

#[test_log::test]
fn client_connect_is_optimistic() {
    let network = LoopbackNetwork::new();
    let _host = endpoint(&network, HOST);
    let mut guest = endpoint(&network, GUEST);

    guest.connect(HOST).unwrap();

    let events = tick(&mut guest);
    assert!(events.contains(&TransportEvent::LocalConnectionStateChanged {
        side: Side::Client,
        state: LocalConnectionState::Started,
    }));
    assert_eq!(guest.local_state(Side::Client), LocalConnectionState::Started);
    assert_eq!(guest.active_side(), Some(Side::Client));
    assert_eq!(guest.host_peer(), Some(HOST));
}

#[test_log::test]
fn refused_handshake_reports_connect_failure() {
    let network = LoopbackNetwork::new();
    let mut guest = endpoint(&network, GUEST);

    assert_eq!(
        guest.connect(HOST),
        Err(TransportError::ConnectSendFailed(HOST))
    );
    let events = tick(&mut guest);
    assert!(!events.contains(&TransportEvent::LocalConnectionStateChanged {
        side: Side::Client,
        state: LocalConnectionState::Started,
    }));
    assert_eq!(guest.host_peer(), None);
    assert!(!guest.send(Destination::Host, b"lost"));
}

#[test_log::test]
fn closing_unknown_connection_leaves_table_untouched() {
    let network = LoopbackNetwork::new();
    let mut host = endpoint(&network, HOST);
    host.start(Side::Host).unwrap();
    network.request_session(HOST, GUEST);
    tick(&mut host);

    assert_eq!(
        host.close(ConnId::new(9)),
        Err(TransportError::UnknownConnection(ConnId::new(9)))
    );
    assert_eq!(host.connection_count(), 1);
    assert_eq!(
        host.connection_state(ConnId::new(0)),
        RemoteConnectionState::Started
    );

    host.close(ConnId::new(0)).unwrap();
    assert_eq!(tick(&mut host), vec![stopped(0)]);
    assert_eq!(
        host.connection_state(ConnId::new(0)),
        RemoteConnectionState::Stopped
    );
}

#[test_log::test]
fn payloads_round_trip_byte_identical() {
    let network = LoopbackNetwork::new();
    let mut host = endpoint(&network, HOST);
    let mut guest = endpoint(&network, GUEST);
    host.start(Side::Host).unwrap();
    guest.connect(HOST).unwrap();
    tick(&mut guest);

    // Handshake binds the connection but is never surfaced as data.
    let events = tick(&mut host);
    assert_eq!(remote_events(&events), vec![started(0)]);
    assert!(!events
        .iter()
        .any(|event| matches!(event, TransportEvent::DataReceived { .. })));

    let upstream: Vec<u8> = (0..=255).collect();
    assert!(guest.send(Destination::Host, &upstream));
    assert_eq!(
        tick(&mut host),
        vec![TransportEvent::DataReceived {
            conn: Some(ConnId::new(0)),
            payload: Bytes::from(upstream),
        }]
    );

    assert!(host.send(Destination::Conn(ConnId::new(0)), b"\x00\x01 from host"));
    assert_eq!(
        tick(&mut guest),
        vec![TransportEvent::DataReceived {
            conn: None,
            payload: Bytes::from_static(b"\x00\x01 from host"),
        }]
    );
}

#[test_log::test]
fn lone_zero_byte_after_handshake_is_delivered() {
    let network = LoopbackNetwork::new();
    let mut host = endpoint(&network, HOST);
    let mut guest = endpoint(&network, GUEST);
    host.start(Side::Host).unwrap();
    guest.connect(HOST).unwrap();
    tick(&mut guest);
    tick(&mut host);

    assert!(guest.send(Destination::Host, &[0]));
    assert!(guest.send(Destination::Host, &[0]));
    let zero = TransportEvent::DataReceived {
        conn: Some(ConnId::new(0)),
        payload: Bytes::from_static(&[0]),
    };
    assert_eq!(tick(&mut host), vec![zero.clone(), zero]);
}

#[test_log::test]
fn first_datagram_binds_connection_implicitly() {
    let network = LoopbackNetwork::new();
    let mut host = endpoint(&network, HOST);
    host.start(Side::Host).unwrap();
    tick(&mut host);

    network.inject_datagram(HOST, GUEST, Bytes::from_static(b"hello"));

    assert_eq!(
        tick(&mut host),
        vec![
            started(0),
            TransportEvent::DataReceived {
                conn: Some(ConnId::new(0)),
                payload: Bytes::from_static(b"hello"),
            },
        ]
    );
}

#[test_log::test]
fn stop_all_rewinds_connection_ids() {
    let network = LoopbackNetwork::new();
    let mut host = endpoint(&network, HOST);
    host.start(Side::Host).unwrap();
    network.request_session(HOST, GUEST);
    network.request_session(HOST, THIRD);
    let cold_start = remote_events(&tick(&mut host));
    assert_eq!(cold_start, vec![started(0), started(1)]);

    host.stop_all(Side::Host);
    let events = tick(&mut host);
    assert_eq!(
        events,
        vec![TransportEvent::LocalConnectionStateChanged {
            side: Side::Host,
            state: LocalConnectionState::Stopped,
        }]
    );
    assert_eq!(host.connection_count(), 0);
    assert!(!host.send(Destination::Conn(ConnId::new(0)), b"gone"));

    host.start(Side::Host).unwrap();
    network.request_session(HOST, GUEST);
    network.request_session(HOST, THIRD);
    assert_eq!(remote_events(&tick(&mut host)), cold_start);
}

#[test_log::test]
fn connection_limit_suppresses_allocation() {
    let network = LoopbackNetwork::new();
    let mut host = endpoint(&network, HOST).with_max_connections(Some(1));
    host.start(Side::Host).unwrap();
    network.request_session(HOST, GUEST);
    network.request_session(HOST, THIRD);
    network.inject_datagram(HOST, THIRD, Bytes::from_static(b"ignored"));

    let events = tick(&mut host);
    assert_eq!(remote_events(&events), vec![started(0)]);
    assert!(!events
        .iter()
        .any(|event| matches!(event, TransportEvent::DataReceived { .. })));
    assert_eq!(host.conn_for_peer(THIRD), None);
}

#[test_log::test]
fn dropped_sessions_surface_as_stopped() {
    let network = LoopbackNetwork::new();
    let mut host = endpoint(&network, HOST);
    let mut guest = endpoint(&network, GUEST);
    host.start(Side::Host).unwrap();
    guest.connect(HOST).unwrap();
    tick(&mut host);
    tick(&mut guest);

    // Host closes the connection: the client side notices its host is gone.
    host.close(ConnId::new(0)).unwrap();
    assert_eq!(tick(&mut host), vec![stopped(0)]);
    assert_eq!(
        tick(&mut guest),
        vec![TransportEvent::LocalConnectionStateChanged {
            side: Side::Client,
            state: LocalConnectionState::Stopped,
        }]
    );
    assert_eq!(guest.active_side(), None);

    // Client reconnects and then disappears: the host sees the conn stop.
    guest.connect(HOST).unwrap();
    assert_eq!(remote_events(&tick(&mut host)), vec![started(1)]);
    network.disconnect(GUEST);
    assert_eq!(tick(&mut host), vec![stopped(1)]);
}

#[test_log::test]
fn client_ignores_datagrams_from_other_peers() {
    let network = LoopbackNetwork::new();
    let _host = endpoint(&network, HOST);
    let mut guest = endpoint(&network, GUEST);
    guest.connect(HOST).unwrap();
    tick(&mut guest);

    network.inject_datagram(GUEST, THIRD, Bytes::from_static(b"spoofed"));
    network.inject_datagram(GUEST, HOST, Bytes::from_static(b"real"));

    assert_eq!(
        tick(&mut guest),
        vec![TransportEvent::DataReceived {
            conn: None,
            payload: Bytes::from_static(b"real"),
        }]
    );
}
