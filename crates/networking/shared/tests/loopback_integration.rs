//! Integration test for the loopback backend.
//!
//! Verifies that several peers attached to one network can exchange datagrams
//! and share lobbies in the same process with zero network I/O.

use bytes::Bytes;
use shared::steam::{connect_lobby_string, RICH_PRESENCE_CONNECT};
use shared::transport::LoopbackNetwork;
use shared::{LobbyService, LobbySignal, LobbyVisibility, MemberChange, P2pSubstrate, PeerId, SubstrateSignal};

const HOST: PeerId = PeerId::new(76561198000000001);
const GUEST: PeerId = PeerId::new(76561198000000002);

#[test_log::test]
fn test_loopback_datagrams_between_peers() {
    let network = LoopbackNetwork::new();
    let (mut host, _) = network.attach(HOST, "Host").unwrap();
    let (mut guest, _) = network.attach(GUEST, "Guest").unwrap();

    // Guest opens the session with the handshake byte
    assert!(guest.send_datagram(HOST, &[0]));

    let mut signals = Vec::new();
    host.poll_signals(&mut signals);
    assert_eq!(signals, vec![SubstrateSignal::SessionRequested(GUEST)]);
    host.accept_session(GUEST);

    assert_eq!(host.poll_datagram(), Some((GUEST, Bytes::from_static(&[0]))));

    // Host replies
    assert!(host.send_datagram(GUEST, b"Host Hello"));
    let mut signals = Vec::new();
    guest.poll_signals(&mut signals);
    assert!(
        signals.is_empty(),
        "guest already holds a session with the host"
    );
    assert_eq!(
        guest.poll_datagram(),
        Some((HOST, Bytes::from_static(b"Host Hello")))
    );
    assert_eq!(guest.poll_datagram(), None);
}

#[test_log::test]
fn test_loopback_disconnect_drops_sessions_and_membership() {
    let network = LoopbackNetwork::new();
    let (mut host, mut host_lobby) = network.attach(HOST, "Host").unwrap();
    let (mut guest, mut guest_lobby) = network.attach(GUEST, "Guest").unwrap();

    host_lobby.create_lobby(LobbyVisibility::FriendsOnly, 2);
    let lobby = network.lobby_of(HOST).unwrap();
    guest_lobby.join_lobby(lobby);
    guest.send_datagram(HOST, &[0]);
    host.accept_session(GUEST);

    let mut drained = Vec::new();
    host_lobby.poll_signals(&mut drained);
    host.poll_signals(&mut Vec::new());

    network.disconnect(GUEST);

    let mut signals = Vec::new();
    host.poll_signals(&mut signals);
    assert_eq!(signals, vec![SubstrateSignal::SessionDropped(GUEST)]);

    let mut lobby_signals = Vec::new();
    host_lobby.poll_signals(&mut lobby_signals);
    assert_eq!(
        lobby_signals,
        vec![LobbySignal::MembershipChanged {
            lobby,
            member: GUEST,
            change: MemberChange::Left,
        }]
    );
    assert_eq!(network.lobby_members(lobby), vec![HOST]);
    assert!(!guest_lobby.is_available());
}

#[test_log::test]
fn test_loopback_rich_presence_join() {
    let network = LoopbackNetwork::new();
    let (_, mut host_lobby) = network.attach(HOST, "Host").unwrap();
    let (_, mut guest_lobby) = network.attach(GUEST, "Guest").unwrap();

    assert!(!network.join_via_rich_presence(GUEST, HOST));

    host_lobby.create_lobby(LobbyVisibility::FriendsOnly, 2);
    let lobby = network.lobby_of(HOST).unwrap();
    assert!(host_lobby.set_rich_presence(RICH_PRESENCE_CONNECT, Some(&connect_lobby_string(lobby))));

    assert!(network.join_via_rich_presence(GUEST, HOST));
    let mut signals = Vec::new();
    guest_lobby.poll_signals(&mut signals);
    assert_eq!(
        signals,
        vec![LobbySignal::RichPresenceJoin {
            friend: HOST,
            connect: connect_lobby_string(lobby),
        }]
    );
    assert_eq!(guest_lobby.persona_name(HOST), "Host");
}
