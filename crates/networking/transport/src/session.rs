use std::collections::HashSet;

use shared::{
    steam::{is_handshake, HANDSHAKE_DATAGRAM, MAX_STEAM_PACKET_SIZE},
    ConnId, LocalConnectionState, P2pSubstrate, PeerId, RemoteConnectionState, SessionConfig,
    Side, SubstrateSignal, TransportEvent,
};
use tracing::{debug, info, trace, warn};

use crate::{ConnectionTable, TransportError};

const TRANSPORT_TARGET: &str = "p2p::transport";

/// Target of [`SessionTransport::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// A connection of the hosting side.
    Conn(ConnId),
    /// The remembered host of the client side.
    Host,
}

/// Session layer for one local peer.
///
/// At most one side is active at a time. Events are buffered internally and
/// handed out through [`SessionTransport::drain_events`].
#[derive(Debug)]
pub struct SessionTransport<S: P2pSubstrate> {
    substrate: S,
    active: Option<Side>,
    host_state: LocalConnectionState,
    client_state: LocalConnectionState,
    table: ConnectionTable,
    /// Connections that have not delivered a datagram yet. Only their first
    /// datagram can be the handshake.
    awaiting_handshake: HashSet<ConnId>,
    host_peer: Option<PeerId>,
    max_connections: Option<usize>,
    events: Vec<TransportEvent>,
    signals: Vec<SubstrateSignal>,
}

impl<S: P2pSubstrate> SessionTransport<S> {
    pub fn new(substrate: S) -> Self {
        Self {
            substrate,
            active: None,
            host_state: LocalConnectionState::Stopped,
            client_state: LocalConnectionState::Stopped,
            table: ConnectionTable::new(),
            awaiting_handshake: HashSet::new(),
            host_peer: None,
            max_connections: None,
            events: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn from_config(substrate: S, config: &SessionConfig) -> Self {
        Self::new(substrate).with_max_connections(config.max_connections)
    }

    pub fn with_max_connections(mut self, limit: Option<usize>) -> Self {
        self.max_connections = limit;
        self
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    pub fn substrate_mut(&mut self) -> &mut S {
        &mut self.substrate
    }

    pub fn active_side(&self) -> Option<Side> {
        self.active
    }

    pub fn local_state(&self, side: Side) -> LocalConnectionState {
        match side {
            Side::Host => self.host_state,
            Side::Client => self.client_state,
        }
    }

    pub fn connection_state(&self, conn: ConnId) -> RemoteConnectionState {
        if self.table.contains(conn) {
            RemoteConnectionState::Started
        } else {
            RemoteConnectionState::Stopped
        }
    }

    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    pub fn connections(&self) -> impl Iterator<Item = (ConnId, PeerId)> + '_ {
        self.table.iter()
    }

    pub fn conn_for_peer(&self, peer: PeerId) -> Option<ConnId> {
        self.table.conn_for(peer)
    }

    /// Host identity the client side is talking to.
    pub fn host_peer(&self) -> Option<PeerId> {
        self.host_peer
    }

    /// Stable debug string of the peer behind `conn`; empty when unknown.
    pub fn connection_address(&self, conn: ConnId) -> String {
        self.table
            .peer_for(conn)
            .map(|peer| peer.to_string())
            .unwrap_or_default()
    }

    pub const fn mtu(&self) -> usize {
        MAX_STEAM_PACKET_SIZE
    }

    /// Marks the transport active for `side`.
    ///
    /// Starting the already active side again is a no-op.
    pub fn start(&mut self, side: Side) -> Result<(), TransportError> {
        match self.active {
            Some(active) if active == side => {
                debug!(target: TRANSPORT_TARGET, "transport already started as {side:?}");
                return Ok(());
            }
            Some(active) => {
                return Err(TransportError::AlreadyStarted {
                    active,
                    requested: side,
                });
            }
            None => {}
        }

        self.active = Some(side);
        match side {
            Side::Host => {
                self.set_local_state(Side::Host, LocalConnectionState::Starting);
                self.set_local_state(Side::Host, LocalConnectionState::Started);
                info!(target: TRANSPORT_TARGET, "hosting, waiting for session requests");
            }
            Side::Client => {
                self.set_local_state(Side::Client, LocalConnectionState::Starting);
            }
        }
        Ok(())
    }

    /// Opens the client session by sending the handshake datagram to `host`.
    ///
    /// The client counts as started as soon as the substrate takes the
    /// datagram; nothing waits for the host to answer.
    pub fn connect(&mut self, host: PeerId) -> Result<(), TransportError> {
        match self.active {
            Some(Side::Host) => {
                return Err(TransportError::AlreadyStarted {
                    active: Side::Host,
                    requested: Side::Client,
                });
            }
            Some(Side::Client) => {}
            None => self.start(Side::Client)?,
        }

        if let Some(previous) = self.host_peer.filter(|previous| *previous != host) {
            debug!(target: TRANSPORT_TARGET, "replacing host {previous} with {host}");
            self.substrate.close_session(previous);
        }

        self.host_peer = Some(host);
        if !self.substrate.send_datagram(host, &HANDSHAKE_DATAGRAM) {
            warn!(target: TRANSPORT_TARGET, "handshake to host {host} was refused");
            self.host_peer = None;
            return Err(TransportError::ConnectSendFailed(host));
        }

        self.substrate.accept_session(host);
        self.set_local_state(Side::Client, LocalConnectionState::Started);
        info!(target: TRANSPORT_TARGET, "connected to host {host}");
        Ok(())
    }

    /// Reacts to a remote session request.
    ///
    /// The substrate session is always accepted; a connection is bound only
    /// while hosting.
    pub fn accept_inbound_session(&mut self, peer: PeerId) {
        self.substrate.accept_session(peer);
        if self.active != Some(Side::Host) {
            debug!(target: TRANSPORT_TARGET, "session request from {peer} while not hosting");
            return;
        }
        self.ensure_connection(peer);
    }

    /// Returns the peer's connection, binding a new one if needed.
    ///
    /// Both the explicit session request and the first datagram of an unknown
    /// peer go through here. `None` means the connection limit was reached.
    fn ensure_connection(&mut self, peer: PeerId) -> Option<ConnId> {
        if let Some(conn) = self.table.conn_for(peer) {
            debug!(
                target: TRANSPORT_TARGET,
                "duplicate session request from {peer} (conn {conn})"
            );
            return Some(conn);
        }

        if let Some(limit) = self.max_connections {
            if self.table.len() >= limit {
                warn!(
                    target: TRANSPORT_TARGET,
                    "refusing connection for {peer}: limit of {limit} reached"
                );
                return None;
            }
        }

        let (conn, _) = self.table.get_or_insert(peer);
        self.awaiting_handshake.insert(conn);
        self.substrate.accept_session(peer);
        info!(target: TRANSPORT_TARGET, "peer {peer} connected as conn {conn}");
        self.events.push(TransportEvent::RemoteConnectionStateChanged {
            conn,
            state: RemoteConnectionState::Started,
        });
        Some(conn)
    }

    /// Drains and handles the substrate's pending signals.
    pub fn pump_signals(&mut self) {
        let mut signals = std::mem::take(&mut self.signals);
        self.substrate.poll_signals(&mut signals);

        for signal in signals.drain(..) {
            match signal {
                SubstrateSignal::SessionRequested(peer) => self.accept_inbound_session(peer),
                SubstrateSignal::SessionConnectFailed { peer, reason } => {
                    warn!(target: TRANSPORT_TARGET, "session with {peer} failed: {reason}");
                }
                SubstrateSignal::SessionDropped(peer) => self.handle_session_dropped(peer),
            }
        }

        self.signals = signals;
    }

    fn handle_session_dropped(&mut self, peer: PeerId) {
        if let Some(conn) = self.table.conn_for(peer) {
            self.table.remove(conn);
            self.awaiting_handshake.remove(&conn);
            info!(target: TRANSPORT_TARGET, "session with {peer} dropped (conn {conn})");
            self.events.push(TransportEvent::RemoteConnectionStateChanged {
                conn,
                state: RemoteConnectionState::Stopped,
            });
            return;
        }

        if self.active == Some(Side::Client) && self.host_peer == Some(peer) {
            info!(target: TRANSPORT_TARGET, "session with host {peer} dropped");
            self.host_peer = None;
            self.active = None;
            self.set_local_state(Side::Client, LocalConnectionState::Stopped);
        }
    }

    /// Drains every buffered datagram without waiting and returns how many
    /// were delivered as [`TransportEvent::DataReceived`].
    pub fn poll_inbound(&mut self) -> usize {
        let mut delivered = 0;

        while let Some((peer, payload)) = self.substrate.poll_datagram() {
            match self.active {
                None => {
                    trace!(target: TRANSPORT_TARGET, "discarding datagram from {peer} while inactive");
                }
                Some(Side::Host) => {
                    let conn = match self.table.conn_for(peer) {
                        Some(conn) => conn,
                        None => match self.ensure_connection(peer) {
                            Some(conn) => conn,
                            None => {
                                warn!(
                                    target: TRANSPORT_TARGET,
                                    "dropping datagram from unroutable peer {peer}"
                                );
                                continue;
                            }
                        },
                    };
                    let first = self.awaiting_handshake.remove(&conn);
                    if first && is_handshake(&payload) {
                        trace!(target: TRANSPORT_TARGET, "handshake from {peer} (conn {conn})");
                        continue;
                    }
                    self.events.push(TransportEvent::DataReceived {
                        conn: Some(conn),
                        payload,
                    });
                    delivered += 1;
                }
                Some(Side::Client) => {
                    if self.host_peer != Some(peer) {
                        debug!(target: TRANSPORT_TARGET, "dropping datagram from non-host peer {peer}");
                        continue;
                    }
                    self.events.push(TransportEvent::DataReceived {
                        conn: None,
                        payload,
                    });
                    delivered += 1;
                }
            }
        }

        delivered
    }

    /// Sends one datagram. Returns `false` when it was dropped.
    pub fn send(&mut self, destination: Destination, payload: &[u8]) -> bool {
        let peer = match destination {
            Destination::Conn(conn) => {
                if self.active != Some(Side::Host) {
                    return false;
                }
                match self.table.peer_for(conn) {
                    Some(peer) => peer,
                    None => {
                        debug!(target: TRANSPORT_TARGET, "send to unknown conn {conn} dropped");
                        return false;
                    }
                }
            }
            Destination::Host => {
                if self.active != Some(Side::Client)
                    || self.client_state != LocalConnectionState::Started
                {
                    return false;
                }
                match self.host_peer {
                    Some(peer) => peer,
                    None => return false,
                }
            }
        };

        if payload.len() > MAX_STEAM_PACKET_SIZE {
            warn!(
                target: TRANSPORT_TARGET,
                "datagram of {} bytes to {peer} exceeds mtu {MAX_STEAM_PACKET_SIZE}",
                payload.len()
            );
            return false;
        }

        let sent = self.substrate.send_datagram(peer, payload);
        if !sent {
            warn!(target: TRANSPORT_TARGET, "failed to send datagram to {peer}");
        }
        sent
    }

    /// Closes one host-side connection.
    pub fn close(&mut self, conn: ConnId) -> Result<(), TransportError> {
        let peer = self
            .table
            .remove(conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        self.awaiting_handshake.remove(&conn);
        self.substrate.close_session(peer);
        info!(target: TRANSPORT_TARGET, "closed conn {conn} ({peer})");
        self.events.push(TransportEvent::RemoteConnectionStateChanged {
            conn,
            state: RemoteConnectionState::Stopped,
        });
        Ok(())
    }

    /// Tears down one side completely.
    ///
    /// Stopping the host closes every connection and rewinds the ConnId
    /// counter without a per-connection `Stopped` event; only the local state
    /// change is reported.
    pub fn stop_all(&mut self, side: Side) {
        match side {
            Side::Host => {
                for (conn, peer) in self.table.drain() {
                    debug!(target: TRANSPORT_TARGET, "closing conn {conn} ({peer})");
                    self.substrate.close_session(peer);
                }
                self.awaiting_handshake.clear();
            }
            Side::Client => {
                if let Some(host) = self.host_peer.take() {
                    self.substrate.close_session(host);
                }
            }
        }

        if self.active == Some(side) {
            self.active = None;
            info!(target: TRANSPORT_TARGET, "stopped {side:?} side");
        }
        self.set_local_state(side, LocalConnectionState::Stopped);
    }

    /// Stops both sides.
    pub fn stop(&mut self) {
        self.stop_all(Side::Host);
        self.stop_all(Side::Client);
    }

    pub fn drain_events(&mut self, output: &mut Vec<TransportEvent>) {
        output.append(&mut self.events);
    }

    fn set_local_state(&mut self, side: Side, state: LocalConnectionState) {
        let current = match side {
            Side::Host => &mut self.host_state,
            Side::Client => &mut self.client_state,
        };
        if *current == state {
            return;
        }
        *current = state;
        self.events
            .push(TransportEvent::LocalConnectionStateChanged { side, state });
    }
}

impl<S: P2pSubstrate> Drop for SessionTransport<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
