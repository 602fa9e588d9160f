use std::time::Instant;

use session_transport::{Destination, SessionTransport};
use shared::{
    steam::{
        connect_lobby_string, parse_connect_lobby, RICH_PRESENCE_CONNECT, RICH_PRESENCE_DISPLAY,
        RICH_PRESENCE_STATUS_WITH_CONNECT, SESSION_CAPACITY,
    },
    EventDispatcher, ListenerId, LobbyId, LobbyService, LobbySignal, MemberChange, P2pSubstrate,
    PeerId, RemoteConnectionState, SessionConfig, Side, TransportEvent,
};
use tracing::{debug, error, info, warn};

use crate::{CoordinatorError, CoordinatorEvent, CoordinatorState, Role, TimerQueue};

const LOBBY_TARGET: &str = "p2p::lobby";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    HostAttempt,
}

/// Keeps the local role in line with lobby ownership and drives the session
/// transport accordingly.
///
/// The coordinator is passive: the owner calls [`MembershipCoordinator::tick`]
/// periodically with the current time. Each tick pumps the lobby service,
/// reacts to its signals, pumps the transport, then fires due timers.
pub struct MembershipCoordinator<S: P2pSubstrate, L: LobbyService> {
    config: SessionConfig,
    transport: SessionTransport<S>,
    lobby: L,
    role: Role,
    state: CoordinatorState,
    current_lobby: Option<LobbyId>,
    joining: Option<LobbyId>,
    pending_create: bool,
    epoch: u64,
    timers: TimerQueue<TimerKind>,
    transport_listeners: EventDispatcher<TransportEvent>,
    coordinator_listeners: EventDispatcher<CoordinatorEvent>,
    lobby_signals: Vec<LobbySignal>,
    transport_events: Vec<TransportEvent>,
}

impl<S: P2pSubstrate, L: LobbyService> MembershipCoordinator<S, L> {
    /// Builds the coordinator around one substrate and lobby service.
    ///
    /// Fails only if the lobby service is unavailable.
    pub fn new(config: SessionConfig, substrate: S, lobby: L) -> Result<Self, CoordinatorError> {
        if !lobby.is_available() {
            return Err(CoordinatorError::ServiceUnavailable);
        }

        Ok(Self {
            transport: SessionTransport::from_config(substrate, &config),
            config,
            lobby,
            role: Role::Unset,
            state: CoordinatorState::Idle,
            current_lobby: None,
            joining: None,
            pending_create: false,
            epoch: 0,
            timers: TimerQueue::new(),
            transport_listeners: EventDispatcher::new(),
            coordinator_listeners: EventDispatcher::new(),
            lobby_signals: Vec::new(),
            transport_events: Vec::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Number of session rebuilds so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn current_lobby(&self) -> Option<LobbyId> {
        self.current_lobby
    }

    pub fn local_peer(&self) -> PeerId {
        self.lobby.local_peer()
    }

    pub fn transport(&self) -> &SessionTransport<S> {
        &self.transport
    }

    pub fn lobby_service(&self) -> &L {
        &self.lobby
    }

    pub fn host_attempt_pending(&self) -> bool {
        self.timers.is_pending(TimerKind::HostAttempt)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn on_transport_event(&mut self, listener: impl FnMut(&TransportEvent) + 'static) -> ListenerId {
        self.transport_listeners.subscribe(listener)
    }

    pub fn on_coordinator_event(
        &mut self,
        listener: impl FnMut(&CoordinatorEvent) + 'static,
    ) -> ListenerId {
        self.coordinator_listeners.subscribe(listener)
    }

    pub fn remove_transport_listener(&mut self, id: ListenerId) -> bool {
        self.transport_listeners.unsubscribe(id)
    }

    pub fn remove_coordinator_listener(&mut self, id: ListenerId) -> bool {
        self.coordinator_listeners.unsubscribe(id)
    }

    /// Schedules the optimistic host attempt.
    pub fn activate(&mut self, now: Instant) {
        if self.state != CoordinatorState::Idle || self.current_lobby.is_some() {
            debug!(target: LOBBY_TARGET, "activate ignored in state {:?}", self.state);
            return;
        }
        info!(
            target: LOBBY_TARGET,
            "activated as {}, hosting in {:?}",
            self.lobby.local_peer(),
            self.config.initial_host_delay()
        );
        self.timers
            .schedule(TimerKind::HostAttempt, now + self.config.initial_host_delay());
    }

    /// Sends application data. Hosts address connections, clients the host.
    pub fn send(&mut self, destination: Destination, payload: &[u8]) -> bool {
        self.transport.send(destination, payload)
    }

    /// Joins `lobby` as a client, abandoning whatever role was held.
    pub fn join(&mut self, lobby: LobbyId) {
        self.join_lobby(lobby);
    }

    /// Advertises the current lobby through rich presence so friends can join.
    pub fn publish_invite(&mut self) -> Result<LobbyId, CoordinatorError> {
        let lobby = self.current_lobby.ok_or(CoordinatorError::NoLobby)?;
        let connect = connect_lobby_string(lobby);
        self.lobby
            .set_rich_presence(RICH_PRESENCE_CONNECT, Some(connect.as_str()));
        self.lobby.set_rich_presence(
            RICH_PRESENCE_DISPLAY,
            Some(RICH_PRESENCE_STATUS_WITH_CONNECT),
        );
        self.lobby.open_invite_overlay();
        info!(target: LOBBY_TARGET, "published invite for lobby {lobby}");
        self.emit(CoordinatorEvent::InvitePublished { lobby });
        Ok(lobby)
    }

    /// Leaves the lobby, stops the transport and cancels timers.
    pub fn shutdown(&mut self) {
        self.timers.clear();
        self.leave_current();
        self.lobby.set_rich_presence(RICH_PRESENCE_CONNECT, None);
        self.lobby.set_rich_presence(RICH_PRESENCE_DISPLAY, None);
        self.role = Role::Unset;
        self.set_state(CoordinatorState::Idle);
        self.dispatch_transport_events(None);
        info!(target: LOBBY_TARGET, "shut down");
    }

    pub fn tick(&mut self, now: Instant) {
        self.lobby.run_callbacks();

        let mut signals = std::mem::take(&mut self.lobby_signals);
        self.lobby.poll_signals(&mut signals);
        for signal in signals.drain(..) {
            self.handle_lobby_signal(signal, now);
        }
        self.lobby_signals = signals;

        self.transport.pump_signals();
        self.transport.poll_inbound();
        self.dispatch_transport_events(Some(now));

        for (kind, _) in self.timers.due(now) {
            match kind {
                TimerKind::HostAttempt => self.host_attempt(),
            }
        }
        self.dispatch_transport_events(Some(now));
    }

    fn handle_lobby_signal(&mut self, signal: LobbySignal, now: Instant) {
        match signal {
            LobbySignal::Created(result) => self.handle_created(result),
            LobbySignal::Entered(lobby) => self.handle_entered(lobby, now),
            LobbySignal::JoinFailed { lobby, reason } => self.handle_join_failed(lobby, reason, now),
            LobbySignal::MembershipChanged {
                lobby,
                member,
                change,
            } => self.handle_membership(lobby, member, change, now),
            LobbySignal::DataChanged(lobby) => {
                if self.current_lobby == Some(lobby) && self.role == Role::Client {
                    self.check_ownership(lobby, now);
                }
            }
            LobbySignal::InvitationAccepted { lobby, inviter } => {
                info!(target: LOBBY_TARGET, "invitation from {inviter} to lobby {lobby} accepted");
                self.join_lobby(lobby);
            }
            LobbySignal::RichPresenceJoin { friend, connect } => {
                match parse_connect_lobby(&connect) {
                    Some(lobby) => {
                        info!(target: LOBBY_TARGET, "joining {friend} through lobby {lobby}");
                        self.join_lobby(lobby);
                    }
                    None => warn!(
                        target: LOBBY_TARGET,
                        "ignoring join request from {friend} with connect string {connect:?}"
                    ),
                }
            }
        }
    }

    fn host_attempt(&mut self) {
        if self.current_lobby.is_some() || self.joining.is_some() || self.pending_create {
            debug!(target: LOBBY_TARGET, "host attempt skipped in state {:?}", self.state);
            return;
        }

        self.transport.stop_all(Side::Client);
        self.role = Role::Host;
        if let Err(err) = self.transport.start(Side::Host) {
            warn!(target: LOBBY_TARGET, "could not start hosting: {err}");
            self.role = Role::Unset;
            return;
        }

        info!(target: LOBBY_TARGET, "creating lobby (epoch {})", self.epoch);
        self.pending_create = true;
        self.lobby
            .create_lobby(self.config.visibility, SESSION_CAPACITY);
        self.set_state(CoordinatorState::Hosting);
    }

    fn handle_created(&mut self, result: Result<LobbyId, String>) {
        let expected = std::mem::replace(&mut self.pending_create, false);

        match result {
            Ok(lobby) if !expected => {
                debug!(target: LOBBY_TARGET, "leaving stale lobby {lobby}");
                self.lobby.leave_lobby(lobby);
            }
            Ok(lobby) => {
                info!(target: LOBBY_TARGET, "lobby {lobby} created");
                self.current_lobby = Some(lobby);
                self.publish_host_metadata(lobby);
                self.emit(CoordinatorEvent::LobbyCreated { lobby });
            }
            Err(reason) if !expected => {
                debug!(target: LOBBY_TARGET, "ignoring stale lobby creation failure: {reason}");
            }
            Err(reason) => {
                error!(target: LOBBY_TARGET, "lobby creation failed: {reason}");
                self.transport.stop_all(Side::Host);
                self.role = Role::Unset;
                self.set_state(CoordinatorState::Idle);
                self.emit(CoordinatorEvent::LobbyCreateFailed { reason });
            }
        }
    }

    fn handle_entered(&mut self, lobby: LobbyId, now: Instant) {
        if self.current_lobby != Some(lobby) && self.joining != Some(lobby) {
            debug!(target: LOBBY_TARGET, "ignoring entry into lobby {lobby}");
            return;
        }
        self.joining = None;
        self.current_lobby = Some(lobby);

        let local = self.lobby.local_peer();
        match self.lobby.lobby_owner(lobby) {
            Some(owner) if owner == local => self.become_host_of(lobby),
            Some(owner) => {
                debug!(target: LOBBY_TARGET, "lobby {lobby} is owned by {owner}");
                self.become_client_of(lobby, now);
            }
            None => {
                warn!(target: LOBBY_TARGET, "lobby {lobby} has no owner");
                self.abandon_lobby(lobby, CoordinatorError::MissingHostAddress(lobby), now);
            }
        }
    }

    fn become_host_of(&mut self, lobby: LobbyId) {
        if self.role == Role::Host && self.transport.active_side() == Some(Side::Host) {
            debug!(target: LOBBY_TARGET, "already hosting lobby {lobby}");
            return;
        }

        self.transport.stop_all(Side::Client);
        self.role = Role::Host;
        if let Err(err) = self.transport.start(Side::Host) {
            warn!(target: LOBBY_TARGET, "could not start hosting lobby {lobby}: {err}");
        }
        self.publish_host_metadata(lobby);
        self.set_state(CoordinatorState::Hosting);
        info!(target: LOBBY_TARGET, "hosting existing lobby {lobby}");
        self.emit(CoordinatorEvent::HostingLobby { lobby });
    }

    fn become_client_of(&mut self, lobby: LobbyId, now: Instant) {
        if self.transport.active_side() == Some(Side::Host) {
            self.transport.stop_all(Side::Host);
        }
        self.role = Role::Client;

        let host = match self.host_address(lobby) {
            Ok(host) => host,
            Err(err) => {
                warn!(target: LOBBY_TARGET, "{err}");
                self.abandon_lobby(lobby, err, now);
                return;
            }
        };

        if let Err(err) = self.transport.connect(host) {
            warn!(target: LOBBY_TARGET, "could not reach host {host} of lobby {lobby}: {err}");
            self.abandon_lobby(lobby, err.into(), now);
            return;
        }

        let name = self.lobby.persona_name(host);
        info!(target: LOBBY_TARGET, "connected to host {name} ({host}) in lobby {lobby}");
        self.set_state(CoordinatorState::ConnectedAsClient);
        self.emit(CoordinatorEvent::HostIdentified { lobby, host, name });
    }

    fn host_address(&self, lobby: LobbyId) -> Result<PeerId, CoordinatorError> {
        self.lobby
            .lobby_data(lobby, &self.config.host_address_key)
            .and_then(|address| address.parse::<PeerId>().ok())
            .ok_or(CoordinatorError::MissingHostAddress(lobby))
    }

    /// Gives up on a lobby whose host cannot be used and falls back to hosting.
    fn abandon_lobby(&mut self, lobby: LobbyId, error: CoordinatorError, now: Instant) {
        self.leave_current();
        self.role = Role::Unset;
        self.set_state(CoordinatorState::Idle);
        self.emit(CoordinatorEvent::HostUnreachable { lobby, error });
        self.timers.schedule(
            TimerKind::HostAttempt,
            now + self.config.session_restart_delay(),
        );
    }

    fn handle_join_failed(&mut self, lobby: LobbyId, reason: String, now: Instant) {
        if self.joining != Some(lobby) {
            debug!(target: LOBBY_TARGET, "ignoring join failure for lobby {lobby}");
            return;
        }
        warn!(target: LOBBY_TARGET, "joining lobby {lobby} failed: {reason}");
        self.joining = None;
        self.set_state(CoordinatorState::Idle);
        self.emit(CoordinatorEvent::JoinFailed { lobby, reason });
        self.timers.schedule(
            TimerKind::HostAttempt,
            now + self.config.session_restart_delay(),
        );
    }

    fn handle_membership(
        &mut self,
        lobby: LobbyId,
        member: PeerId,
        change: MemberChange,
        now: Instant,
    ) {
        if self.current_lobby != Some(lobby) || member == self.lobby.local_peer() {
            return;
        }

        let name = self.lobby.persona_name(member);
        let members = self.lobby.member_count(lobby);
        match change {
            MemberChange::Joined => {
                info!(target: LOBBY_TARGET, "{name} ({member}) joined lobby {lobby}");
                self.emit(CoordinatorEvent::PeerJoined { peer: member, name });
                if self.role == Role::Host && members >= SESSION_CAPACITY {
                    self.lobby.set_joinable(lobby, false);
                }
            }
            MemberChange::Left => {
                info!(target: LOBBY_TARGET, "{name} ({member}) left lobby {lobby}");
                self.emit(CoordinatorEvent::PeerLeft { peer: member, name });
                match self.role {
                    Role::Host => {
                        if members < SESSION_CAPACITY {
                            self.lobby.set_joinable(lobby, true);
                        }
                        if let Some(conn) = self.transport.conn_for_peer(member) {
                            if let Err(err) = self.transport.close(conn) {
                                warn!(target: LOBBY_TARGET, "closing conn of {member}: {err}");
                            }
                        }
                    }
                    Role::Client => self.check_ownership(lobby, now),
                    Role::Unset => {}
                }
            }
        }
    }

    fn check_ownership(&mut self, lobby: LobbyId, now: Instant) {
        if self.lobby.lobby_owner(lobby) == Some(self.lobby.local_peer()) {
            self.migrate(lobby, now);
        }
    }

    /// The host left and the service promoted us: rebuild the session as host.
    fn migrate(&mut self, lobby: LobbyId, now: Instant) {
        self.epoch += 1;
        info!(
            target: LOBBY_TARGET,
            "promoted to owner of lobby {lobby}, migrating (epoch {})", self.epoch
        );
        self.transport.stop_all(Side::Client);
        self.lobby.leave_lobby(lobby);
        self.current_lobby = None;
        self.role = Role::Unset;
        self.set_state(CoordinatorState::Migrating);
        self.emit(CoordinatorEvent::HostMigrationStarted { epoch: self.epoch });
        self.timers
            .schedule(TimerKind::HostAttempt, now + self.config.migration_delay());
    }

    /// The only peer of a hosted session is gone: start over with a new lobby.
    fn restart_session(&mut self, now: Instant) {
        self.epoch += 1;
        info!(target: LOBBY_TARGET, "last peer gone, restarting session (epoch {})", self.epoch);
        self.leave_current();
        self.role = Role::Unset;
        self.set_state(CoordinatorState::Migrating);
        self.emit(CoordinatorEvent::SessionRestarting { epoch: self.epoch });
        self.timers.schedule(
            TimerKind::HostAttempt,
            now + self.config.session_restart_delay(),
        );
    }

    fn join_lobby(&mut self, lobby: LobbyId) {
        self.timers.cancel(TimerKind::HostAttempt);
        if self.current_lobby == Some(lobby) || self.joining == Some(lobby) {
            debug!(target: LOBBY_TARGET, "already in lobby {lobby}");
            return;
        }

        self.leave_current();
        self.role = Role::Unset;
        self.joining = Some(lobby);
        self.set_state(CoordinatorState::JoiningAsClient);
        info!(target: LOBBY_TARGET, "joining lobby {lobby}");
        self.lobby.join_lobby(lobby);
    }

    /// Stops whichever side is active and leaves every lobby we are in or entering.
    fn leave_current(&mut self) {
        if let Some(side) = self.transport.active_side() {
            self.transport.stop_all(side);
        }
        if let Some(lobby) = self.current_lobby.take() {
            self.lobby.leave_lobby(lobby);
        }
        if let Some(lobby) = self.joining.take() {
            self.lobby.leave_lobby(lobby);
        }
        self.pending_create = false;
    }

    fn publish_host_metadata(&mut self, lobby: LobbyId) {
        let local = self.lobby.local_peer();
        if !self
            .lobby
            .set_lobby_data(lobby, &self.config.host_address_key, &local.to_string())
        {
            warn!(target: LOBBY_TARGET, "lobby {lobby} rejected the host address");
        }
        let name = format!("{}'s game", self.lobby.persona_name(local));
        self.lobby
            .set_lobby_data(lobby, &self.config.session_name_key, &name);
    }

    /// Hands buffered transport events to the listeners. With a clock, the
    /// coordinator reacts to them first.
    fn dispatch_transport_events(&mut self, now: Option<Instant>) {
        let mut events = std::mem::take(&mut self.transport_events);
        self.transport.drain_events(&mut events);

        for event in events.drain(..) {
            if let Some(now) = now {
                self.handle_transport_event(&event, now);
            }
            self.transport_listeners.emit(&event);
        }

        self.transport_events = events;
    }

    fn handle_transport_event(&mut self, event: &TransportEvent, now: Instant) {
        match event {
            TransportEvent::RemoteConnectionStateChanged {
                conn,
                state: RemoteConnectionState::Stopped,
            } => {
                debug!(target: LOBBY_TARGET, "conn {conn} stopped");
                if self.role == Role::Host && self.transport.connection_count() == 0 {
                    self.restart_session(now);
                }
            }
            TransportEvent::LocalConnectionStateChanged {
                side: Side::Client,
                state,
            } if self.state == CoordinatorState::ConnectedAsClient => {
                debug!(target: LOBBY_TARGET, "client session now {state:?}");
            }
            _ => {}
        }
    }

    fn set_state(&mut self, to: CoordinatorState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(target: LOBBY_TARGET, "state {from:?} -> {to:?}");
        self.emit(CoordinatorEvent::StateChanged { from, to });
    }

    fn emit(&mut self, event: CoordinatorEvent) {
        self.coordinator_listeners.emit(&event);
    }
}

impl<S: P2pSubstrate, L: LobbyService> Drop for MembershipCoordinator<S, L> {
    fn drop(&mut self) {
        if let Some(lobby) = self.current_lobby.take() {
            self.lobby.leave_lobby(lobby);
        }
    }
}
