//! Loopback backend for in-memory peer-to-peer sessions.
//!
//! Provides a [`P2pSubstrate`] and a [`LobbyService`] implementation that keep
//! every peer in the same process without touching the network stack. All
//! endpoints attached to one [`LoopbackNetwork`] share its state, so tests and
//! the simulation can run several peers side by side and inspect lobbies from
//! the outside.
//!
//! Behaviour mirrors the Steam services closely enough for the session layer:
//! - every datagram from a peer whose session was not yet accepted raises a
//!   [`SubstrateSignal::SessionRequested`] on the receiver
//! - closing a session notifies the remote with [`SubstrateSignal::SessionDropped`]
//! - when a lobby owner leaves, ownership passes to the longest-standing member
//!   and the remaining members see [`LobbySignal::DataChanged`]

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::{
    ids::{LobbyId, PeerId},
    lobby::{LobbyService, LobbySignal, LobbyVisibility, MemberChange},
    substrate::{P2pSubstrate, SubstrateSignal},
};

const LOOPBACK_TARGET: &str = "p2p::loopback";

/// First lobby id handed out by a fresh network.
const FIRST_LOBBY_ID: u64 = 1;

/// Error type for loopback network operations.
#[derive(Debug, thiserror::Error)]
pub enum LoopbackError {
    #[error("loopback peer {0} is already attached")]
    AlreadyAttached(PeerId),
}

#[derive(Debug)]
struct PeerState {
    name: String,
    online: bool,
    available: bool,
    fail_sends: bool,
    fail_creates: bool,
    inbox: VecDeque<(PeerId, Bytes)>,
    p2p_signals: VecDeque<SubstrateSignal>,
    lobby_signals: VecDeque<LobbySignal>,
    sessions: HashSet<PeerId>,
    rich_presence: BTreeMap<String, String>,
    invite_overlays: u32,
}

impl PeerState {
    fn new(name: String) -> Self {
        Self {
            name,
            online: true,
            available: true,
            fail_sends: false,
            fail_creates: false,
            inbox: VecDeque::new(),
            p2p_signals: VecDeque::new(),
            lobby_signals: VecDeque::new(),
            sessions: HashSet::new(),
            rich_presence: BTreeMap::new(),
            invite_overlays: 0,
        }
    }
}

#[derive(Debug)]
struct LobbyState {
    owner: PeerId,
    members: Vec<PeerId>,
    data: BTreeMap<String, String>,
    joinable: bool,
    capacity: u32,
    visibility: LobbyVisibility,
}

#[derive(Debug)]
struct NetworkState {
    peers: HashMap<PeerId, PeerState>,
    lobbies: BTreeMap<LobbyId, LobbyState>,
    next_lobby: u64,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            peers: HashMap::new(),
            lobbies: BTreeMap::new(),
            next_lobby: FIRST_LOBBY_ID,
        }
    }
}

impl NetworkState {
    fn push_lobby_signal(&mut self, peer: PeerId, signal: LobbySignal) {
        if let Some(state) = self.peers.get_mut(&peer).filter(|state| state.online) {
            state.lobby_signals.push_back(signal);
        }
    }

    fn push_p2p_signal(&mut self, peer: PeerId, signal: SubstrateSignal) {
        if let Some(state) = self.peers.get_mut(&peer).filter(|state| state.online) {
            state.p2p_signals.push_back(signal);
        }
    }

    fn notify_members(&mut self, lobby: LobbyId, signal: LobbySignal) {
        let members = self
            .lobbies
            .get(&lobby)
            .map(|entry| entry.members.clone())
            .unwrap_or_default();
        for member in members {
            self.push_lobby_signal(member, signal.clone());
        }
    }

    fn join(&mut self, lobby: LobbyId, peer: PeerId) {
        let Some(entry) = self.lobbies.get_mut(&lobby) else {
            self.push_lobby_signal(
                peer,
                LobbySignal::JoinFailed {
                    lobby,
                    reason: "lobby does not exist".into(),
                },
            );
            return;
        };

        if entry.members.contains(&peer) {
            self.push_lobby_signal(peer, LobbySignal::Entered(lobby));
            return;
        }

        if !entry.joinable || entry.members.len() as u32 >= entry.capacity {
            self.push_lobby_signal(
                peer,
                LobbySignal::JoinFailed {
                    lobby,
                    reason: "lobby is not joinable".into(),
                },
            );
            return;
        }

        let others = entry.members.clone();
        entry.members.push(peer);
        debug!(target: LOOPBACK_TARGET, "peer {peer} joined lobby {lobby}");

        for member in others {
            self.push_lobby_signal(
                member,
                LobbySignal::MembershipChanged {
                    lobby,
                    member: peer,
                    change: MemberChange::Joined,
                },
            );
        }
        self.push_lobby_signal(peer, LobbySignal::Entered(lobby));
    }

    fn leave(&mut self, lobby: LobbyId, peer: PeerId) {
        let Some(entry) = self.lobbies.get_mut(&lobby) else {
            return;
        };
        if !entry.members.contains(&peer) {
            return;
        }

        entry.members.retain(|member| *member != peer);
        if entry.members.is_empty() {
            self.lobbies.remove(&lobby);
            debug!(target: LOOPBACK_TARGET, "lobby {lobby} closed (last member {peer} left)");
            return;
        }

        let owner_changed = entry.owner == peer;
        if owner_changed {
            entry.owner = entry.members[0];
            debug!(
                target: LOOPBACK_TARGET,
                "lobby {lobby} ownership passed from {peer} to {}", entry.owner
            );
        }

        self.notify_members(
            lobby,
            LobbySignal::MembershipChanged {
                lobby,
                member: peer,
                change: MemberChange::Left,
            },
        );
        if owner_changed {
            self.notify_members(lobby, LobbySignal::DataChanged(lobby));
        }
    }

    fn close_session(&mut self, local: PeerId, remote: PeerId) {
        if let Some(state) = self.peers.get_mut(&local) {
            state.sessions.remove(&remote);
            state.inbox.retain(|(sender, _)| *sender != remote);
        }
        let notify = match self.peers.get_mut(&remote) {
            Some(state) if state.online => state.sessions.remove(&local),
            _ => false,
        };
        if notify {
            self.push_p2p_signal(remote, SubstrateSignal::SessionDropped(local));
        }
    }
}

/// Shared in-memory network that loopback endpoints attach to.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut NetworkState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Attaches a peer and returns its substrate and lobby endpoints.
    ///
    /// A peer that was disconnected earlier may attach again and starts from
    /// a clean slate.
    pub fn attach(
        &self,
        peer: PeerId,
        name: impl Into<String>,
    ) -> Result<(LoopbackSubstrate, LoopbackLobbyService), LoopbackError> {
        let name = name.into();
        self.with_state(|state| {
            if state.peers.get(&peer).is_some_and(|existing| existing.online) {
                return Err(LoopbackError::AlreadyAttached(peer));
            }
            state.peers.insert(peer, PeerState::new(name));
            Ok(())
        })?;

        Ok((
            LoopbackSubstrate {
                peer,
                network: self.clone(),
            },
            LoopbackLobbyService {
                peer,
                network: self.clone(),
            },
        ))
    }

    /// Simulates the peer's process going away: it leaves every lobby and all
    /// of its sessions drop.
    pub fn disconnect(&self, peer: PeerId) {
        self.with_state(|state| {
            let lobbies: Vec<LobbyId> = state
                .lobbies
                .iter()
                .filter(|(_, entry)| entry.members.contains(&peer))
                .map(|(id, _)| *id)
                .collect();
            for lobby in lobbies {
                state.leave(lobby, peer);
            }

            let sessions: Vec<PeerId> = state
                .peers
                .get(&peer)
                .map(|entry| entry.sessions.iter().copied().collect())
                .unwrap_or_default();
            for remote in sessions {
                state.close_session(peer, remote);
            }

            if let Some(entry) = state.peers.get_mut(&peer) {
                entry.online = false;
                entry.inbox.clear();
                entry.p2p_signals.clear();
                entry.lobby_signals.clear();
                entry.rich_presence.clear();
            }
            debug!(target: LOOPBACK_TARGET, "peer {peer} disconnected");
        });
    }

    /// Delivers an accepted invitation to `to`.
    pub fn invite(&self, to: PeerId, lobby: LobbyId, inviter: PeerId) {
        self.with_state(|state| {
            state.push_lobby_signal(to, LobbySignal::InvitationAccepted { lobby, inviter });
        });
    }

    /// Lets `to` join `friend` through the friend's published connect string.
    /// Returns `false` if the friend advertises nothing.
    pub fn join_via_rich_presence(&self, to: PeerId, friend: PeerId) -> bool {
        self.with_state(|state| {
            let connect = state
                .peers
                .get(&friend)
                .and_then(|entry| entry.rich_presence.get(crate::steam::RICH_PRESENCE_CONNECT))
                .cloned();
            match connect {
                Some(connect) => {
                    state.push_lobby_signal(to, LobbySignal::RichPresenceJoin { friend, connect });
                    true
                }
                None => false,
            }
        })
    }

    /// Raises a session request on `to` as if `from` had sent a datagram.
    pub fn request_session(&self, to: PeerId, from: PeerId) {
        self.with_state(|state| {
            state.push_p2p_signal(to, SubstrateSignal::SessionRequested(from));
        });
    }

    /// Puts a datagram into `to`'s inbox without raising any session signal.
    pub fn inject_datagram(&self, to: PeerId, from: PeerId, payload: impl Into<Bytes>) {
        let payload = payload.into();
        self.with_state(|state| {
            if let Some(entry) = state.peers.get_mut(&to).filter(|entry| entry.online) {
                entry.inbox.push_back((from, payload));
            }
        });
    }

    /// Hands lobby ownership to `to` while the previous owner stays a member.
    /// Members only see [`LobbySignal::DataChanged`]. Returns `false` if `to`
    /// is not in the lobby.
    pub fn transfer_ownership(&self, lobby: LobbyId, to: PeerId) -> bool {
        self.with_state(|state| {
            let Some(entry) = state
                .lobbies
                .get_mut(&lobby)
                .filter(|entry| entry.members.contains(&to))
            else {
                return false;
            };
            debug!(
                target: LOOPBACK_TARGET,
                "lobby {lobby} ownership moved from {} to {to}", entry.owner
            );
            entry.owner = to;
            state.notify_members(lobby, LobbySignal::DataChanged(lobby));
            true
        })
    }

    pub fn set_send_failure(&self, peer: PeerId, fail: bool) {
        self.with_state(|state| {
            if let Some(entry) = state.peers.get_mut(&peer) {
                entry.fail_sends = fail;
            }
        });
    }

    pub fn set_create_failure(&self, peer: PeerId, fail: bool) {
        self.with_state(|state| {
            if let Some(entry) = state.peers.get_mut(&peer) {
                entry.fail_creates = fail;
            }
        });
    }

    pub fn set_available(&self, peer: PeerId, available: bool) {
        self.with_state(|state| {
            if let Some(entry) = state.peers.get_mut(&peer) {
                entry.available = available;
            }
        });
    }

    /// First lobby the peer is a member of.
    pub fn lobby_of(&self, peer: PeerId) -> Option<LobbyId> {
        self.with_state(|state| {
            state
                .lobbies
                .iter()
                .find(|(_, entry)| entry.members.contains(&peer))
                .map(|(id, _)| *id)
        })
    }

    pub fn lobby_owner(&self, lobby: LobbyId) -> Option<PeerId> {
        self.with_state(|state| state.lobbies.get(&lobby).map(|entry| entry.owner))
    }

    pub fn lobby_members(&self, lobby: LobbyId) -> Vec<PeerId> {
        self.with_state(|state| {
            state
                .lobbies
                .get(&lobby)
                .map(|entry| entry.members.clone())
                .unwrap_or_default()
        })
    }

    pub fn lobby_data(&self, lobby: LobbyId, key: &str) -> Option<String> {
        self.with_state(|state| {
            state
                .lobbies
                .get(&lobby)
                .and_then(|entry| entry.data.get(key).cloned())
        })
    }

    pub fn lobby_visibility(&self, lobby: LobbyId) -> Option<LobbyVisibility> {
        self.with_state(|state| state.lobbies.get(&lobby).map(|entry| entry.visibility))
    }

    pub fn is_joinable(&self, lobby: LobbyId) -> Option<bool> {
        self.with_state(|state| state.lobbies.get(&lobby).map(|entry| entry.joinable))
    }

    pub fn lobby_count(&self) -> usize {
        self.with_state(|state| state.lobbies.len())
    }

    /// Whether `local` currently holds an open session towards `remote`.
    pub fn has_session(&self, local: PeerId, remote: PeerId) -> bool {
        self.with_state(|state| {
            state
                .peers
                .get(&local)
                .is_some_and(|entry| entry.sessions.contains(&remote))
        })
    }

    pub fn rich_presence(&self, peer: PeerId, key: &str) -> Option<String> {
        self.with_state(|state| {
            state
                .peers
                .get(&peer)
                .and_then(|entry| entry.rich_presence.get(key).cloned())
        })
    }

    /// How often the peer opened the invite overlay.
    pub fn invite_overlays_opened(&self, peer: PeerId) -> u32 {
        self.with_state(|state| {
            state
                .peers
                .get(&peer)
                .map_or(0, |entry| entry.invite_overlays)
        })
    }
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with_state(|state| {
            f.debug_struct("LoopbackNetwork")
                .field("peers", &state.peers.len())
                .field("lobbies", &state.lobbies.len())
                .finish()
        })
    }
}

/// Datagram endpoint of one peer on a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackSubstrate {
    peer: PeerId,
    network: LoopbackNetwork,
}

impl LoopbackSubstrate {
    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

impl P2pSubstrate for LoopbackSubstrate {
    fn send_datagram(&mut self, to: PeerId, payload: &[u8]) -> bool {
        let from = self.peer;
        self.network.with_state(|state| {
            if state
                .peers
                .get(&from)
                .map_or(true, |sender| !sender.online || sender.fail_sends)
            {
                return false;
            }

            let Some(target) = state.peers.get_mut(&to).filter(|target| target.online) else {
                trace!(target: LOOPBACK_TARGET, "datagram {from} -> {to} refused: peer offline");
                return false;
            };
            target
                .inbox
                .push_back((from, Bytes::copy_from_slice(payload)));
            if !target.sessions.contains(&from) {
                target
                    .p2p_signals
                    .push_back(SubstrateSignal::SessionRequested(from));
            }

            if let Some(sender) = state.peers.get_mut(&from) {
                sender.sessions.insert(to);
            }
            true
        })
    }

    fn poll_datagram(&mut self) -> Option<(PeerId, Bytes)> {
        let peer = self.peer;
        self.network.with_state(|state| {
            state
                .peers
                .get_mut(&peer)
                .and_then(|entry| entry.inbox.pop_front())
        })
    }

    fn accept_session(&mut self, remote: PeerId) {
        let peer = self.peer;
        self.network.with_state(|state| {
            if let Some(entry) = state.peers.get_mut(&peer) {
                entry.sessions.insert(remote);
            }
        });
    }

    fn close_session(&mut self, remote: PeerId) {
        let peer = self.peer;
        self.network
            .with_state(|state| state.close_session(peer, remote));
    }

    fn poll_signals(&mut self, output: &mut Vec<SubstrateSignal>) {
        let peer = self.peer;
        self.network.with_state(|state| {
            if let Some(entry) = state.peers.get_mut(&peer) {
                output.extend(entry.p2p_signals.drain(..));
            }
        });
    }
}

/// Lobby endpoint of one peer on a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackLobbyService {
    peer: PeerId,
    network: LoopbackNetwork,
}

impl LobbyService for LoopbackLobbyService {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn is_available(&self) -> bool {
        let peer = self.peer;
        self.network.with_state(|state| {
            state
                .peers
                .get(&peer)
                .is_some_and(|entry| entry.online && entry.available)
        })
    }

    fn persona_name(&self, peer: PeerId) -> String {
        self.network.with_state(|state| {
            state
                .peers
                .get(&peer)
                .map(|entry| entry.name.clone())
                .unwrap_or_else(|| peer.to_string())
        })
    }

    fn create_lobby(&mut self, visibility: LobbyVisibility, capacity: u32) {
        let peer = self.peer;
        self.network.with_state(|state| {
            if state.peers.get(&peer).is_some_and(|entry| entry.fail_creates) {
                state.push_lobby_signal(
                    peer,
                    LobbySignal::Created(Err("lobby creation rejected".into())),
                );
                return;
            }

            let lobby = LobbyId::new(state.next_lobby);
            state.next_lobby += 1;
            state.lobbies.insert(
                lobby,
                LobbyState {
                    owner: peer,
                    members: vec![peer],
                    data: BTreeMap::new(),
                    joinable: true,
                    capacity,
                    visibility,
                },
            );
            debug!(target: LOOPBACK_TARGET, "peer {peer} created lobby {lobby}");
            state.push_lobby_signal(peer, LobbySignal::Created(Ok(lobby)));
            state.push_lobby_signal(peer, LobbySignal::Entered(lobby));
        });
    }

    fn join_lobby(&mut self, lobby: LobbyId) {
        let peer = self.peer;
        self.network.with_state(|state| state.join(lobby, peer));
    }

    fn leave_lobby(&mut self, lobby: LobbyId) {
        let peer = self.peer;
        self.network.with_state(|state| state.leave(lobby, peer));
    }

    fn set_lobby_data(&mut self, lobby: LobbyId, key: &str, value: &str) -> bool {
        let peer = self.peer;
        self.network.with_state(|state| {
            let Some(entry) = state
                .lobbies
                .get_mut(&lobby)
                .filter(|entry| entry.owner == peer)
            else {
                return false;
            };
            entry.data.insert(key.to_string(), value.to_string());
            state.notify_members(lobby, LobbySignal::DataChanged(lobby));
            true
        })
    }

    fn lobby_data(&self, lobby: LobbyId, key: &str) -> Option<String> {
        self.network.lobby_data(lobby, key)
    }

    fn lobby_owner(&self, lobby: LobbyId) -> Option<PeerId> {
        self.network.lobby_owner(lobby)
    }

    fn member_count(&self, lobby: LobbyId) -> u32 {
        self.network.lobby_members(lobby).len() as u32
    }

    fn set_joinable(&mut self, lobby: LobbyId, joinable: bool) -> bool {
        let peer = self.peer;
        self.network.with_state(|state| {
            match state
                .lobbies
                .get_mut(&lobby)
                .filter(|entry| entry.owner == peer)
            {
                Some(entry) => {
                    entry.joinable = joinable;
                    true
                }
                None => false,
            }
        })
    }

    fn set_rich_presence(&mut self, key: &str, value: Option<&str>) -> bool {
        let peer = self.peer;
        self.network.with_state(|state| {
            let Some(entry) = state.peers.get_mut(&peer) else {
                return false;
            };
            match value {
                Some(value) => {
                    entry
                        .rich_presence
                        .insert(key.to_string(), value.to_string());
                }
                None => {
                    entry.rich_presence.remove(key);
                }
            }
            true
        })
    }

    fn open_invite_overlay(&mut self) {
        let peer = self.peer;
        self.network.with_state(|state| {
            if let Some(entry) = state.peers.get_mut(&peer) {
                entry.invite_overlays += 1;
            }
        });
    }

    fn poll_signals(&mut self, output: &mut Vec<LobbySignal>) {
        let peer = self.peer;
        self.network.with_state(|state| {
            if let Some(entry) = state.peers.get_mut(&peer) {
                output.extend(entry.lobby_signals.drain(..));
            }
        });
    }
}
