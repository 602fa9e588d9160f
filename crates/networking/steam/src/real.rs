use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use shared::{
    steam::{SteamAppId, MAX_STEAM_PACKET_SIZE},
    LobbyId, LobbyService, LobbySignal, LobbyVisibility, MemberChange, P2pSubstrate, PeerId,
    SubstrateSignal,
};
use steamworks::{
    friends::{GameLobbyJoinRequested, GameRichPresenceJoinRequested},
    matchmaking::{
        ChatMemberStateChange, LobbyChatUpdate, LobbyDataUpdate, LobbyId as SteamLobbyId,
        LobbyType,
    },
    networking::{Networking, P2PSessionConnectFail, P2PSessionRequest, SendType},
    CallbackHandle, Client, ClientManager, SingleClient, SteamId,
};
use tracing::{debug, info, warn};

use crate::SteamBackendError;

const STEAM_TARGET: &str = "p2p::steam";

type SignalQueue<T> = Arc<Mutex<VecDeque<T>>>;

fn push<T>(queue: &SignalQueue<T>, signal: T) {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push_back(signal);
}

fn drain<T>(queue: &SignalQueue<T>, output: &mut Vec<T>) {
    output.extend(queue.lock().unwrap_or_else(PoisonError::into_inner).drain(..));
}

fn peer(id: SteamId) -> PeerId {
    PeerId::new(id.raw())
}

fn steam_id(peer: PeerId) -> SteamId {
    SteamId::from_raw(peer.get())
}

fn lobby(id: SteamLobbyId) -> LobbyId {
    LobbyId::new(id.raw())
}

fn steam_lobby(lobby: LobbyId) -> SteamLobbyId {
    SteamLobbyId::from_raw(lobby.get())
}

fn lobby_type(visibility: LobbyVisibility) -> LobbyType {
    match visibility {
        LobbyVisibility::Private => LobbyType::Private,
        LobbyVisibility::FriendsOnly => LobbyType::FriendsOnly,
        LobbyVisibility::Public => LobbyType::Public,
        LobbyVisibility::Invisible => LobbyType::Invisible,
    }
}

/// Initialised Steamworks client. Acquired once per process and split into the
/// substrate and lobby adapters, which share it.
pub struct SteamSdk {
    app_id: SteamAppId,
    client: Client<ClientManager>,
    single: SingleClient<ClientManager>,
}

impl SteamSdk {
    pub fn init(app_id: SteamAppId) -> Result<Self, SteamBackendError> {
        let (client, single) =
            Client::init_app(app_id.0).map_err(|err| SteamBackendError::Init(err.to_string()))?;
        info!(
            target: STEAM_TARGET,
            "steamworks initialised for app {} as {}",
            app_id.0,
            client.user().steam_id().raw()
        );
        Ok(Self {
            app_id,
            client,
            single,
        })
    }

    pub fn app_id(&self) -> SteamAppId {
        self.app_id
    }

    pub fn local_peer(&self) -> PeerId {
        peer(self.client.user().steam_id())
    }

    pub fn into_parts(self) -> (SteamP2p, SteamLobbies) {
        let p2p = SteamP2p::new(&self.client);
        let lobbies = SteamLobbies::new(self.client, self.single);
        (p2p, lobbies)
    }
}

/// Steam P2P networking exposed as a [`P2pSubstrate`].
pub struct SteamP2p {
    networking: Networking<ClientManager>,
    signals: SignalQueue<SubstrateSignal>,
    buffer: Vec<u8>,
    _callbacks: Vec<CallbackHandle<ClientManager>>,
}

impl SteamP2p {
    fn new(client: &Client<ClientManager>) -> Self {
        let signals: SignalQueue<SubstrateSignal> = Arc::default();

        let queue = Arc::clone(&signals);
        let request = client.register_callback::<P2PSessionRequest, _>(move |request| {
            debug!(target: STEAM_TARGET, "session request from {}", request.remote.raw());
            push(&queue, SubstrateSignal::SessionRequested(peer(request.remote)));
        });

        let queue = Arc::clone(&signals);
        let fail = client.register_callback::<P2PSessionConnectFail, _>(move |fail| {
            push(
                &queue,
                SubstrateSignal::SessionConnectFailed {
                    peer: peer(fail.remote),
                    reason: format!("steam p2p error {}", fail.error),
                },
            );
        });

        Self {
            networking: client.networking(),
            signals,
            buffer: vec![0; MAX_STEAM_PACKET_SIZE],
            _callbacks: vec![request, fail],
        }
    }
}

impl P2pSubstrate for SteamP2p {
    fn send_datagram(&mut self, to: PeerId, payload: &[u8]) -> bool {
        self.networking
            .send_p2p_packet(steam_id(to), SendType::Reliable, payload)
    }

    fn poll_datagram(&mut self) -> Option<(PeerId, Bytes)> {
        let size = self.networking.is_p2p_packet_available()?;
        if size > self.buffer.len() {
            self.buffer.resize(size, 0);
        }
        let (remote, read) = self.networking.read_p2p_packet(&mut self.buffer[..size])?;
        Some((peer(remote), Bytes::copy_from_slice(&self.buffer[..read])))
    }

    fn accept_session(&mut self, remote: PeerId) {
        self.networking.accept_p2p_session(steam_id(remote));
    }

    fn close_session(&mut self, remote: PeerId) {
        if !self.networking.close_p2p_session(steam_id(remote)) {
            debug!(target: STEAM_TARGET, "no open session with {remote} to close");
        }
    }

    fn poll_signals(&mut self, output: &mut Vec<SubstrateSignal>) {
        drain(&self.signals, output);
    }
}

/// Steam matchmaking, friends and rich presence exposed as a [`LobbyService`].
///
/// Owns the SDK's callback pump; [`LobbyService::run_callbacks`] runs every
/// registered callback, the substrate's included.
pub struct SteamLobbies {
    client: Client<ClientManager>,
    single: SingleClient<ClientManager>,
    signals: SignalQueue<LobbySignal>,
    _callbacks: Vec<CallbackHandle<ClientManager>>,
}

impl SteamLobbies {
    fn new(client: Client<ClientManager>, single: SingleClient<ClientManager>) -> Self {
        let signals: SignalQueue<LobbySignal> = Arc::default();
        let mut callbacks = Vec::new();

        let queue = Arc::clone(&signals);
        callbacks.push(
            client.register_callback::<LobbyChatUpdate, _>(move |update| {
                let change = match update.member_state_change {
                    ChatMemberStateChange::Entered => MemberChange::Joined,
                    _ => MemberChange::Left,
                };
                push(
                    &queue,
                    LobbySignal::MembershipChanged {
                        lobby: lobby(update.lobby),
                        member: peer(update.user_changed),
                        change,
                    },
                );
            }),
        );

        let queue = Arc::clone(&signals);
        callbacks.push(
            client.register_callback::<LobbyDataUpdate, _>(move |update| {
                if update.success {
                    push(&queue, LobbySignal::DataChanged(lobby(update.lobby)));
                }
            }),
        );

        let queue = Arc::clone(&signals);
        callbacks.push(
            client.register_callback::<GameLobbyJoinRequested, _>(move |request| {
                push(
                    &queue,
                    LobbySignal::InvitationAccepted {
                        lobby: lobby(request.lobby_steam_id),
                        inviter: peer(request.friend_steam_id),
                    },
                );
            }),
        );

        let queue = Arc::clone(&signals);
        callbacks.push(
            client.register_callback::<GameRichPresenceJoinRequested, _>(move |request| {
                push(
                    &queue,
                    LobbySignal::RichPresenceJoin {
                        friend: peer(request.friend_steam_id),
                        connect: request.connect,
                    },
                );
            }),
        );

        Self {
            client,
            single,
            signals,
            _callbacks: callbacks,
        }
    }
}

impl LobbyService for SteamLobbies {
    fn local_peer(&self) -> PeerId {
        peer(self.client.user().steam_id())
    }

    fn is_available(&self) -> bool {
        self.client.user().logged_on()
    }

    fn persona_name(&self, target: PeerId) -> String {
        let friends = self.client.friends();
        if target == self.local_peer() {
            friends.name()
        } else {
            friends.get_friend(steam_id(target)).name()
        }
    }

    fn create_lobby(&mut self, visibility: LobbyVisibility, capacity: u32) {
        let queue = Arc::clone(&self.signals);
        self.client
            .matchmaking()
            .create_lobby(lobby_type(visibility), capacity, move |result| match result {
                Ok(created) => {
                    push(&queue, LobbySignal::Created(Ok(lobby(created))));
                    push(&queue, LobbySignal::Entered(lobby(created)));
                }
                Err(err) => push(&queue, LobbySignal::Created(Err(err.to_string()))),
            });
    }

    fn join_lobby(&mut self, target: LobbyId) {
        let queue = Arc::clone(&self.signals);
        self.client
            .matchmaking()
            .join_lobby(steam_lobby(target), move |result| match result {
                Ok(joined) => push(&queue, LobbySignal::Entered(lobby(joined))),
                Err(()) => push(
                    &queue,
                    LobbySignal::JoinFailed {
                        lobby: target,
                        reason: "steam refused the lobby join".into(),
                    },
                ),
            });
    }

    fn leave_lobby(&mut self, target: LobbyId) {
        self.client.matchmaking().leave_lobby(steam_lobby(target));
    }

    fn set_lobby_data(&mut self, target: LobbyId, key: &str, value: &str) -> bool {
        self.client
            .matchmaking()
            .set_lobby_data(steam_lobby(target), key, value)
    }

    fn lobby_data(&self, target: LobbyId, key: &str) -> Option<String> {
        self.client
            .matchmaking()
            .lobby_data(steam_lobby(target), key)
            .map(|value| value.to_string())
            .filter(|value| !value.is_empty())
    }

    fn lobby_owner(&self, target: LobbyId) -> Option<PeerId> {
        let owner = self.client.matchmaking().lobby_owner(steam_lobby(target));
        (owner.raw() != 0).then(|| peer(owner))
    }

    fn member_count(&self, target: LobbyId) -> u32 {
        self.client
            .matchmaking()
            .lobby_member_count(steam_lobby(target)) as u32
    }

    fn set_joinable(&mut self, target: LobbyId, joinable: bool) -> bool {
        self.client
            .matchmaking()
            .set_lobby_joinable(steam_lobby(target), joinable)
    }

    fn set_rich_presence(&mut self, key: &str, value: Option<&str>) -> bool {
        let applied = self.client.friends().set_rich_presence(key, value);
        if !applied {
            warn!(target: STEAM_TARGET, "steam rejected rich presence key {key}");
        }
        applied
    }

    fn open_invite_overlay(&mut self) {
        self.client.friends().activate_game_overlay("friends");
    }

    fn run_callbacks(&mut self) {
        self.single.run_callbacks();
    }

    fn poll_signals(&mut self, output: &mut Vec<LobbySignal>) {
        drain(&self.signals, output);
    }
}
