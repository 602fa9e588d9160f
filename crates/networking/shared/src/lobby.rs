//! Contract of the group-membership (lobby) service.

use serde::{Deserialize, Serialize};

use crate::ids::{LobbyId, PeerId};

/// Visibility for lobbies that can be advertised or hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyVisibility {
    Private,
    #[default]
    FriendsOnly,
    Public,
    Invisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberChange {
    Joined,
    Left,
}

/// Asynchronous notifications raised by the membership service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbySignal {
    /// Result of a `create_lobby` call.
    Created(Result<LobbyId, String>),
    /// The local user is now a member of the lobby.
    Entered(LobbyId),
    /// A `join_lobby` call did not succeed.
    JoinFailed { lobby: LobbyId, reason: String },
    MembershipChanged {
        lobby: LobbyId,
        member: PeerId,
        change: MemberChange,
    },
    /// Lobby metadata or ownership changed.
    DataChanged(LobbyId),
    /// The local user accepted an invitation to a lobby.
    InvitationAccepted { lobby: LobbyId, inviter: PeerId },
    /// The local user joined a friend through their rich-presence connect string.
    RichPresenceJoin { friend: PeerId, connect: String },
}

pub trait LobbyService {
    /// Identity of the local user.
    fn local_peer(&self) -> PeerId;

    /// Presence/init check; `false` means the service cannot be used at all.
    fn is_available(&self) -> bool;

    fn persona_name(&self, peer: PeerId) -> String;

    /// Starts creating a lobby; completion arrives as [`LobbySignal::Created`].
    fn create_lobby(&mut self, visibility: LobbyVisibility, capacity: u32);

    /// Starts joining a lobby; completion arrives as [`LobbySignal::Entered`]
    /// or [`LobbySignal::JoinFailed`].
    fn join_lobby(&mut self, lobby: LobbyId);

    fn leave_lobby(&mut self, lobby: LobbyId);

    fn set_lobby_data(&mut self, lobby: LobbyId, key: &str, value: &str) -> bool;

    fn lobby_data(&self, lobby: LobbyId, key: &str) -> Option<String>;

    fn lobby_owner(&self, lobby: LobbyId) -> Option<PeerId>;

    fn member_count(&self, lobby: LobbyId) -> u32;

    fn set_joinable(&mut self, lobby: LobbyId, joinable: bool) -> bool;

    fn set_rich_presence(&mut self, key: &str, value: Option<&str>) -> bool;

    /// Shows the platform's friend picker so the user can send invitations.
    fn open_invite_overlay(&mut self) {}

    /// Pumps the service's callback queue. Backends that deliver signals
    /// directly can keep the default.
    fn run_callbacks(&mut self) {}

    /// Drains pending signals into `output`.
    fn poll_signals(&mut self, output: &mut Vec<LobbySignal>);
}
