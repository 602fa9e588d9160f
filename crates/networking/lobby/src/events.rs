use shared::{LobbyId, PeerId};

use crate::CoordinatorError;

/// Role of the local peer in the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Unset,
    Host,
    Client,
}

/// Lifecycle of the membership coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorState {
    #[default]
    Idle,
    Hosting,
    JoiningAsClient,
    ConnectedAsClient,
    /// Session torn down, waiting for the delayed host attempt.
    Migrating,
}

/// Notifications raised by the coordinator for the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    StateChanged {
        from: CoordinatorState,
        to: CoordinatorState,
    },
    LobbyCreated {
        lobby: LobbyId,
    },
    LobbyCreateFailed {
        reason: String,
    },
    /// The local peer took over hosting of an existing lobby.
    HostingLobby {
        lobby: LobbyId,
    },
    HostIdentified {
        lobby: LobbyId,
        host: PeerId,
        name: String,
    },
    /// The lobby's host could not be reached; a host attempt follows.
    HostUnreachable {
        lobby: LobbyId,
        error: CoordinatorError,
    },
    JoinFailed {
        lobby: LobbyId,
        reason: String,
    },
    PeerJoined {
        peer: PeerId,
        name: String,
    },
    PeerLeft {
        peer: PeerId,
        name: String,
    },
    HostMigrationStarted {
        epoch: u64,
    },
    SessionRestarting {
        epoch: u64,
    },
    InvitePublished {
        lobby: LobbyId,
    },
}
