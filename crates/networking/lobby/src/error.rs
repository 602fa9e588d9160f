use session_transport::TransportError;
use shared::LobbyId;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("lobby service is not available")]
    ServiceUnavailable,
    #[error("lobby {0} does not advertise a usable host address")]
    MissingHostAddress(LobbyId),
    #[error("not in a lobby")]
    NoLobby,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
