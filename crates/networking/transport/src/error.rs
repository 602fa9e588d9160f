use shared::{ConnId, PeerId, Side};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport already started as {active:?}, cannot start as {requested:?}")]
    AlreadyStarted { active: Side, requested: Side },
    #[error("handshake to host {0} was refused by the substrate")]
    ConnectSendFailed(PeerId),
    #[error("unknown connection id {0}")]
    UnknownConnection(ConnId),
}
