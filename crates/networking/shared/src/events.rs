use bytes::Bytes;

use crate::ids::ConnId;

/// Which end of a session a transport is acting as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Host,
    Client,
}

impl Side {
    pub const fn is_host(self) -> bool {
        matches!(self, Side::Host)
    }
}

/// State of the local end of the transport for one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalConnectionState {
    #[default]
    Stopped,
    Starting,
    Started,
}

/// State of a remote connection as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteConnectionState {
    #[default]
    Stopped,
    Started,
}

/// Events emitted by the session transport to the layers above it.
///
/// A remote connection going away always surfaces as
/// `RemoteConnectionStateChanged { state: Stopped }`, whether it was closed
/// locally or dropped by the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    LocalConnectionStateChanged {
        side: Side,
        state: LocalConnectionState,
    },
    RemoteConnectionStateChanged {
        conn: ConnId,
        state: RemoteConnectionState,
    },
    /// Payload from a peer. `conn` is `None` on the client side, where the
    /// host is the only connection.
    DataReceived {
        conn: Option<ConnId>,
        payload: Bytes,
    },
}
