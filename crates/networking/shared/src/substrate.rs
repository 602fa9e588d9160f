//! Contract of the point-to-point datagram substrate.
//!
//! The substrate delivers reliable datagrams between opaque peer identities and
//! has no notion of connections. It is consumed, never implemented, by the
//! session transport.

use bytes::Bytes;

use crate::ids::PeerId;

/// Asynchronous notifications raised by the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstrateSignal {
    /// A remote peer wants to open a session with us.
    SessionRequested(PeerId),
    /// A session we tried to open never came up.
    SessionConnectFailed { peer: PeerId, reason: String },
    /// An established session with the peer went away.
    SessionDropped(PeerId),
}

pub trait P2pSubstrate {
    /// Hands a datagram to the substrate. Returns `false` if the substrate
    /// refused it; `true` is no delivery guarantee.
    fn send_datagram(&mut self, peer: PeerId, payload: &[u8]) -> bool;

    /// Pops one buffered datagram, never waiting for more to arrive.
    fn poll_datagram(&mut self) -> Option<(PeerId, Bytes)>;

    fn accept_session(&mut self, peer: PeerId);

    fn close_session(&mut self, peer: PeerId);

    /// Drains pending signals into `output`.
    fn poll_signals(&mut self, output: &mut Vec<SubstrateSignal>);
}
