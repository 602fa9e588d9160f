//! Connection-oriented transport over a session-less P2P datagram substrate.
//!
//! [`SessionTransport`] turns the substrate's peer identities into small
//! [`ConnId`](shared::ConnId)s, deduplicates session requests and routes
//! inbound datagrams to their connection. It is driven by the caller's tick
//! and never blocks.

mod connection_table;
mod error;
mod session;

pub use connection_table::ConnectionTable;
pub use error::TransportError;
pub use session::{Destination, SessionTransport};
