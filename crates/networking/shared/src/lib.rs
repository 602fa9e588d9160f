//! Shared networking types for two-peer P2P sessions.
//!
//! This crate hosts the primitives shared by the session transport and the
//! lobby coordinator:
//! - ids: connection, peer and lobby identifiers
//! - events: transport lifecycle and data events surfaced to the application
//! - substrate / lobby: the external collaborators, expressed as traits
//! - transport: the in-memory loopback backend used for tests and simulation
//!
//! Keep this crate lean (no engine or SDK dependencies).

/// Session configuration loaded from TOML
pub mod config;
/// Ordered fan-out of events to registered listeners
pub mod dispatch;
/// Transport level events shared by host & client
pub mod events;
/// Strongly typed identifiers
pub mod ids;
/// Group-membership service contract
pub mod lobby;
/// Steam-related shared helpers (AppID, limits, metadata keys)
pub mod steam;
/// Point-to-point datagram substrate contract
pub mod substrate;
/// Backend implementations of the substrate and lobby contracts
pub mod transport;

pub use config::{ConfigError, SessionConfig};
pub use dispatch::{EventDispatcher, ListenerId};
pub use events::{LocalConnectionState, RemoteConnectionState, Side, TransportEvent};
pub use ids::{ConnId, ConnIdAllocator, LobbyId, PeerId};
pub use lobby::{LobbyService, LobbySignal, LobbyVisibility, MemberChange};
pub use substrate::{P2pSubstrate, SubstrateSignal};

/// Steamworks AppID used for local development/testing.
pub const STEAM_APP_ID: u32 = 480;
