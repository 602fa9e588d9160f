//! Backend implementations of the substrate and lobby contracts.

pub mod loopback;

pub use loopback::{LoopbackError, LoopbackLobbyService, LoopbackNetwork, LoopbackSubstrate};
