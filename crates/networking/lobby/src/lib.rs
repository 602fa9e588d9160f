//! Lobby-driven role management for two-peer sessions.
//!
//! [`MembershipCoordinator`] decides whether the local peer hosts or joins,
//! follows lobby ownership and rebuilds the session when the host goes away.
//!
//! Enable the `bevy` feature for [`bevy::LobbyPlugin`], which ticks the
//! coordinator every frame and forwards its events into the ECS.

#[cfg(feature = "bevy")]
pub mod bevy;
mod coordinator;
mod error;
mod events;
mod timers;

pub use coordinator::MembershipCoordinator;
pub use error::CoordinatorError;
pub use events::{CoordinatorEvent, CoordinatorState, Role};
pub use session_transport::Destination;
pub use timers::TimerQueue;
