//! Steamworks adapters for the substrate and lobby contracts.
//!
//! Without the `steamworks` feature the crate still compiles, but
//! [`SteamSdk::init`] always fails with [`SteamBackendError::Disabled`].

#[cfg(feature = "steamworks")]
mod real;
#[cfg(not(feature = "steamworks"))]
mod stub;

#[cfg(feature = "steamworks")]
pub use real::{SteamLobbies, SteamP2p, SteamSdk};
#[cfg(not(feature = "steamworks"))]
pub use stub::{SteamLobbies, SteamP2p, SteamSdk};

#[derive(thiserror::Error, Debug)]
pub enum SteamBackendError {
    #[error("steamworks feature is disabled")]
    Disabled,
    #[error("steamworks initialization failed: {0}")]
    Init(String),
}
