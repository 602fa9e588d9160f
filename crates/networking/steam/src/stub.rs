use std::convert::Infallible;

use bytes::Bytes;
use shared::{
    steam::SteamAppId, LobbyId, LobbyService, LobbySignal, LobbyVisibility, P2pSubstrate, PeerId,
    SubstrateSignal,
};

use crate::SteamBackendError;

/// Placeholder SDK handle; it can never be constructed.
#[derive(Debug)]
pub struct SteamSdk {
    never: Infallible,
}

impl SteamSdk {
    pub fn init(_app_id: SteamAppId) -> Result<Self, SteamBackendError> {
        Err(SteamBackendError::Disabled)
    }

    pub fn app_id(&self) -> SteamAppId {
        match self.never {}
    }

    pub fn local_peer(&self) -> PeerId {
        match self.never {}
    }

    pub fn into_parts(self) -> (SteamP2p, SteamLobbies) {
        match self.never {}
    }
}

#[derive(Debug)]
pub struct SteamP2p {
    never: Infallible,
}

impl P2pSubstrate for SteamP2p {
    fn send_datagram(&mut self, _peer: PeerId, _payload: &[u8]) -> bool {
        match self.never {}
    }

    fn poll_datagram(&mut self) -> Option<(PeerId, Bytes)> {
        match self.never {}
    }

    fn accept_session(&mut self, _peer: PeerId) {
        match self.never {}
    }

    fn close_session(&mut self, _peer: PeerId) {
        match self.never {}
    }

    fn poll_signals(&mut self, _output: &mut Vec<SubstrateSignal>) {
        match self.never {}
    }
}

#[derive(Debug)]
pub struct SteamLobbies {
    never: Infallible,
}

impl LobbyService for SteamLobbies {
    fn local_peer(&self) -> PeerId {
        match self.never {}
    }

    fn is_available(&self) -> bool {
        match self.never {}
    }

    fn persona_name(&self, _peer: PeerId) -> String {
        match self.never {}
    }

    fn create_lobby(&mut self, _visibility: LobbyVisibility, _capacity: u32) {
        match self.never {}
    }

    fn join_lobby(&mut self, _lobby: LobbyId) {
        match self.never {}
    }

    fn leave_lobby(&mut self, _lobby: LobbyId) {
        match self.never {}
    }

    fn set_lobby_data(&mut self, _lobby: LobbyId, _key: &str, _value: &str) -> bool {
        match self.never {}
    }

    fn lobby_data(&self, _lobby: LobbyId, _key: &str) -> Option<String> {
        match self.never {}
    }

    fn lobby_owner(&self, _lobby: LobbyId) -> Option<PeerId> {
        match self.never {}
    }

    fn member_count(&self, _lobby: LobbyId) -> u32 {
        match self.never {}
    }

    fn set_joinable(&mut self, _lobby: LobbyId, _joinable: bool) -> bool {
        match self.never {}
    }

    fn set_rich_presence(&mut self, _key: &str, _value: Option<&str>) -> bool {
        match self.never {}
    }

    fn poll_signals(&mut self, _output: &mut Vec<LobbySignal>) {
        match self.never {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_reports_disabled_feature() {
        assert!(matches!(
            SteamSdk::init(SteamAppId::development()),
            Err(SteamBackendError::Disabled)
        ));
    }
}
