//! Shared constants and helpers for Steam-style P2P sessions.

use crate::ids::LobbyId;

/// Practical per-datagram ceiling of the substrate.
pub const MAX_STEAM_PACKET_SIZE: usize = 1_200;

/// Datagram a client sends to open its session with the host.
pub const HANDSHAKE_DATAGRAM: [u8; 1] = [0];

/// Number of peers in one session, host included.
pub const SESSION_CAPACITY: u32 = 2;

/// Default lobby metadata key carrying the host's peer identity.
pub const HOST_ADDRESS_KEY: &str = "HostAddress";

/// Default lobby metadata key carrying the human readable session name.
pub const SESSION_NAME_KEY: &str = "name";

/// Rich presence key read by the friends list to offer "join game".
pub const RICH_PRESENCE_CONNECT: &str = "connect";

/// Rich presence key selecting the localized status line.
pub const RICH_PRESENCE_DISPLAY: &str = "steam_display";

/// Localization token shown while a joinable session is advertised.
pub const RICH_PRESENCE_STATUS_WITH_CONNECT: &str = "#StatusWithConnect";

const CONNECT_LOBBY_PREFIX: &str = "+connect_lobby";

/// Wrapper around Steamworks App ID to make intent explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteamAppId(pub u32);

impl SteamAppId {
    pub const fn development() -> Self {
        Self(super::STEAM_APP_ID)
    }
}

/// Returns `true` for the reserved connect datagram.
pub fn is_handshake(payload: &[u8]) -> bool {
    payload == HANDSHAKE_DATAGRAM
}

/// Builds the rich presence connect string for a lobby.
pub fn connect_lobby_string(lobby: LobbyId) -> String {
    format!("{CONNECT_LOBBY_PREFIX} {lobby}")
}

/// Extracts the lobby id from a `+connect_lobby <id>` connect string.
pub fn parse_connect_lobby(connect: &str) -> Option<LobbyId> {
    if !connect.contains(CONNECT_LOBBY_PREFIX) {
        return None;
    }
    connect
        .split_whitespace()
        .find_map(|part| part.parse::<u64>().ok())
        .map(LobbyId::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_string_roundtrip() {
        let lobby = LobbyId::new(109775241021923456);
        let connect = connect_lobby_string(lobby);
        assert_eq!(connect, "+connect_lobby 109775241021923456");
        assert_eq!(parse_connect_lobby(&connect), Some(lobby));
    }

    #[test]
    fn connect_string_requires_prefix() {
        assert_eq!(parse_connect_lobby("12345"), None);
        assert_eq!(parse_connect_lobby("+connect_lobby"), None);
        assert_eq!(
            parse_connect_lobby("-foo +connect_lobby 77"),
            Some(LobbyId::new(77))
        );
    }

    #[test]
    fn handshake_is_single_zero_byte() {
        assert!(is_handshake(&[0]));
        assert!(!is_handshake(&[0, 0]));
        assert!(!is_handshake(&[1]));
        assert!(!is_handshake(&[]));
    }
}
