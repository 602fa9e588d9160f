//! Strongly typed identifiers for connections, peers and lobbies.

use std::{fmt, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name($inner);

        impl $name {
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<$inner>().map(Self)
            }
        }
    };
}

id_type!(
    /// Small per-transport identifier of an open connection.
    ConnId(u32)
);
id_type!(
    /// Opaque 64-bit network identity of a participant (a Steam ID in practice).
    PeerId(u64)
);
id_type!(
    /// Identifier of a group in the membership service.
    LobbyId(u64)
);

/// Monotonic ConnId counter.
///
/// Values are never handed out twice until [`ConnIdAllocator::reset`] is called,
/// which the transport only does once every connection has been torn down.
#[derive(Debug, Clone)]
pub struct ConnIdAllocator {
    start: u32,
    next: u32,
}

impl ConnIdAllocator {
    pub const fn new(start: u32) -> Self {
        Self { start, next: start }
    }

    #[inline]
    pub fn next(&mut self) -> ConnId {
        let id = ConnId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }

    /// Returns the id the next call to [`ConnIdAllocator::next`] will produce.
    pub fn peek(&self) -> ConnId {
        ConnId(self.next)
    }

    pub fn reset(&mut self) {
        self.next = self.start;
    }
}

impl Default for ConnIdAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}
