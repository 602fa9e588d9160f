//! Bidirectional ConnId <-> PeerId mapping owned by one transport.

use std::collections::{BTreeMap, HashMap};

use shared::{ConnId, ConnIdAllocator, PeerId};

/// Open connections of a hosting transport.
///
/// Both directions are kept in lockstep: a peer is bound to at most one
/// ConnId and a ConnId to at most one peer.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    by_conn: BTreeMap<ConnId, PeerId>,
    by_peer: HashMap<PeerId, ConnId>,
    ids: ConnIdAllocator,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conn_for(&self, peer: PeerId) -> Option<ConnId> {
        self.by_peer.get(&peer).copied()
    }

    pub fn peer_for(&self, conn: ConnId) -> Option<PeerId> {
        self.by_conn.get(&conn).copied()
    }

    pub fn contains(&self, conn: ConnId) -> bool {
        self.by_conn.contains_key(&conn)
    }

    /// Returns the peer's ConnId, allocating a fresh one if it has none.
    /// The flag is `true` when a new binding was created.
    pub fn get_or_insert(&mut self, peer: PeerId) -> (ConnId, bool) {
        if let Some(conn) = self.conn_for(peer) {
            return (conn, false);
        }
        let conn = self.ids.next();
        self.by_conn.insert(conn, peer);
        self.by_peer.insert(peer, conn);
        (conn, true)
    }

    pub fn remove(&mut self, conn: ConnId) -> Option<PeerId> {
        let peer = self.by_conn.remove(&conn)?;
        self.by_peer.remove(&peer);
        Some(peer)
    }

    /// Removes every binding and rewinds the ConnId counter.
    pub fn drain(&mut self) -> Vec<(ConnId, PeerId)> {
        let entries = std::mem::take(&mut self.by_conn).into_iter().collect();
        self.by_peer.clear();
        self.ids.reset();
        entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnId, PeerId)> + '_ {
        self.by_conn.iter().map(|(conn, peer)| (*conn, *peer))
    }

    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: PeerId = PeerId::new(10);
    const B: PeerId = PeerId::new(20);

    #[test]
    fn binding_is_idempotent_per_peer() {
        let mut table = ConnectionTable::new();
        assert_eq!(table.get_or_insert(A), (ConnId::new(0), true));
        assert_eq!(table.get_or_insert(A), (ConnId::new(0), false));
        assert_eq!(table.get_or_insert(B), (ConnId::new(1), true));
        assert_eq!(table.len(), 2);
        assert_eq!(table.peer_for(ConnId::new(1)), Some(B));
    }

    #[test]
    fn removed_ids_are_not_reused_until_drain() {
        let mut table = ConnectionTable::new();
        let (first, _) = table.get_or_insert(A);
        assert_eq!(table.remove(first), Some(A));
        assert_eq!(table.conn_for(A), None);

        let (second, _) = table.get_or_insert(A);
        assert_ne!(first, second);

        assert_eq!(table.drain(), vec![(second, A)]);
        assert!(table.is_empty());
        assert_eq!(table.get_or_insert(B), (ConnId::new(0), true));
    }
}
