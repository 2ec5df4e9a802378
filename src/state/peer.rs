use std::net::IpAddr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::ids::PeerId;

/// Identity of a peer within one torrent's swarm. Deliberately keyed by
/// `(user_id, peer_id)` rather than `peer_id` alone, so multiple users
/// sharing one client behind NAT don't collide.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub user_id: u32,
    pub peer_id: PeerId,
}

/// One peer's session state against one torrent.
#[derive(Clone, Copy)]
pub struct Peer {
    pub ip_address: IpAddr,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub is_seeder: bool,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub has_completed: bool,
}

impl Peer {
    /// Whether this peer belongs in a peer list handed out to other clients.
    /// Inactive peers (marked by the reaper but not yet evicted) are
    /// withheld without being fully removed, so their accounting survives a
    /// brief network outage.
    #[inline]
    pub fn is_included_in_peer_list(&self) -> bool {
        self.is_active
    }

    #[inline]
    pub fn is_included_in_seed_list(&self) -> bool {
        self.is_seeder && self.is_included_in_peer_list()
    }

    #[inline]
    pub fn is_included_in_leech_list(&self) -> bool {
        !self.is_seeder && self.is_included_in_peer_list()
    }
}

/// One torrent's swarm: a single table of peers plus the `is_seeder` flag on
/// each entry. A peer transitioning from leecher to seeder therefore can
/// never transiently exist in two tables at once.
#[derive(Clone, Default)]
pub struct PeerTable(pub IndexMap<PeerKey, Peer>);

impl PeerTable {
    pub fn new() -> Self {
        PeerTable(IndexMap::new())
    }
}

impl std::ops::Deref for PeerTable {
    type Target = IndexMap<PeerKey, Peer>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for PeerTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
