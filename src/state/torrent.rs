use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;

use super::{ids::InfoHash, peer::PeerTable};

/// A torrent's moderation status. An `Active` torrent accepts announces; the
/// others refuse them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TorrentStatus {
    Pending,
    Active,
    Deleted,
    #[default]
    Unknown,
}

impl TorrentStatus {
    pub fn from_i16(value: i16) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Active,
            2 => Self::Deleted,
            _ => Self::Unknown,
        }
    }
}

pub struct Torrent {
    pub id: u32,
    pub info_hash: InfoHash,
    pub status: TorrentStatus,
    pub snatched: u32,
    pub last_action: DateTime<Utc>,
    pub seeders: u32,
    pub leechers: u32,
    pub peers: PeerTable,
}

impl Torrent {
    pub fn new(id: u32, info_hash: InfoHash, status: TorrentStatus) -> Self {
        Torrent {
            id,
            info_hash,
            status,
            snatched: 0,
            last_action: Utc::now(),
            seeders: 0,
            leechers: 0,
            peers: PeerTable::new(),
        }
    }
}

/// All known torrents, keyed by their numeric id. Each torrent is guarded by
/// its own mutex (spec's "per-torrent mutex", acquired only while the
/// outer map's read lock is held, so the map itself is stable for the
/// duration of an announce).
pub struct TorrentMap(pub IndexMap<u32, Arc<Mutex<Torrent>>>);

impl TorrentMap {
    pub fn new() -> Self {
        TorrentMap(IndexMap::new())
    }
}

impl Default for TorrentMap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TorrentMap {
    type Target = IndexMap<u32, Arc<Mutex<Torrent>>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for TorrentMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Maps an info hash to the numeric torrent id, so the hot announce path
/// doesn't need to hash a 20-byte key against the whole torrent map twice.
#[derive(Default)]
pub struct InfoHash2Id(pub IndexMap<InfoHash, u32>);

impl std::ops::Deref for InfoHash2Id {
    type Target = IndexMap<InfoHash, u32>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for InfoHash2Id {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
