pub mod flush;
pub mod queue;
pub mod reload;

pub use reload::{reload_torrents, reload_users, reload_whitelist};

use parking_lot::Mutex;
use sqlx::MySqlPool;

use flush::{
    slot::SlotUpdate, snatch::SnatchUpdate, torrent::TorrentUpdate,
    transfer_history::TransferHistoryUpdate, user::UserUpdate,
};
use queue::Queue;

/// Every queued stream of pending database writes, drained on a timer by
/// `scheduler::handle`. Mirrors the reference's `Queues` aggregate, with one
/// stream added (`snatches`) and one made optional (`transfer_history`).
pub struct Streams {
    pub torrents: Mutex<Queue<u32, TorrentUpdate>>,
    pub users: Mutex<Queue<u32, UserUpdate>>,
    pub slots: Mutex<Queue<u32, SlotUpdate>>,
    pub snatches: Mutex<Queue<u64, SnatchUpdate>>,
    pub transfer_history: Mutex<Queue<u64, TransferHistoryUpdate>>,
}

impl Streams {
    pub fn new(batch_size: usize) -> Streams {
        Streams {
            torrents: Mutex::new(Queue::new(batch_size)),
            users: Mutex::new(Queue::new(batch_size)),
            slots: Mutex::new(Queue::new(batch_size)),
            snatches: Mutex::new(Queue::new(batch_size)),
            transfer_history: Mutex::new(Queue::new(batch_size)),
        }
    }

    /// Flushes every stream to the database, each stream independently
    /// bounded by `max_attempts` consecutive failures before a batch is
    /// dropped and logged.
    pub async fn flush(&self, pool: &MySqlPool, max_attempts: u8) {
        tokio::join!(
            queue::flush(&self.torrents, pool, max_attempts, "torrents"),
            queue::flush(&self.users, pool, max_attempts, "users"),
            queue::flush(&self.slots, pool, max_attempts, "slots"),
            queue::flush(&self.snatches, pool, max_attempts, "snatches"),
            queue::flush(&self.transfer_history, pool, max_attempts, "transfer_history"),
        );
    }

    pub fn are_any_not_empty(&self) -> bool {
        !self.torrents.lock().is_empty()
            || !self.users.lock().is_empty()
            || !self.slots.lock().is_empty()
            || !self.snatches.lock().is_empty()
            || !self.transfer_history.lock().is_empty()
    }
}
