use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use sqlx::{MySql, MySqlPool, QueryBuilder};

use crate::persistence::queue::{Batch, Flushable, Mergeable};

/// Snatches are append-only events, not merge-on-key deltas: the key
/// includes a monotonic sequence number so that two snatches from the same
/// user/torrent pair between flushes are never collapsed into one row.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone)]
pub struct SnatchUpdate {
    pub user_id: u32,
    pub torrent_id: u32,
    pub snatched_at: DateTime<Utc>,
}

impl Mergeable for SnatchUpdate {
    fn merge(&mut self, _new: &Self) {
        // Unreachable in practice: every key carries a unique sequence
        // number, so no two records ever merge.
    }
}

impl Flushable for Batch<u64, SnatchUpdate> {
    async fn flush_to_db(&self, pool: &MySqlPool) -> Result<u64, sqlx::Error> {
        if self.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<MySql> =
            QueryBuilder::new("INSERT INTO snatches (user_id, torrent_id, snatched_at) ");

        query.push_values(self.values(), |mut bind, update| {
            bind.push_bind(update.user_id)
                .push_bind(update.torrent_id)
                .push_bind(update.snatched_at);
        });

        query
            .build()
            .persistent(false)
            .execute(pool)
            .await
            .map(|result| result.rows_affected())
    }
}
