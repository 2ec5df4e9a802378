use sqlx::{MySql, MySqlPool, QueryBuilder};

use crate::persistence::queue::{Batch, Flushable, Mergeable};

/// Recount of a user's currently-active leeching slots. Unlike the delta
/// streams this is a last-write-wins snapshot, not an accumulator: the
/// in-memory `num_leeching` counter is already authoritative, this just
/// mirrors its current value out to the database.
#[derive(Clone)]
pub struct SlotUpdate {
    pub user_id: u32,
    pub active_leech_count: u32,
}

impl Mergeable for SlotUpdate {
    fn merge(&mut self, new: &Self) {
        self.active_leech_count = new.active_leech_count;
    }
}

impl Flushable for Batch<u32, SlotUpdate> {
    async fn flush_to_db(&self, pool: &MySqlPool) -> Result<u64, sqlx::Error> {
        if self.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<MySql> =
            QueryBuilder::new("INSERT INTO users (id, active_leech_count) ");

        query
            .push_values(self.values(), |mut bind, update| {
                bind.push_bind(update.user_id)
                    .push_bind(update.active_leech_count);
            })
            .push(" ON DUPLICATE KEY UPDATE active_leech_count = VALUES(active_leech_count)");

        query
            .build()
            .persistent(false)
            .execute(pool)
            .await
            .map(|result| result.rows_affected())
    }
}
