use chrono::{DateTime, Utc};
use sqlx::{MySql, MySqlPool, QueryBuilder};

use crate::persistence::queue::{Batch, Flushable, Mergeable};

/// One raw upload/download sample for a user/torrent pair, kept only when
/// `Config::extended_accounting_enabled` is set. Append-only, keyed by
/// sequence number for the same reason as [`super::snatch::SnatchUpdate`].
#[derive(Clone)]
pub struct TransferHistoryUpdate {
    pub user_id: u32,
    pub torrent_id: u32,
    pub uploaded_delta: u64,
    pub downloaded_delta: u64,
    pub recorded_at: DateTime<Utc>,
}

impl Mergeable for TransferHistoryUpdate {
    fn merge(&mut self, _new: &Self) {}
}

impl Flushable for Batch<u64, TransferHistoryUpdate> {
    async fn flush_to_db(&self, pool: &MySqlPool) -> Result<u64, sqlx::Error> {
        if self.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<MySql> = QueryBuilder::new(
            "INSERT INTO transfer_history (user_id, torrent_id, uploaded, downloaded, recorded_at) ",
        );

        query.push_values(self.values(), |mut bind, update| {
            bind.push_bind(update.user_id)
                .push_bind(update.torrent_id)
                .push_bind(update.uploaded_delta)
                .push_bind(update.downloaded_delta)
                .push_bind(update.recorded_at);
        });

        query
            .build()
            .persistent(false)
            .execute(pool)
            .await
            .map(|result| result.rows_affected())
    }
}
