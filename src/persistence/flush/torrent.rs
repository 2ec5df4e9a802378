use sqlx::{MySql, MySqlPool, QueryBuilder};

use crate::persistence::queue::{Batch, Flushable, Mergeable};

#[derive(Clone)]
pub struct TorrentUpdate {
    pub torrent_id: u32,
    pub seeder_delta: i32,
    pub leecher_delta: i32,
    pub snatch_delta: u32,
}

impl Mergeable for TorrentUpdate {
    fn merge(&mut self, new: &Self) {
        self.seeder_delta = self.seeder_delta.saturating_add(new.seeder_delta);
        self.leecher_delta = self.leecher_delta.saturating_add(new.leecher_delta);
        self.snatch_delta = self.snatch_delta.saturating_add(new.snatch_delta);
    }
}

impl Flushable for Batch<u32, TorrentUpdate> {
    async fn flush_to_db(&self, pool: &MySqlPool) -> Result<u64, sqlx::Error> {
        if self.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<MySql> = QueryBuilder::new(
            "INSERT INTO torrents (id, seeders, leechers, snatched) ",
        );

        query
            .push_values(self.values(), |mut bind, update| {
                bind.push_bind(update.torrent_id)
                    .push_bind(update.seeder_delta)
                    .push_bind(update.leecher_delta)
                    .push_bind(update.snatch_delta);
            })
            .push(
                " ON DUPLICATE KEY UPDATE \
                    seeders = seeders + VALUES(seeders), \
                    leechers = leechers + VALUES(leechers), \
                    snatched = snatched + VALUES(snatched)",
            );

        query
            .build()
            .persistent(false)
            .execute(pool)
            .await
            .map(|result| result.rows_affected())
    }
}
