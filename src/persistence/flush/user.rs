use sqlx::{MySql, MySqlPool, QueryBuilder};

use crate::persistence::queue::{Batch, Flushable, Mergeable};

#[derive(Clone)]
pub struct UserUpdate {
    pub user_id: u32,
    pub uploaded_delta: u64,
    pub downloaded_delta: u64,
}

impl Mergeable for UserUpdate {
    fn merge(&mut self, new: &Self) {
        self.uploaded_delta = self.uploaded_delta.saturating_add(new.uploaded_delta);
        self.downloaded_delta = self.downloaded_delta.saturating_add(new.downloaded_delta);
    }
}

impl Flushable for Batch<u32, UserUpdate> {
    async fn flush_to_db(&self, pool: &MySqlPool) -> Result<u64, sqlx::Error> {
        if self.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<MySql> =
            QueryBuilder::new("INSERT INTO users (id, uploaded, downloaded) ");

        query
            .push_values(self.values(), |mut bind, update| {
                bind.push_bind(update.user_id)
                    .push_bind(update.uploaded_delta)
                    .push_bind(update.downloaded_delta);
            })
            .push(
                " ON DUPLICATE KEY UPDATE \
                    uploaded = uploaded + VALUES(uploaded), \
                    downloaded = downloaded + VALUES(downloaded)",
            );

        query
            .build()
            .persistent(false)
            .execute(pool)
            .await
            .map(|result| result.rows_affected())
    }
}
