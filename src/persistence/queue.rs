use std::{cmp::min, collections::VecDeque, hash::Hash};

use parking_lot::Mutex;
use sqlx::MySqlPool;
use tokio::time::Instant;

/// Merges a newly-queued record into an already-queued one for the same key.
/// Two updates for the same key arriving between flushes collapse into one
/// row instead of producing two writes.
pub trait Mergeable {
    fn merge(&mut self, new: &Self);
}

/// Flushes one batch of queued records to the database.
pub trait Flushable {
    async fn flush_to_db(&self, pool: &MySqlPool) -> Result<u64, sqlx::Error>;
}

/// A merge-on-key queue of pending database updates, keyed by `K`.
///
/// `backing_off` holds batches that failed a flush, each tagged with the
/// number of flush cycles still left to wait before it's eligible to try
/// again. Keeping them separate from `records` means a back-off delay is
/// actually enforced rather than erased the moment a fresh upsert for the
/// same key merges into it.
pub struct Queue<K, V> {
    records: indexmap::IndexMap<K, V>,
    backing_off: VecDeque<(u32, Batch<K, V>)>,
    batch_size: usize,
}

impl<K, V> Queue<K, V>
where
    K: Hash + Eq,
    V: Mergeable,
{
    pub fn new(batch_size: usize) -> Self {
        Queue {
            records: indexmap::IndexMap::new(),
            backing_off: VecDeque::new(),
            batch_size,
        }
    }

    pub fn upsert(&mut self, key: K, value: V) {
        self.records
            .entry(key)
            .and_modify(|existing| existing.merge(&value))
            .or_insert(value);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.backing_off.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.backing_off.iter().map(|(_, b)| b.len()).sum::<usize>()
    }

    /// Drains the whole queue into batches no larger than `batch_size`.
    ///
    /// Every call ticks the back-off clock forward by one flush cycle: a
    /// batch whose wait has elapsed is returned for another flush attempt,
    /// ahead of freshly-drained records; one that's still waiting is kept
    /// back for a later call.
    pub fn take_batches(&mut self) -> VecDeque<Batch<K, V>> {
        let mut batches = VecDeque::new();

        for (remaining, batch) in self.backing_off.drain(..).collect::<Vec<_>>() {
            if remaining <= 1 {
                batches.push_back(batch);
            } else {
                self.backing_off.push_back((remaining - 1, batch));
            }
        }

        let mut drained: Vec<(K, V)> = self.records.drain(..).collect();

        while !drained.is_empty() {
            let split_at = drained.len() - min(drained.len(), self.batch_size);
            let chunk = drained.split_off(split_at);
            batches.push_back(Batch {
                records: chunk,
                attempts: 0,
            });
        }

        batches
    }

    /// Holds `batch` back from the queue's live records for `2^attempts`
    /// flush cycles before it becomes eligible to flush again.
    fn back_off(&mut self, batch: Batch<K, V>) {
        let delay = 1u32.checked_shl(batch.attempts as u32).unwrap_or(u32::MAX);
        self.backing_off.push_back((delay, batch));
    }
}

/// One drained slice of a [`Queue`], tagged with the number of times a flush
/// of this exact batch has failed.
pub struct Batch<K, V> {
    records: Vec<(K, V)>,
    attempts: u8,
}

impl<K, V> Batch<K, V> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.records.iter().map(|(_, v)| v)
    }
}

/// Drains `queue`, flushes every resulting batch, and backs off batches that
/// fail for `2^attempts` flush cycles before they're eligible again, until
/// `max_attempts` is reached, at which point the batch is dropped and
/// logged rather than retried forever.
pub async fn flush<K, V>(queue: &Mutex<Queue<K, V>>, pool: &MySqlPool, max_attempts: u8, label: &str)
where
    K: Hash + Eq,
    V: Mergeable,
    Batch<K, V>: Flushable,
{
    let batches = queue.lock().take_batches();

    if batches.is_empty() {
        return;
    }

    for mut batch in batches {
        let start = Instant::now();
        let len = batch.len();

        match batch.flush_to_db(pool).await {
            Ok(rows) => {
                tracing::info!(
                    stream = label,
                    records = len,
                    rows_affected = rows,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "flushed batch"
                );
            }
            Err(err) => {
                batch.attempts += 1;

                if batch.attempts >= max_attempts {
                    tracing::warn!(
                        stream = label,
                        records = len,
                        attempts = batch.attempts,
                        error = %err,
                        "dropping batch after exceeding max flush attempts"
                    );
                } else {
                    let delay = 1u32.checked_shl(batch.attempts as u32).unwrap_or(u32::MAX);
                    tracing::warn!(
                        stream = label,
                        records = len,
                        attempts = batch.attempts,
                        delay_flush_cycles = delay,
                        error = %err,
                        "flush failed, backing off batch"
                    );
                    queue.lock().back_off(batch);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Counter(u32);

    impl Mergeable for Counter {
        fn merge(&mut self, new: &Self) {
            self.0 += new.0;
        }
    }

    #[test]
    fn fresh_upserts_are_immediately_batchable() {
        let mut queue: Queue<u32, Counter> = Queue::new(10);
        queue.upsert(1, Counter(1));

        let batches = queue.take_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn backed_off_batch_is_withheld_for_two_to_the_attempts_cycles() {
        let mut queue: Queue<u32, Counter> = Queue::new(10);

        let batch = Batch {
            records: vec![(1, Counter(1))],
            attempts: 2,
        };
        queue.back_off(batch);

        // delay = 2^2 = 4 cycles: the batch must stay withheld for three
        // more take_batches calls and only reappear on the fourth.
        for _ in 0..3 {
            assert!(queue.take_batches().is_empty());
        }

        let ready = queue.take_batches();
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn backing_off_batches_count_toward_len_and_is_empty() {
        let mut queue: Queue<u32, Counter> = Queue::new(10);
        assert!(queue.is_empty());

        let batch = Batch {
            records: vec![(1, Counter(1)), (2, Counter(2))],
            attempts: 1,
        };
        queue.back_off(batch);

        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn fresh_records_flush_ahead_of_a_batch_still_backing_off() {
        let mut queue: Queue<u32, Counter> = Queue::new(10);

        queue.back_off(Batch {
            records: vec![(1, Counter(1))],
            attempts: 3,
        });
        queue.upsert(2, Counter(2));

        let ready = queue.take_batches();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].len(), 1);
        assert_eq!(ready[0].values().next().unwrap().0, 2);
    }
}
