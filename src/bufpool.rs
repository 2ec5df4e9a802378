use parking_lot::Mutex;

/// Bounded cache of reusable response buffers. Bencoded announce/scrape
/// responses are small and produced on every hot-path request; reusing their
/// backing allocation instead of allocating fresh on every request is a
/// measurable throughput win under load.
///
/// `take`/`give` never block: under contention or when the pool is empty,
/// `take` simply allocates. Buffers larger than `SOFT_MAX_CAPACITY` are
/// dropped instead of returned to the pool, so one oversized response
/// doesn't pin a huge allocation in the cache forever.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl BufferPool {
    /// Buffers larger than this are dropped on `give` rather than pooled.
    const SOFT_MAX_CAPACITY: usize = 16 * 1024;

    pub fn new(capacity: usize) -> Self {
        BufferPool {
            buffers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Returns an empty, zero-length buffer ready to be written into.
    pub fn take(&self) -> Vec<u8> {
        match self.buffers.lock().pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => Vec::with_capacity(512),
        }
    }

    /// Returns a buffer to the pool for reuse, unless it's grown too large
    /// or the pool is already at capacity.
    pub fn give(&self, buf: Vec<u8>) {
        if buf.capacity() > Self::SOFT_MAX_CAPACITY {
            return;
        }

        let mut buffers = self.buffers.lock();

        if buffers.len() < self.capacity {
            buffers.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reused_buffer_is_cleared() {
        let pool = BufferPool::new(4);
        let mut buf = pool.take();
        buf.extend_from_slice(b"hello");
        pool.give(buf);

        let buf = pool.take();
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_buffer_is_not_pooled() {
        let pool = BufferPool::new(4);
        let big = vec![0u8; BufferPool::SOFT_MAX_CAPACITY + 1];
        pool.give(big);

        let buffers = pool.buffers.lock();
        assert!(buffers.is_empty());
    }

    #[test]
    fn pool_respects_capacity() {
        let pool = BufferPool::new(1);
        pool.give(Vec::new());
        pool.give(Vec::new());

        assert_eq!(pool.buffers.lock().len(), 1);
    }
}
