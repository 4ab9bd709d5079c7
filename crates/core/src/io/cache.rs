//! Shared LRU cache for decoded raster blocks.
//!
//! Raster files never change while the service runs, so decoded blocks can
//! be shared read-only across every in-flight request. Concurrent misses on
//! the same block collapse to a single fill: the first reader marks the
//! block in-flight and decodes it, later readers wait on a condvar and pick
//! up the populated entry.

use crate::error::Result;
use lru::LruCache;
use ndarray::Array2;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex};

/// Key for cached blocks: raster identity plus block grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub raster_id: u64,
    pub block_row: usize,
    pub block_col: usize,
}

struct CacheState {
    blocks: LruCache<BlockKey, Arc<Array2<f64>>>,
    in_flight: HashSet<BlockKey>,
}

/// Concurrency-safe cache of decoded blocks, shared by all requests.
pub struct BlockCache {
    state: Mutex<CacheState>,
    filled: Condvar,
}

impl BlockCache {
    /// Create a cache holding up to `capacity` decoded blocks.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            state: Mutex::new(CacheState {
                blocks: LruCache::new(cap),
                in_flight: HashSet::new(),
            }),
            filled: Condvar::new(),
        }
    }

    /// Fetch a block from the cache, or decode it via `fill`.
    ///
    /// `fill` runs outside the cache lock, so slow decompression or I/O for
    /// one block never stalls hits on other blocks. A fill that fails clears
    /// the in-flight mark so waiting readers retry it themselves.
    pub fn get_or_fill<F>(&self, key: BlockKey, fill: F) -> Result<Arc<Array2<f64>>>
    where
        F: FnOnce() -> Result<Array2<f64>>,
    {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(block) = state.blocks.get(&key) {
                return Ok(Arc::clone(block));
            }
            if !state.in_flight.contains(&key) {
                break;
            }
            state = self.filled.wait(state).unwrap();
        }

        state.in_flight.insert(key);
        drop(state);

        let outcome = fill();

        let mut state = self.state.lock().unwrap();
        state.in_flight.remove(&key);

        let result = match outcome {
            Ok(data) => {
                let block = Arc::new(data);
                state.blocks.put(key, Arc::clone(&block));
                Ok(block)
            }
            Err(e) => Err(e),
        };

        drop(state);
        self.filled.notify_all();
        result
    }

    /// Number of blocks currently cached.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
