//! Block storage
//!
//! The store hands out `Arc<SampleBlock>`; a block lives as long as any
//! sequence (or cut line, or clipboard copy) still references it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use cf_core::{CfError, CfResult, EngineConfig, Sample, SampleFormat};

use crate::block::{BlockId, SampleBlock};

/// Dead map entries are purged after this many insertions
const PURGE_INTERVAL: usize = 256;

/// Block-addressed sample storage
pub trait SampleBlockStore: Send + Sync + fmt::Debug {
    /// Write a new block holding `samples` in `format`
    fn create_block(&self, samples: &[Sample], format: SampleFormat) -> CfResult<Arc<SampleBlock>>;

    /// Write a new block of `len` zero samples
    fn create_silent(&self, len: usize, format: SampleFormat) -> CfResult<Arc<SampleBlock>>;

    /// Look up a live block by id (used when loading projects)
    fn find_block(&self, id: BlockId) -> Option<Arc<SampleBlock>>;

    /// Number of blocks still referenced somewhere
    fn live_block_count(&self) -> usize;

    /// Encoded bytes held by live blocks
    fn live_bytes(&self) -> usize;
}

// ═══════════════════════════════════════════════════════════════════════════
// MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct StoreState {
    blocks: HashMap<BlockId, Weak<SampleBlock>>,
    inserts_since_purge: usize,
    /// Writes allowed before injected failures start
    fail_after: Option<usize>,
}

/// In-memory block store
pub struct MemoryBlockStore {
    tile_samples: usize,
    next_id: AtomicU64,
    state: Mutex<StoreState>,
}

impl MemoryBlockStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            tile_samples: config.summary_tile_samples.max(1),
            next_id: AtomicU64::new(1),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Let `writes` more block writes succeed, then fail every write
    pub fn fail_after(&self, writes: usize) {
        self.state.lock().fail_after = Some(writes);
    }

    pub fn clear_failure(&self) {
        self.state.lock().fail_after = None;
    }

    fn insert(&self, build: impl FnOnce(BlockId) -> SampleBlock) -> CfResult<Arc<SampleBlock>> {
        let mut state = self.state.lock();
        match state.fail_after {
            Some(0) => {
                log::warn!("[BlockStore] Injected write failure");
                return Err(CfError::Store("block write failed".into()));
            }
            Some(n) => state.fail_after = Some(n - 1),
            None => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let block = Arc::new(build(id));
        state.blocks.insert(id, Arc::downgrade(&block));

        state.inserts_since_purge += 1;
        if state.inserts_since_purge >= PURGE_INTERVAL {
            state.blocks.retain(|_, weak| weak.strong_count() > 0);
            state.inserts_since_purge = 0;
        }
        Ok(block)
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl fmt::Debug for MemoryBlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlockStore")
            .field("tile_samples", &self.tile_samples)
            .field("live_blocks", &self.live_block_count())
            .finish()
    }
}

impl SampleBlockStore for MemoryBlockStore {
    fn create_block(&self, samples: &[Sample], format: SampleFormat) -> CfResult<Arc<SampleBlock>> {
        if samples.is_empty() {
            return Err(CfError::inconsistency("empty block"));
        }
        self.insert(|id| SampleBlock::build(id, samples, format, self.tile_samples))
    }

    fn create_silent(&self, len: usize, format: SampleFormat) -> CfResult<Arc<SampleBlock>> {
        if len == 0 {
            return Err(CfError::inconsistency("empty block"));
        }
        self.insert(|id| SampleBlock::silent(id, len, format, self.tile_samples))
    }

    fn find_block(&self, id: BlockId) -> Option<Arc<SampleBlock>> {
        self.state.lock().blocks.get(&id).and_then(Weak::upgrade)
    }

    fn live_block_count(&self) -> usize {
        let mut state = self.state.lock();
        state.blocks.retain(|_, weak| weak.strong_count() > 0);
        state.blocks.len()
    }

    fn live_bytes(&self) -> usize {
        self.state
            .lock()
            .blocks
            .values()
            .filter_map(Weak::upgrade)
            .map(|b| b.byte_len())
            .sum()
    }
}
