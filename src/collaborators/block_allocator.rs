//! The block allocator (consumed, §6): `allocate_block`, `free_block`,
//! `translate`, plus the checkpoint-aware "note start / note end / note
//! skipped / note failed" protocol used during fuzzy checkpointing (§4.7).
//! The free-space map and on-disk translation tables are out of scope (§1);
//! this is a minimal in-memory stand-in.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::block::BlockNum;

pub trait BlockAllocator {
    fn allocate_block(&self) -> BlockNum;
    fn free_block(&self, block: BlockNum);
    fn translate(&self, block: BlockNum) -> Option<u64>;

    fn note_checkpoint_start(&self);
    fn note_checkpoint_end(&self);
    fn note_checkpoint_skipped(&self, block: BlockNum);
    fn note_checkpoint_failed(&self, block: BlockNum);
}

pub struct InMemoryBlockAllocator {
    next: AtomicU64,
    freed: Mutex<Vec<BlockNum>>,
}

impl Default for InMemoryBlockAllocator {
    fn default() -> Self {
        InMemoryBlockAllocator {
            next: AtomicU64::new(1),
            freed: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryBlockAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockAllocator for InMemoryBlockAllocator {
    fn allocate_block(&self) -> BlockNum {
        BlockNum(self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn free_block(&self, block: BlockNum) {
        self.freed.lock().push(block);
    }

    fn translate(&self, block: BlockNum) -> Option<u64> {
        Some(block.0)
    }

    fn note_checkpoint_start(&self) {}
    fn note_checkpoint_end(&self) {}
    fn note_checkpoint_skipped(&self, _block: BlockNum) {}
    fn note_checkpoint_failed(&self, _block: BlockNum) {}
}
