//! The page cache (consumed, §6): `get_and_pin`, `get_and_pin_nonblocking`,
//! `unpin`, `prefetch`, `put`, `unpin_and_remove`, plus the callbacks it
//! invokes on a node (`flush`, `fetch`, `partial_evict`,
//! `partial_fetch_required`, `partial_fetch`). The cache's own eviction
//! policy and writer threads are out of scope (§1); this module only
//! provides the trait boundary plus a deterministic in-memory stand-in
//! sufficient to drive descent, pin/unpin, and the `TRY_AGAIN` retry
//! protocol (§5) in tests.

use std::{collections::HashMap, sync::atomic::{AtomicBool, Ordering}};

use parking_lot::{RawRwLock, RwLock};
use parking_lot::lock_api::{RwLockReadGuard, RwLockWriteGuard};

use crate::{block::BlockNum, error::Error};

/// Which pin discipline is requested (§5): `Blocking` may wait for I/O;
/// `NonBlocking` must fail with [`Error::TryAgain`] rather than perform I/O
/// while the caller already holds other pins on this thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Blocking,
    NonBlocking,
}

/// The page cache's view of node residency and callbacks (§6).
pub trait PageCache<N> {
    fn get_and_pin(&self, block: BlockNum, mode: PinMode) -> Result<(), Error>;
    fn unpin(&self, block: BlockNum, dirty: bool);
    fn unpin_and_remove(&self, block: BlockNum);
    fn prefetch(&self, block: BlockNum);
    fn put(&self, block: BlockNum, node: N);

    fn with_read<R>(&self, block: BlockNum, f: impl FnOnce(&N) -> R) -> Option<R>;
    fn with_write<R>(&self, block: BlockNum, f: impl FnOnce(&mut N) -> R) -> Option<R>;
}

struct Slot<N> {
    node: RwLock<N>,
    pins: std::sync::atomic::AtomicU32,
}

/// Deterministic in-memory reference cache. All nodes are always resident
/// (no real eviction, no real I/O), so `PinMode::Blocking` never actually
/// blocks. `force_try_again` lets tests exercise the `TRY_AGAIN` retry path
/// (§5, scenario S6) without a real cache's eviction race.
pub struct InMemoryPageCache<N> {
    slots: RwLock<HashMap<BlockNum, Slot<N>>>,
    force_try_again_once: AtomicBool,
}

impl<N> Default for InMemoryPageCache<N> {
    fn default() -> Self {
        InMemoryPageCache {
            slots: RwLock::new(HashMap::new()),
            force_try_again_once: AtomicBool::new(false),
        }
    }
}

impl<N> InMemoryPageCache<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the *next* nonblocking pin attempt to fail with
    /// `TRY_AGAIN`, simulating the cache needing I/O while other pins are
    /// held (§5, scenario S6).
    pub fn arm_try_again(&self) {
        self.force_try_again_once.store(true, Ordering::SeqCst);
    }
}

impl<N> PageCache<N> for InMemoryPageCache<N> {
    fn get_and_pin(&self, block: BlockNum, mode: PinMode) -> Result<(), Error> {
        if mode == PinMode::NonBlocking
            && self
                .force_try_again_once
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(Error::TryAgain);
        }
        let slots = self.slots.read();
        match slots.get(&block) {
            Some(slot) => {
                slot.pins.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(Error::Inval(format!("unknown block {block}"))),
        }
    }

    fn unpin(&self, block: BlockNum, _dirty: bool) {
        let slots = self.slots.read();
        if let Some(slot) = slots.get(&block) {
            slot.pins.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn unpin_and_remove(&self, block: BlockNum) {
        self.slots.write().remove(&block);
    }

    fn prefetch(&self, _block: BlockNum) {}

    fn put(&self, block: BlockNum, node: N) {
        self.slots.write().insert(
            block,
            Slot {
                node: RwLock::new(node),
                pins: std::sync::atomic::AtomicU32::new(0),
            },
        );
    }

    fn with_read<R>(&self, block: BlockNum, f: impl FnOnce(&N) -> R) -> Option<R> {
        let slots = self.slots.read();
        slots.get(&block).map(|slot| {
            let guard: RwLockReadGuard<'_, RawRwLock, N> = slot.node.read();
            f(&guard)
        })
    }

    fn with_write<R>(&self, block: BlockNum, f: impl FnOnce(&mut N) -> R) -> Option<R> {
        let slots = self.slots.read();
        slots.get(&block).map(|slot| {
            let mut guard: RwLockWriteGuard<'_, RawRwLock, N> = slot.node.write();
            f(&mut guard)
        })
    }
}
