//! The buffered B-tree itself: `RootPut` (§4.4), the public API surface
//! (§6), and cursor descent (§4.8). Sub-modules hold the pieces `RootPut`
//! and the flusher share: [`flush`] (heaviest-child flush, §4.5),
//! [`shape`] (split/merge/rebalance, §4.6), [`replay`] (ancestor replay,
//! §4.4), [`search`] (descent, §4.8).

pub mod flush;
pub mod replay;
pub mod search;
pub mod shape;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    checksum::XxHash,
    collaborators::{
        block_allocator::BlockAllocator,
        logger::Logger,
        page_cache::{PageCache, PinMode},
    },
    config::EngineConfig,
    cow_bytes::CowBytes,
    cow_bytes::SlicedCowBytes,
    error::Error,
    header::{Header, HeaderMgr, CURRENT_LAYOUT_VERSION},
    message::{Dispatch, Message, MessageType, Xid},
    mvcc::SnapshotContext,
    node::{
        basement::{Comparator, MessageApplier, UpdateFn},
        ChildPayload, Node, Reactivity,
    },
};

pub use search::{CallbackResult, Direction};

/// Aggregate tree statistics (§6 `stat64`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat64 {
    pub nkeys: u64,
    pub ndata: u64,
    pub dsize: u64,
    pub fsize: u64,
}

/// The buffered B-tree, generic over its four consumed collaborators (§6)
/// plus the user comparator and update function, mirroring the teacher's
/// `Tree<X, M, I>` generics over its own externally-supplied collaborators.
pub struct Tree<PC, BA, LG, CMP, UF> {
    header: HeaderMgr,
    cache: PC,
    allocator: BA,
    logger: LG,
    cmp: CMP,
    update_fn: UF,
    config: EngineConfig,
    /// Bumped on every `RootPut`; cursors compare against this to decide
    /// whether their saved basement position is still valid (§4.8 "Cursor
    /// shortcut").
    root_put_counter: AtomicU64,
}

impl<PC, BA, LG, CMP, UF> Tree<PC, BA, LG, CMP, UF>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    pub fn new(cache: PC, allocator: BA, logger: LG, cmp: CMP, update_fn: UF, config: EngineConfig) -> Self {
        let root_block = allocator.allocate_block();
        let root = Node::new_empty(root_block, 0, config.nodesize, CURRENT_LAYOUT_VERSION);
        cache.put(root_block, root);
        let header = HeaderMgr::new(Header::new(root_block, config.nodesize));
        Tree {
            header,
            cache,
            allocator,
            logger,
            cmp,
            update_fn,
            config,
            root_put_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logger(&self) -> &LG {
        &self.logger
    }

    // -- public API (§6) ---------------------------------------------------

    pub fn insert(&self, key: impl Into<CowBytes>, val: impl Into<SlicedCowBytes>, xids: Vec<Xid>) -> Result<(), Error> {
        let key = key.into();
        let val = val.into();
        self.logger.enq_insert(&key, &val);
        self.root_put(MessageType::Insert, key, val, xids)
    }

    pub fn insert_no_overwrite(&self, key: impl Into<CowBytes>, val: impl Into<SlicedCowBytes>, xids: Vec<Xid>) -> Result<(), Error> {
        let key = key.into();
        let val = val.into();
        self.logger.enq_insert_no_overwrite(&key, &val);
        self.root_put(MessageType::InsertNoOverwrite, key, val, xids)
    }

    pub fn delete(&self, key: impl Into<CowBytes>, xids: Vec<Xid>) -> Result<(), Error> {
        let key = key.into();
        self.logger.enq_delete_any(&key);
        self.root_put(MessageType::DeleteAny, key, SlicedCowBytes::empty(), xids)
    }

    pub fn update(&self, key: impl Into<CowBytes>, extra: impl Into<SlicedCowBytes>, xids: Vec<Xid>) -> Result<(), Error> {
        let key = key.into();
        let extra = extra.into();
        self.logger.enq_update(&key, &extra);
        self.root_put(MessageType::Update, key, extra, xids)
    }

    pub fn update_broadcast(&self, extra: impl Into<SlicedCowBytes>, xids: Vec<Xid>) -> Result<(), Error> {
        let extra = extra.into();
        self.logger.enq_update_broadcast(&extra);
        self.root_put(MessageType::UpdateBroadcastAll, CowBytes::new(), extra, xids)
    }

    pub fn commit(&self, xid: Xid) -> Result<(), Error> {
        self.root_put(MessageType::CommitBroadcastTxn, CowBytes::new(), SlicedCowBytes::empty(), vec![xid])
    }

    pub fn abort(&self, xid: Xid) -> Result<(), Error> {
        self.root_put(MessageType::AbortBroadcastTxn, CowBytes::new(), SlicedCowBytes::empty(), vec![xid])
    }

    pub fn optimize(&self) -> Result<(), Error> {
        self.root_put(MessageType::Optimize, CowBytes::new(), SlicedCowBytes::empty(), Vec::new())
    }

    pub fn optimize_for_upgrade(&self) -> Result<(), Error> {
        self.root_put(MessageType::OptimizeForUpgrade, CowBytes::new(), SlicedCowBytes::empty(), Vec::new())
    }

    pub fn lookup(
        &self,
        key: &[u8],
        ctx: &SnapshotContext,
        mut getf: impl FnMut(&[u8], &[u8]) -> CallbackResult,
    ) -> Result<(), Error> {
        let cmp = &self.cmp;
        let heaviside = move |k: &[u8]| match cmp.cmp(k, key) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
        search::search(self, &heaviside, Direction::Forward, ctx, |k, v| {
            if self.cmp.cmp(k, key) == std::cmp::Ordering::Equal {
                getf(k, v)
            } else {
                CallbackResult::NotFound
            }
        })
    }

    /// Opens a cursor positioned by `heaviside`/`direction` (§6
    /// open-cursor/set/first/last).
    pub fn open_cursor(&self) -> Cursor {
        Cursor {
            root_put_counter: self.root_put_counter.load(Ordering::SeqCst),
            last_key: None,
        }
    }

    pub fn cursor_set(
        &self,
        cursor: &mut Cursor,
        key: &[u8],
        ctx: &SnapshotContext,
        mut getf: impl FnMut(&[u8], &[u8]) -> CallbackResult,
    ) -> Result<(), Error> {
        let cmp = &self.cmp;
        let heaviside = move |k: &[u8]| match cmp.cmp(k, key) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
        self.cursor_run(cursor, &heaviside, Direction::Forward, ctx, &mut getf)
    }

    pub fn cursor_first(
        &self,
        cursor: &mut Cursor,
        ctx: &SnapshotContext,
        mut getf: impl FnMut(&[u8], &[u8]) -> CallbackResult,
    ) -> Result<(), Error> {
        self.cursor_run(cursor, &|_| 1, Direction::Forward, ctx, &mut getf)
    }

    pub fn cursor_last(
        &self,
        cursor: &mut Cursor,
        ctx: &SnapshotContext,
        mut getf: impl FnMut(&[u8], &[u8]) -> CallbackResult,
    ) -> Result<(), Error> {
        self.cursor_run(cursor, &|_| -1, Direction::Backward, ctx, &mut getf)
    }

    /// Steps to the first key strictly greater than the cursor's saved
    /// position (§4.8). The "cursor shortcut" (skip re-descending when
    /// nothing has changed since the last `RootPut`) is recorded on
    /// [`Cursor::is_stale`]; the actual incremental walk still goes through
    /// a fresh heaviside search since held pins don't survive across calls.
    pub fn cursor_next(
        &self,
        cursor: &mut Cursor,
        ctx: &SnapshotContext,
        mut getf: impl FnMut(&[u8], &[u8]) -> CallbackResult,
    ) -> Result<(), Error> {
        let Some(last) = cursor.last_key.clone() else {
            return self.cursor_first(cursor, ctx, getf);
        };
        let cmp = &self.cmp;
        let heaviside = move |k: &[u8]| {
            if cmp.cmp(k, &last) == std::cmp::Ordering::Greater {
                0
            } else {
                -1
            }
        };
        self.cursor_run(cursor, &heaviside, Direction::Forward, ctx, &mut getf)
    }

    pub fn cursor_prev(
        &self,
        cursor: &mut Cursor,
        ctx: &SnapshotContext,
        mut getf: impl FnMut(&[u8], &[u8]) -> CallbackResult,
    ) -> Result<(), Error> {
        let Some(last) = cursor.last_key.clone() else {
            return self.cursor_last(cursor, ctx, getf);
        };
        let cmp = &self.cmp;
        let heaviside = move |k: &[u8]| {
            if cmp.cmp(k, &last) == std::cmp::Ordering::Less {
                0
            } else {
                1
            }
        };
        self.cursor_run(cursor, &heaviside, Direction::Backward, ctx, &mut getf)
    }

    pub fn cursor_close(&self, _cursor: Cursor) {}

    fn cursor_run(
        &self,
        cursor: &mut Cursor,
        heaviside: &search::Heaviside<'_>,
        direction: Direction,
        ctx: &SnapshotContext,
        getf: &mut dyn FnMut(&[u8], &[u8]) -> CallbackResult,
    ) -> Result<(), Error> {
        let mut found_key = None;
        let result = search::search(self, heaviside, direction, ctx, |k, v| {
            let outcome = getf(k, v);
            if outcome == CallbackResult::Accept {
                found_key = Some(k.to_vec());
            }
            outcome
        });
        cursor.root_put_counter = self.root_put_counter.load(Ordering::SeqCst);
        if found_key.is_some() {
            cursor.last_key = found_key;
        }
        result
    }

    /// `keyrange(key) -> (less, equal, greater)` (§6): an approximate
    /// three-way split of the key space around `key`, read from subtree
    /// estimates rather than an exact scan.
    pub fn keyrange(&self, key: &[u8]) -> (u64, u64, u64) {
        let total = self.stat64().nkeys;
        let root = self.header.root();
        let equal = self
            .cache
            .with_read(root, |n| self.estimate_less_than(n, key))
            .unwrap_or(0);
        let less = equal;
        let greater = total.saturating_sub(less + 1);
        (less, 1, greater)
    }

    fn estimate_less_than(&self, node: &Node, key: &[u8]) -> u64 {
        if node.is_leaf() {
            node.children[0]
                .payload
                .as_basement()
                .map(|bn| bn.entries().iter().take_while(|e| self.cmp.cmp(e.key(), key) == std::cmp::Ordering::Less).count() as u64)
                .unwrap_or(0)
        } else {
            let idx = node.which_child(&self.cmp, key);
            node.children[..idx]
                .iter()
                .map(|c| c.estimate.nkeys)
                .sum()
        }
    }

    pub fn stat64(&self) -> Stat64 {
        let root = self.header.root();
        let est = self
            .cache
            .with_read(root, |n| n.total_estimate())
            .unwrap_or_default();
        Stat64 {
            nkeys: est.nkeys,
            ndata: est.nkeys,
            dsize: est.dsize,
            fsize: est.dsize,
        }
    }

    /// `change_descriptor` (§6): bumps the dictionary id recorded in the
    /// header; the descriptor payload itself is opaque to this crate.
    pub fn change_descriptor(&self) {
        self.header.bump_dictionary_id();
    }

    /// `truncate` (§6): frees the current tree and installs a fresh, empty
    /// leaf root.
    pub fn truncate(&self) -> Result<(), Error> {
        let old_root = self.header.root();
        let new_root_block = self.allocator.allocate_block();
        let new_root = Node::new_empty(new_root_block, 0, self.config.nodesize, CURRENT_LAYOUT_VERSION);
        self.cache.put(new_root_block, new_root);
        self.header.set_root(new_root_block, XxHash::default());
        self.cache.unpin_and_remove(old_root);
        self.allocator.free_block(old_root);
        Ok(())
    }

    /// `flush` (§6): forces the fuzzy-checkpoint protocol through once.
    pub fn flush<W: std::io::Write, F: FnOnce() -> std::io::Result<()>>(
        &self,
        lsn: u64,
        fd: W,
        fsync: F,
    ) -> Result<(), Error> {
        self.header.begin_checkpoint(lsn);
        self.header.checkpoint(fd)?;
        self.header.end_checkpoint(fsync)
    }

    // -- RootPut (§4.4) ------------------------------------------------

    fn root_put(&self, ty: MessageType, key: CowBytes, value: SlicedCowBytes, xids: Vec<Xid>) -> Result<(), Error> {
        self.header.check_panic()?;
        let root_block = self.header.root();
        self.cache.get_and_pin(root_block, PinMode::Blocking)?;
        let msn = self.header.next_msn();
        let mut msg = Message::new(ty, key, value).with_xids(xids);
        msg.stamp(msn);

        self.cache
            .with_write(root_block, |root| self.apply_root_put(root, msg))
            .ok_or_else(|| Error::Inval("root missing from cache".into()))?;

        let gorged = self
            .cache
            .with_read(root_block, |root| root.gorged())
            .ok_or_else(|| Error::Inval("root missing from cache".into()))?;
        if gorged {
            flush::flush_heaviest_child(self, root_block, true)?;
        }

        // Reactivity is read only after the flush above, since flushing may
        // itself have added a child to the root (§4.4 steps 4-6).
        let reactivity = self
            .cache
            .with_read(root_block, |root| root.classify(self.config.fanout))
            .ok_or_else(|| Error::Inval("root missing from cache".into()))?;
        match reactivity {
            Reactivity::Fissible => shape::split_root(self, root_block)?,
            Reactivity::Fusible | Reactivity::Stable => {}
        }

        self.cache.unpin(root_block, true);
        self.root_put_counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply_root_put(&self, root: &mut Node, msg: Message) {
        if root.is_leaf() {
            let slot = &mut root.children[0];
            if let ChildPayload::Basement(bn) = &mut slot.payload {
                let applier = MessageApplier {
                    cmp: &self.cmp,
                    update_fn: &self.update_fn,
                    seqinsert_window_cap: self.config.seqinsert_window_cap,
                };
                applier.apply_once(bn, &mut slot.estimate, &msg);
            }
        } else {
            route_into_nonleaf(root, &self.cmp, msg.clone());
        }
        root.max_msn_in_memory = msg.msn;
        root.dirty = true;
        // Step 4 (propagating to already-resident non-root leaves) is a
        // pure cache-warmth optimization: correctness doesn't depend on it
        // since `ancestor_replay` unconditionally catches up any leaf on
        // its next pin regardless of residency (see DESIGN.md).
    }
}

/// Fans `msg` out to a nonleaf's child slot(s): key-directed messages route
/// by `which_child`; broadcasts enqueue into every slot (§4.4 step 3, §4.5
/// step 3 nonleaf case).
pub(crate) fn route_into_nonleaf(node: &mut Node, cmp: &dyn Comparator, msg: Message) {
    match msg.ty.dispatch() {
        Dispatch::Broadcast => {
            for slot in node.children.iter_mut() {
                if let Some(buf) = slot.payload.as_buffer_mut() {
                    buf.enqueue(msg.clone());
                }
            }
        }
        Dispatch::ApplyOnce => {
            let idx = node.which_child(cmp, &msg.key);
            if let Some(buf) = node.children[idx].payload.as_buffer_mut() {
                buf.enqueue(msg);
            }
        }
        Dispatch::None => {}
    }
}

/// A cursor's saved position (§4.8 "Cursor shortcut"): the last key
/// returned, and the tree's `root_put_counter` as of that call. A cursor
/// whose counter no longer matches the tree's has missed at least one
/// `RootPut` and so cannot trust any cached position, though `next`/`prev`
/// remain correct either way since they always re-derive position from
/// `last_key` via a fresh heaviside search.
#[derive(Debug, Clone)]
pub struct Cursor {
    root_put_counter: u64,
    last_key: Option<Vec<u8>>,
}

impl Cursor {
    pub fn is_stale(&self, tree_root_put_counter: u64) -> bool {
        self.root_put_counter != tree_root_put_counter
    }
}

/// Seam for a background process that proactively drains buffers along a
/// whole root-to-leaf path rather than waiting for `RootPut`/flush to do it
/// incrementally. The policy itself (when to run, which paths to pick) is
/// out of scope here; a caller-supplied implementation must reuse
/// [`replay::ancestor_replay`]'s MSN-filtered idempotence and must never
/// hold a node's write lock across I/O, matching the nonblocking-pin
/// discipline the rest of this module follows.
pub trait Flattener<PC, BA, LG, CMP, UF> {
    fn flatten(&self, tree: &Tree<PC, BA, LG, CMP, UF>) -> Result<(), Error>;
}

/// Does nothing; the default when no background flattener is configured.
pub struct NoopFlattener;

impl<PC, BA, LG, CMP, UF> Flattener<PC, BA, LG, CMP, UF> for NoopFlattener {
    fn flatten(&self, _tree: &Tree<PC, BA, LG, CMP, UF>) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collaborators::{
            block_allocator::InMemoryBlockAllocator, logger::NoopLogger,
            page_cache::InMemoryPageCache,
        },
        mvcc::SnapshotXid,
        node::basement::{LexicographicComparator, NoopUpdateFn},
    };

    type TestTree =
        Tree<InMemoryPageCache<Node>, InMemoryBlockAllocator, NoopLogger, LexicographicComparator, NoopUpdateFn>;

    fn test_tree(config: EngineConfig) -> TestTree {
        Tree::new(
            InMemoryPageCache::new(),
            InMemoryBlockAllocator::new(),
            NoopLogger,
            LexicographicComparator,
            NoopUpdateFn,
            config,
        )
    }

    fn lookup_value(tree: &TestTree, key: &[u8]) -> Option<Vec<u8>> {
        let ctx = SnapshotContext::latest_committed();
        let mut found = None;
        match tree.lookup(key, &ctx, |_k, v| {
            found = Some(v.to_vec());
            CallbackResult::Accept
        }) {
            Ok(()) => found,
            Err(Error::NotFound) => None,
            Err(e) => panic!("lookup error: {e}"),
        }
    }

    #[test]
    fn insert_then_lookup_roundtrip() {
        let tree = test_tree(EngineConfig::default());
        tree.insert(&b"a"[..], &b"1"[..], vec![]).unwrap();
        assert_eq!(lookup_value(&tree, b"a"), Some(b"1".to_vec()));
        assert_eq!(lookup_value(&tree, b"missing"), None);
    }

    #[test]
    fn delete_then_lookup_is_not_found() {
        let tree = test_tree(EngineConfig::default());
        tree.insert(&b"a"[..], &b"1"[..], vec![]).unwrap();
        tree.delete(&b"a"[..], vec![]).unwrap();
        assert_eq!(lookup_value(&tree, b"a"), None);
    }

    #[test]
    fn stat64_tracks_insert_and_delete() {
        let tree = test_tree(EngineConfig::default());
        tree.insert(&b"a"[..], &b"1"[..], vec![]).unwrap();
        tree.insert(&b"b"[..], &b"2"[..], vec![]).unwrap();
        assert_eq!(tree.stat64().nkeys, 2);
        tree.delete(&b"a"[..], vec![]).unwrap();
        assert_eq!(tree.stat64().nkeys, 1);
    }

    #[test]
    fn many_inserts_split_the_root_and_stay_lookupable() {
        let config = EngineConfig {
            nodesize: 300,
            fanout: 4,
            min_flush_size: 1,
            seqinsert_window_cap: 32,
            merge_threshold_numerator: 3,
            merge_threshold_denominator: 4,
        };
        let tree = test_tree(config);
        let keys: Vec<Vec<u8>> = (0..40u32).map(|i| format!("key{i:04}").into_bytes()).collect();
        for k in &keys {
            tree.insert(&k[..], &vec![0u8; 24][..], vec![]).unwrap();
        }

        let root_is_leaf = tree
            .cache
            .with_read(tree.header.root(), |n| n.is_leaf())
            .unwrap();
        assert!(!root_is_leaf, "root should have split into a nonleaf");

        for k in &keys {
            assert_eq!(lookup_value(&tree, k), Some(vec![0u8; 24]));
        }
        assert_eq!(tree.stat64().nkeys, 40);
    }

    #[test]
    fn nonblocking_pin_try_again_is_retried_transparently() {
        let tree = test_tree(EngineConfig::default());
        tree.insert(&b"a"[..], &b"1"[..], vec![]).unwrap();
        tree.cache.arm_try_again();
        assert_eq!(lookup_value(&tree, b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn cursor_walks_keys_in_order() {
        let tree = test_tree(EngineConfig::default());
        for k in [&b"b"[..], &b"a"[..], &b"c"[..]] {
            tree.insert(k, k, vec![]).unwrap();
        }
        let ctx = SnapshotContext::latest_committed();
        let mut cursor = tree.open_cursor();
        let mut seen = Vec::new();
        tree.cursor_first(&mut cursor, &ctx, |k, _v| {
            seen.push(k.to_vec());
            CallbackResult::Accept
        })
        .unwrap();
        loop {
            let result = tree.cursor_next(&mut cursor, &ctx, |k, _v| {
                seen.push(k.to_vec());
                CallbackResult::Accept
            });
            match result {
                Ok(()) => {}
                Err(Error::NotFound) => break,
                Err(e) => panic!("cursor_next error: {e}"),
            }
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn snapshot_predating_a_provisional_delete_still_sees_old_value() {
        let tree = test_tree(EngineConfig::default());
        tree.insert(&b"a"[..], &b"1"[..], vec![]).unwrap();
        tree.delete(&b"a"[..], vec![Xid(5)]).unwrap();

        // A reader whose snapshot was taken before xid 5 became live should
        // still see the pre-delete committed value (§4.8).
        let old_snapshot = SnapshotContext::snapshot(SnapshotXid {
            root_xid: Xid(1),
            oldest_live_in_snapshot: Xid(0),
            snapshot_xid: Xid(1),
        });
        let mut found = None;
        tree.lookup(b"a", &old_snapshot, |_k, v| {
            found = Some(v.to_vec());
            CallbackResult::Accept
        })
        .unwrap();
        assert_eq!(found, Some(b"1".to_vec()));

        // latest-committed reads always see the most recent version,
        // committed or not.
        assert_eq!(lookup_value(&tree, b"a"), None);
    }

    #[test]
    fn committing_a_provisional_delete_makes_it_visible_to_everyone() {
        let tree = test_tree(EngineConfig::default());
        tree.insert(&b"a"[..], &b"1"[..], vec![]).unwrap();
        tree.delete(&b"a"[..], vec![Xid(5)]).unwrap();
        tree.commit(Xid(5)).unwrap();
        assert_eq!(lookup_value(&tree, b"a"), None);
    }

    #[test]
    fn truncate_resets_the_tree_to_empty() {
        let tree = test_tree(EngineConfig::default());
        tree.insert(&b"a"[..], &b"1"[..], vec![]).unwrap();
        tree.truncate().unwrap();
        assert_eq!(tree.stat64().nkeys, 0);
        assert_eq!(lookup_value(&tree, b"a"), None);
    }

    #[test]
    fn change_descriptor_bumps_dictionary_id() {
        let tree = test_tree(EngineConfig::default());
        let before = tree.header.snapshot().dictionary_id;
        tree.change_descriptor();
        assert_eq!(tree.header.snapshot().dictionary_id, before + 1);
    }

    #[test]
    fn noop_flattener_is_a_noop() {
        let tree = test_tree(EngineConfig::default());
        tree.insert(&b"a"[..], &b"1"[..], vec![]).unwrap();
        NoopFlattener.flatten(&tree).unwrap();
        assert_eq!(lookup_value(&tree, b"a"), Some(b"1".to_vec()));
    }
}
