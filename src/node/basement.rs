//! `BasementNode` (§3, §4.2): the per-leaf-child-slot ordered sequence of
//! `LeafEntry` records, plus [`MessageApplier`]'s `apply_once` contract
//! (§4.3) that mutates one basement in response to one message.

use std::cmp::Ordering;

use crate::{
    cow_bytes::{CowBytes, SlicedCowBytes},
    leaf_entry::LeafEntry,
    message::{Message, MessageType},
    msn::Msn,
    node::SubtreeEstimate,
    size::Size,
};

/// A pluggable total order over keys (§6 "User comparator"). Defaults to
/// byte-lexicographic order.
pub trait Comparator: Send + Sync {
    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering;
}

#[derive(Default)]
pub struct LexicographicComparator;

impl Comparator for LexicographicComparator {
    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// The user `update(db, key, old_latest_val, extra, set_val, set_extra)`
/// function (§6). `NoCall` means the message is dropped with no effect;
/// `SetVal(Some(v))` synthesizes an in-place `INSERT`; `SetVal(None)`
/// synthesizes a `DELETE_ANY` (§4.3 `UPDATE` row).
pub enum UpdateOutcome {
    NoCall,
    SetVal(Option<SlicedCowBytes>),
}

pub trait UpdateFn: Send + Sync {
    fn apply(&self, key: &[u8], old: Option<&SlicedCowBytes>, extra: &[u8]) -> UpdateOutcome;
}

/// `update_fn(db, key, ...)` that always leaves the entry untouched; used
/// where no user update function was configured.
#[derive(Default)]
pub struct NoopUpdateFn;

impl UpdateFn for NoopUpdateFn {
    fn apply(&self, _key: &[u8], _old: Option<&SlicedCowBytes>, _extra: &[u8]) -> UpdateOutcome {
        UpdateOutcome::NoCall
    }
}

/// The per-leaf-child-slot collection of leaf entries (§3, §4.2).
#[derive(Debug)]
pub struct BasementNode {
    entries: Vec<LeafEntry>,
    n_bytes_in_buffer: usize,
    /// Running right-edge insert streak (§4.3 sequential-insert heuristic).
    seqinsert: u32,
    /// Cleared whenever a message arrives above; set by ancestor replay
    /// once fully caught up (§4.4).
    soft_copy_is_up_to_date: bool,
    /// Version tag bumped by `OPTIMIZE_FOR_UPGRADE`; MVCC visibility is the
    /// sole authority on what is actually visible (SPEC_FULL.md Open
    /// Question 2).
    optimized_for_upgrade: u64,
    /// Highest MSN already applied to this basement; messages at or below
    /// this are dropped for idempotence (§3, §5 invariant 2).
    max_msn_applied: Msn,
}

impl Default for BasementNode {
    fn default() -> Self {
        BasementNode {
            entries: Vec::new(),
            n_bytes_in_buffer: 0,
            seqinsert: 0,
            soft_copy_is_up_to_date: true,
            optimized_for_upgrade: 0,
            max_msn_applied: Msn::ZERO,
        }
    }
}

impl BasementNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LeafEntry] {
        &self.entries
    }

    pub fn bytes(&self) -> usize {
        self.n_bytes_in_buffer
    }

    pub fn soft_copy_is_up_to_date(&self) -> bool {
        self.soft_copy_is_up_to_date
    }

    pub fn mark_replayed(&mut self, msn: Msn) {
        self.soft_copy_is_up_to_date = true;
        if msn > self.max_msn_applied {
            self.max_msn_applied = msn;
        }
    }

    pub fn max_msn_applied(&self) -> Msn {
        self.max_msn_applied
    }

    pub fn optimized_for_upgrade_tag(&self) -> u64 {
        self.optimized_for_upgrade
    }

    pub fn find_idx(&self, cmp: &dyn Comparator, key: &[u8]) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| cmp.cmp(e.key(), key))
    }

    /// Seed entries directly (used by split/merge to move ranges between
    /// basements without re-running message application).
    pub fn from_entries(entries: Vec<LeafEntry>) -> Self {
        let n_bytes_in_buffer = entries.iter().map(|e| e.size()).sum();
        BasementNode {
            entries,
            n_bytes_in_buffer,
            seqinsert: 0,
            soft_copy_is_up_to_date: true,
            optimized_for_upgrade: 0,
            max_msn_applied: Msn::ZERO,
        }
    }

    pub fn split_off_tail(&mut self, at: usize) -> Vec<LeafEntry> {
        let tail = self.entries.split_off(at);
        self.n_bytes_in_buffer = self.entries.iter().map(|e| e.size()).sum();
        tail
    }

    pub fn append_entries(&mut self, mut tail: Vec<LeafEntry>) {
        self.n_bytes_in_buffer += tail.iter().map(|e| e.size()).sum::<usize>();
        self.entries.append(&mut tail);
    }
}

/// Applies one message to one basement, implementing the §4.3 dispatch
/// table.
pub struct MessageApplier<'a> {
    pub cmp: &'a dyn Comparator,
    pub update_fn: &'a dyn UpdateFn,
    pub seqinsert_window_cap: usize,
}

impl<'a> MessageApplier<'a> {
    pub fn apply_once(&self, bn: &mut BasementNode, se: &mut SubtreeEstimate, msg: &Message) {
        // Idempotence (§3, §5 invariant 2): already-applied messages are a
        // no-op.
        if msg.msn <= bn.max_msn_applied && msg.msn != Msn::ZERO {
            return;
        }

        match &msg.ty {
            MessageType::Insert | MessageType::InsertNoOverwrite => {
                self.apply_insert(bn, se, msg, msg.ty == MessageType::InsertNoOverwrite);
            }
            MessageType::DeleteAny | MessageType::AbortAny | MessageType::CommitAny => {
                self.apply_keyed_forward_scan(bn, se, msg);
            }
            MessageType::CommitBroadcastAll => {
                self.for_each_not_clean(bn, se, |e| e.commit(None));
            }
            MessageType::Optimize | MessageType::OptimizeForUpgrade => {
                bn.optimized_for_upgrade += 1;
                self.for_each_not_clean(bn, se, |e| e.commit(None));
            }
            MessageType::CommitBroadcastTxn => {
                self.for_each_with_xids(bn, se, &msg.xids, |e| {
                    for xid in &msg.xids {
                        e.commit(Some(*xid));
                    }
                });
            }
            MessageType::AbortBroadcastTxn => {
                self.for_each_with_xids(bn, se, &msg.xids, |e| {
                    for xid in &msg.xids {
                        e.abort(Some(*xid));
                    }
                });
            }
            MessageType::Update => {
                self.apply_update(bn, se, msg);
            }
            MessageType::UpdateBroadcastAll => {
                self.apply_update_broadcast(bn, se, msg);
            }
            MessageType::None => {}
        }

        bn.max_msn_applied = bn.max_msn_applied.max(msg.msn);
    }

    fn apply_insert(
        &self,
        bn: &mut BasementNode,
        se: &mut SubtreeEstimate,
        msg: &Message,
        no_overwrite: bool,
    ) {
        let is_right_edge = bn
            .entries
            .last()
            .map(|e| self.cmp.cmp(e.key(), &msg.key) == Ordering::Less)
            .unwrap_or(true);

        match bn.find_idx(self.cmp, &msg.key) {
            Ok(idx) => {
                if no_overwrite {
                    // Key already present: INSERT_NO_OVERWRITE is a no-op.
                    return;
                }
                let old_size = bn.entries[idx].size();
                bn.entries[idx] =
                    LeafEntry::new_committed(msg.key.clone(), msg.value.clone());
                let new_size = bn.entries[idx].size();
                bn.n_bytes_in_buffer = bn.n_bytes_in_buffer.saturating_sub(old_size) + new_size;
                se.dsize = se.dsize.saturating_sub(old_size as u64) + new_size as u64;
            }
            Err(idx) => {
                let entry = LeafEntry::new_committed(msg.key.clone(), msg.value.clone());
                let size = entry.size();
                bn.entries.insert(idx, entry);
                bn.n_bytes_in_buffer += size;
                se.dsize += size as u64;
                se.nkeys += 1;
                self.note_insert_position(bn, idx, is_right_edge);
            }
        }
    }

    fn note_insert_position(&self, bn: &mut BasementNode, idx: usize, is_right_edge: bool) {
        let window = self.seqinsert_window_cap.min((bn.bytes() / 16).max(1));
        let distance_from_edge = bn.entries.len().saturating_sub(idx + 1);
        if is_right_edge || distance_from_edge <= window {
            bn.seqinsert = bn.seqinsert.saturating_add(1);
        } else {
            bn.seqinsert = 0;
        }
    }

    /// In a streak, the basement should not be considered for `FUSIBLE`
    /// classification (§4.1).
    pub fn in_sequential_insert_streak(bn: &BasementNode) -> bool {
        bn.seqinsert > 0
    }

    fn apply_keyed_forward_scan(&self, bn: &mut BasementNode, se: &mut SubtreeEstimate, msg: &Message) {
        let Ok(start) = bn.find_idx(self.cmp, &msg.key) else {
            return;
        };
        let mut idx = start;
        while idx < bn.entries.len() && self.cmp.cmp(bn.entries[idx].key(), &msg.key) == Ordering::Equal {
            self.apply_dispatch_to_entry(bn, se, idx, &msg.ty, &msg.xids, &msg.value);
            idx += 1;
        }
        self.purge_dead(bn, se);
    }

    fn apply_dispatch_to_entry(
        &self,
        bn: &mut BasementNode,
        se: &mut SubtreeEstimate,
        idx: usize,
        ty: &MessageType,
        xids: &[crate::message::Xid],
        value: &SlicedCowBytes,
    ) {
        let old_size = bn.entries[idx].size();
        match ty {
            MessageType::DeleteAny => {
                bn.entries[idx].push_provisional(
                    xids.first().copied().unwrap_or(crate::message::Xid(0)),
                    None,
                );
                if xids.is_empty() {
                    bn.entries[idx].set_committed(None);
                }
            }
            MessageType::AbortAny => bn.entries[idx].abort(xids.first().copied()),
            MessageType::CommitAny => bn.entries[idx].commit(xids.first().copied()),
            MessageType::Update => {
                // handled by apply_update; unreachable via this path.
                let _ = value;
            }
            _ => {}
        }
        let new_size = bn.entries[idx].size();
        bn.n_bytes_in_buffer = bn.n_bytes_in_buffer.saturating_sub(old_size) + new_size;
        se.dsize = se.dsize.saturating_sub(old_size as u64) + new_size as u64;
    }

    fn for_each_not_clean(
        &self,
        bn: &mut BasementNode,
        se: &mut SubtreeEstimate,
        mut f: impl FnMut(&mut LeafEntry),
    ) {
        for e in bn.entries.iter_mut() {
            if !e.is_clean() {
                let old = e.size();
                f(e);
                let new = e.size();
                se.dsize = se.dsize.saturating_sub(old as u64) + new as u64;
            }
        }
        self.purge_dead(bn, se);
    }

    fn for_each_with_xids(
        &self,
        bn: &mut BasementNode,
        se: &mut SubtreeEstimate,
        xids: &[crate::message::Xid],
        mut f: impl FnMut(&mut LeafEntry),
    ) {
        for e in bn.entries.iter_mut() {
            if e.has_xids(xids) {
                let old = e.size();
                f(e);
                let new = e.size();
                se.dsize = se.dsize.saturating_sub(old as u64) + new as u64;
            }
        }
        self.purge_dead(bn, se);
    }

    fn apply_update(&self, bn: &mut BasementNode, se: &mut SubtreeEstimate, msg: &Message) {
        if let Ok(idx) = bn.find_idx(self.cmp, &msg.key) {
            self.run_update_at(bn, se, idx, &msg.value);
            self.purge_dead(bn, se);
        }
    }

    fn apply_update_broadcast(&self, bn: &mut BasementNode, se: &mut SubtreeEstimate, msg: &Message) {
        let mut idx = 0;
        while idx < bn.entries.len() {
            self.run_update_at(bn, se, idx, &msg.value);
            idx += 1;
        }
        self.purge_dead(bn, se);
    }

    fn run_update_at(
        &self,
        bn: &mut BasementNode,
        se: &mut SubtreeEstimate,
        idx: usize,
        extra: &[u8],
    ) {
        let key = bn.entries[idx].key().clone();
        let old = bn.entries[idx].latest_val_and_len().0.cloned();
        let outcome = self.update_fn.apply(&key, old.as_ref(), extra);
        let old_size = bn.entries[idx].size();
        match outcome {
            UpdateOutcome::NoCall => {}
            UpdateOutcome::SetVal(Some(v)) => bn.entries[idx].set_committed(Some(v)),
            UpdateOutcome::SetVal(None) => bn.entries[idx].set_committed(None),
        }
        let new_size = bn.entries[idx].size();
        bn.n_bytes_in_buffer = bn.n_bytes_in_buffer.saturating_sub(old_size) + new_size;
        se.dsize = se.dsize.saturating_sub(old_size as u64) + new_size as u64;
    }

    /// Remove entries whose committed value is a tombstone with no live
    /// provisional versions (§3 LeafEntry lifecycle).
    fn purge_dead(&self, bn: &mut BasementNode, se: &mut SubtreeEstimate) {
        let before = bn.entries.len();
        bn.entries.retain(|e| !e.is_dead());
        let removed = before - bn.entries.len();
        if removed > 0 {
            se.nkeys = se.nkeys.saturating_sub(removed as u64);
            bn.n_bytes_in_buffer = bn.entries.iter().map(|e| e.size()).sum();
        }
    }
}

pub fn default_comparator() -> LexicographicComparator {
    LexicographicComparator
}

/// Helper used by keys that insert as `CowBytes`, to avoid borrowing `&[u8]`
/// against the caller's `msg.key: CowBytes` field.
pub fn owned_key(key: &CowBytes) -> CowBytes {
    key.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{message::Message, node::SubtreeEstimate};

    fn applier() -> (LexicographicComparator, NoopUpdateFn) {
        (LexicographicComparator, NoopUpdateFn)
    }

    fn msg(ty: MessageType, key: &[u8], value: &[u8], msn: u64) -> Message {
        let mut m = Message::new(ty, key.into(), value.into());
        m.stamp(Msn(msn));
        m
    }

    #[test]
    fn insert_then_lookup() {
        let (cmp, update_fn) = applier();
        let applier = MessageApplier { cmp: &cmp, update_fn: &update_fn, seqinsert_window_cap: 32 };
        let mut bn = BasementNode::new();
        let mut se = SubtreeEstimate::zero();
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::Insert, b"a", b"1", 1));
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::Insert, b"b", b"2", 2));
        assert_eq!(bn.len(), 2);
        assert_eq!(se.nkeys, 2);
        assert_eq!(bn.find_idx(&cmp, b"a"), Ok(0));
        assert_eq!(bn.find_idx(&cmp, b"c"), Err(2));
    }

    #[test]
    fn insert_no_overwrite_is_noop_on_existing_key() {
        let (cmp, update_fn) = applier();
        let applier = MessageApplier { cmp: &cmp, update_fn: &update_fn, seqinsert_window_cap: 32 };
        let mut bn = BasementNode::new();
        let mut se = SubtreeEstimate::zero();
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::Insert, b"a", b"1", 1));
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::InsertNoOverwrite, b"a", b"2", 2));
        assert_eq!(bn.entries()[0].latest_val_and_len().0.unwrap().as_ref(), b"1");
    }

    #[test]
    fn delete_any_with_no_xid_commits_tombstone_immediately() {
        let (cmp, update_fn) = applier();
        let applier = MessageApplier { cmp: &cmp, update_fn: &update_fn, seqinsert_window_cap: 32 };
        let mut bn = BasementNode::new();
        let mut se = SubtreeEstimate::zero();
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::Insert, b"a", b"1", 1));
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::DeleteAny, b"a", b"", 2));
        assert!(bn.is_empty());
        assert_eq!(se.nkeys, 0);
    }

    #[test]
    fn messages_at_or_below_max_msn_applied_are_idempotent() {
        let (cmp, update_fn) = applier();
        let applier = MessageApplier { cmp: &cmp, update_fn: &update_fn, seqinsert_window_cap: 32 };
        let mut bn = BasementNode::new();
        let mut se = SubtreeEstimate::zero();
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::Insert, b"a", b"1", 5));
        // Same msn replayed again (e.g. via overlapping ancestor buffers)
        // must not re-run the insert or double-count the estimate.
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::Insert, b"a", b"2", 5));
        assert_eq!(bn.entries()[0].latest_val_and_len().0.unwrap().as_ref(), b"1");
        assert_eq!(se.nkeys, 1);
    }

    #[test]
    fn sequential_right_edge_inserts_enter_a_streak() {
        let (cmp, update_fn) = applier();
        let applier = MessageApplier { cmp: &cmp, update_fn: &update_fn, seqinsert_window_cap: 32 };
        let mut bn = BasementNode::new();
        let mut se = SubtreeEstimate::zero();
        for i in 0..10u8 {
            applier.apply_once(&mut bn, &mut se, &msg(MessageType::Insert, &[i], b"v", i as u64 + 1));
        }
        assert!(MessageApplier::in_sequential_insert_streak(&bn));
    }

    #[test]
    fn update_synthesizes_insert_via_set_val() {
        struct DoubleIt;
        impl UpdateFn for DoubleIt {
            fn apply(&self, _key: &[u8], old: Option<&SlicedCowBytes>, _extra: &[u8]) -> UpdateOutcome {
                let n: u8 = old.map(|v| v[0]).unwrap_or(0);
                UpdateOutcome::SetVal(Some([n + 1][..].into()))
            }
        }
        let cmp = LexicographicComparator;
        let update_fn = DoubleIt;
        let applier = MessageApplier { cmp: &cmp, update_fn: &update_fn, seqinsert_window_cap: 32 };
        let mut bn = BasementNode::new();
        let mut se = SubtreeEstimate::zero();
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::Insert, b"a", &[1], 1));
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::Update, b"a", b"", 2));
        assert_eq!(bn.entries()[0].latest_val_and_len().0.unwrap().as_ref(), &[2]);
    }

    #[test]
    fn optimize_commits_every_provisional_version() {
        let (cmp, update_fn) = applier();
        let applier = MessageApplier { cmp: &cmp, update_fn: &update_fn, seqinsert_window_cap: 32 };
        let mut bn = BasementNode::new();
        let mut se = SubtreeEstimate::zero();
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::Insert, b"a", b"1", 1));
        applier.apply_once(&mut bn, &mut se, &msg(MessageType::DeleteAny, b"a", b"", 2));
        // without an xid this already committed the tombstone; exercise the
        // xid-tagged path instead so OPTIMIZE has something to clean up.
        let mut bn2 = BasementNode::new();
        let mut se2 = SubtreeEstimate::zero();
        applier.apply_once(&mut bn2, &mut se2, &msg(MessageType::Insert, b"a", b"1", 1));
        let mut delete_with_xid = msg(MessageType::DeleteAny, b"a", b"", 2);
        delete_with_xid.xids = vec![crate::message::Xid(7)];
        applier.apply_once(&mut bn2, &mut se2, &delete_with_xid);
        assert!(!bn2.entries()[0].is_clean());
        applier.apply_once(&mut bn2, &mut se2, &msg(MessageType::Optimize, b"", b"", 3));
        assert!(bn2.is_empty() || bn2.entries()[0].is_clean());
    }
}
