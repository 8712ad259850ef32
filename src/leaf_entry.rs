//! `LeafEntry`: a variable-width MVCC record for one key (§3). Holds a
//! committed value (possibly a tombstone) plus a stack of uncommitted
//! versions, one per active transaction in the record's chain.

use crate::{
    cow_bytes::{CowBytes, SlicedCowBytes},
    message::Xid,
    mvcc::SnapshotContext,
    size::Size,
};

/// A single provisional (uncommitted) version, tagged by the xid that wrote
/// it.
#[derive(Debug, Clone)]
pub struct ProvisionalVersion {
    pub xid: Xid,
    /// `None` encodes a provisional delete.
    pub value: Option<SlicedCowBytes>,
}

/// One key's full MVCC history: the committed value plus a stack of
/// provisional versions (most recent last).
#[derive(Debug, Clone)]
pub struct LeafEntry {
    key: CowBytes,
    /// `None` is a committed tombstone.
    committed: Option<SlicedCowBytes>,
    provisional: Vec<ProvisionalVersion>,
}

impl LeafEntry {
    /// Created by the first `INSERT` at this key (§3 lifecycle).
    pub fn new_committed(key: CowBytes, value: SlicedCowBytes) -> Self {
        LeafEntry {
            key,
            committed: Some(value),
            provisional: Vec::new(),
        }
    }

    pub fn new_tombstone(key: CowBytes) -> Self {
        LeafEntry {
            key,
            committed: None,
            provisional: Vec::new(),
        }
    }

    pub fn keylen(&self) -> usize {
        self.key.len()
    }

    pub fn key(&self) -> &CowBytes {
        &self.key
    }

    /// Value and length of the most recent version in the chain (provisional
    /// if present, else committed).
    pub fn latest_val_and_len(&self) -> (Option<&SlicedCowBytes>, usize) {
        let v = self.latest_value();
        (v, v.map(|v| v.len()).unwrap_or(0))
    }

    fn latest_value(&self) -> Option<&SlicedCowBytes> {
        match self.provisional.last() {
            Some(p) => p.value.as_ref(),
            None => self.committed.as_ref(),
        }
    }

    pub fn latest_is_del(&self) -> bool {
        self.latest_value().is_none()
    }

    pub fn has_xids(&self, xids: &[Xid]) -> bool {
        self.provisional.iter().any(|p| xids.contains(&p.xid))
    }

    /// A clean entry has no provisional stack (committed-only), matching the
    /// definition used by `COMMIT_BROADCAST_ALL`/`OPTIMIZE` (§4.3 table).
    pub fn is_clean(&self) -> bool {
        self.provisional.is_empty()
    }

    pub fn is_dead(&self) -> bool {
        self.committed.is_none() && self.provisional.is_empty()
    }

    /// Visibility-filtered deletion check: walks the version stack from most
    /// to least recent, returning the first version visible under `ctx`.
    pub fn iterate_is_del(&self, ctx: &SnapshotContext) -> bool {
        self.visible_version(ctx).is_none()
    }

    pub fn iterate_val(&self, ctx: &SnapshotContext) -> Option<SlicedCowBytes> {
        self.visible_version(ctx).cloned()
    }

    fn visible_version(&self, ctx: &SnapshotContext) -> Option<&SlicedCowBytes> {
        if ctx.is_snapshot() {
            for p in self.provisional.iter().rev() {
                if ctx.does_txn_read_entry(p.xid) {
                    return p.value.as_ref();
                }
            }
            self.committed.as_ref()
        } else {
            self.latest_value()
        }
    }

    pub fn push_provisional(&mut self, xid: Xid, value: Option<SlicedCowBytes>) {
        self.provisional.push(ProvisionalVersion { xid, value });
    }

    /// `COMMIT_ANY`/`COMMIT_BROADCAST_*`: the named (or all) provisional
    /// version(s) become the committed value.
    pub fn commit(&mut self, xid: Option<Xid>) {
        match xid {
            Some(xid) => {
                if let Some(pos) = self.provisional.iter().position(|p| p.xid == xid) {
                    let v = self.provisional.remove(pos);
                    self.committed = v.value;
                    self.provisional.clear();
                }
            }
            None => {
                if let Some(last) = self.provisional.pop() {
                    self.committed = last.value;
                }
                self.provisional.clear();
            }
        }
    }

    /// `ABORT_ANY`/`ABORT_BROADCAST_TXN`: discard the named provisional
    /// version(s), leaving the committed value untouched.
    pub fn abort(&mut self, xid: Option<Xid>) {
        match xid {
            Some(xid) => self.provisional.retain(|p| p.xid != xid),
            None => self.provisional.clear(),
        }
    }

    pub fn set_committed(&mut self, value: Option<SlicedCowBytes>) {
        self.committed = value;
    }
}

impl Size for LeafEntry {
    fn size(&self) -> usize {
        let (_, vlen) = self.latest_val_and_len();
        self.keylen() + vlen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::SnapshotXid;

    fn key() -> CowBytes {
        b"k"[..].into()
    }

    fn val(b: u8) -> SlicedCowBytes {
        [b][..].into()
    }

    #[test]
    fn committed_only_entry_is_clean() {
        let e = LeafEntry::new_committed(key(), val(1));
        assert!(e.is_clean());
        assert!(!e.is_dead());
        assert_eq!(e.latest_val_and_len().0.unwrap().as_ref(), &[1]);
    }

    #[test]
    fn tombstone_with_no_provisional_is_dead() {
        let e = LeafEntry::new_tombstone(key());
        assert!(e.is_dead());
        assert!(e.latest_is_del());
    }

    #[test]
    fn provisional_delete_is_not_dead_until_committed() {
        let mut e = LeafEntry::new_committed(key(), val(1));
        e.push_provisional(Xid(5), None);
        assert!(!e.is_clean());
        assert!(!e.is_dead());
        assert!(e.latest_is_del());

        e.commit(Some(Xid(5)));
        assert!(e.is_clean());
        assert!(e.is_dead());
    }

    #[test]
    fn abort_discards_provisional_and_restores_committed() {
        let mut e = LeafEntry::new_committed(key(), val(1));
        e.push_provisional(Xid(5), Some(val(2)));
        assert_eq!(e.latest_val_and_len().0.unwrap().as_ref(), &[2]);

        e.abort(Some(Xid(5)));
        assert!(e.is_clean());
        assert_eq!(e.latest_val_and_len().0.unwrap().as_ref(), &[1]);
    }

    #[test]
    fn commit_none_commits_the_last_provisional_and_clears_the_stack() {
        let mut e = LeafEntry::new_committed(key(), val(1));
        e.push_provisional(Xid(5), Some(val(2)));
        e.push_provisional(Xid(6), Some(val(3)));
        e.commit(None);
        assert!(e.is_clean());
        assert_eq!(e.latest_val_and_len().0.unwrap().as_ref(), &[3]);
    }

    #[test]
    fn latest_committed_context_sees_the_uncommitted_write() {
        let mut e = LeafEntry::new_committed(key(), val(1));
        e.push_provisional(Xid(5), Some(val(2)));
        let ctx = SnapshotContext::latest_committed();
        assert_eq!(e.iterate_val(&ctx).unwrap().as_ref(), &[2]);
        assert!(!e.iterate_is_del(&ctx));
    }

    #[test]
    fn snapshot_sees_own_writes_via_root_xid() {
        let mut e = LeafEntry::new_committed(key(), val(1));
        e.push_provisional(Xid(5), Some(val(2)));
        let ctx = SnapshotContext::snapshot(SnapshotXid {
            root_xid: Xid(5),
            oldest_live_in_snapshot: Xid(0),
            snapshot_xid: Xid(10),
        });
        assert_eq!(e.iterate_val(&ctx).unwrap().as_ref(), &[2]);
    }

    #[test]
    fn snapshot_before_the_write_falls_back_to_committed() {
        let mut e = LeafEntry::new_committed(key(), val(1));
        e.push_provisional(Xid(20), Some(val(2)));
        // xid 20 is neither the reader's own root xid, nor older than every
        // live snapshot root, nor (since it's >= snapshot_xid) excluded by
        // the live-root-list clause — so it's invisible and we fall back to
        // the committed value.
        let ctx = SnapshotContext::snapshot(SnapshotXid {
            root_xid: Xid(99),
            oldest_live_in_snapshot: Xid(1),
            snapshot_xid: Xid(5),
        });
        assert_eq!(e.iterate_val(&ctx).unwrap().as_ref(), &[1]);
    }

    #[test]
    fn snapshot_older_than_oldest_live_root_sees_the_write() {
        let mut e = LeafEntry::new_committed(key(), val(1));
        e.push_provisional(Xid(3), Some(val(2)));
        let ctx = SnapshotContext::snapshot(SnapshotXid {
            root_xid: Xid(99),
            oldest_live_in_snapshot: Xid(10),
            snapshot_xid: Xid(50),
        });
        assert_eq!(e.iterate_val(&ctx).unwrap().as_ref(), &[2]);
    }
}
