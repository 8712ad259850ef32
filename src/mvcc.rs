//! MVCC visibility, per spec §4.8:
//!
//! ```text
//! does_txn_read_entry(xid, ctx) =
//!     xid == ctx.root_xid
//!     OR xid < ctx.oldest_live_in_snapshot
//!     OR (xid < ctx.snapshot_xid AND xid NOT IN ctx.live_root_list)
//! ```

use crate::message::Xid;

/// A read's visibility context, built from the (external) transaction
/// manager's `txn_get_xids`/`get_root_xid`/`get_oldest_in_live_root_list`/
/// `is_in_live_root_list`/`snapshot_xid` (§6).
#[derive(Debug, Clone)]
pub struct SnapshotContext {
    /// `None` for non-snapshot (latest-committed) reads.
    pub snapshot: Option<SnapshotXid>,
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotXid {
    pub root_xid: Xid,
    pub oldest_live_in_snapshot: Xid,
    pub snapshot_xid: Xid,
}

/// The (external) transaction manager's live-root-list membership check,
/// abstracted so `does_txn_read_entry` doesn't need to depend on a concrete
/// transaction manager implementation.
pub trait LiveRootList {
    fn is_in_live_root_list(&self, xid: Xid) -> bool;
}

impl SnapshotContext {
    pub fn latest_committed() -> Self {
        SnapshotContext { snapshot: None }
    }

    pub fn snapshot(s: SnapshotXid) -> Self {
        SnapshotContext { snapshot: Some(s) }
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Evaluate the predicate. For non-snapshot contexts everything is
    /// trivially visible (callers instead use the latest-committed value
    /// directly; see [`crate::leaf_entry::LeafEntry::iterate_val`]).
    pub fn does_txn_read_entry(&self, xid: Xid) -> bool {
        self.does_txn_read_entry_with(xid, &NoLiveRootList)
    }

    pub fn does_txn_read_entry_with(&self, xid: Xid, live: &dyn LiveRootList) -> bool {
        let Some(s) = self.snapshot else {
            return true;
        };
        xid == s.root_xid
            || xid < s.oldest_live_in_snapshot
            || (xid < s.snapshot_xid && !live.is_in_live_root_list(xid))
    }
}

struct NoLiveRootList;
impl LiveRootList for NoLiveRootList {
    fn is_in_live_root_list(&self, _xid: Xid) -> bool {
        false
    }
}
