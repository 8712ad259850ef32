//! The transaction manager (consumed, §6): `txn_get_xids`, `get_root_xid`,
//! `get_oldest_in_live_root_list`, `is_in_live_root_list`, `snapshot_xid`.
//! Transaction ids, live-lists, and snapshot xid sets are out of scope
//! (§1); this is a minimal in-memory stand-in that hands out monotone xids
//! and tracks which are still "live".

use std::{
    collections::HashSet,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use crate::{message::Xid, mvcc::LiveRootList};

pub trait TransactionManager {
    type Txn;

    fn txn_get_xids(&self, txn: &Self::Txn) -> Vec<Xid>;
    fn get_root_xid(&self, txn: &Self::Txn) -> Xid;
    fn get_oldest_in_live_root_list(&self) -> Xid;
    fn is_in_live_root_list(&self, xid: Xid) -> bool;
    fn snapshot_xid(&self, txn: &Self::Txn) -> Xid;
}

#[derive(Debug, Clone, Copy)]
pub struct InMemoryTxn {
    pub xid: Xid,
}

pub struct InMemoryTxnManager {
    next_xid: AtomicU64,
    live: Mutex<HashSet<Xid>>,
}

impl Default for InMemoryTxnManager {
    fn default() -> Self {
        InMemoryTxnManager {
            next_xid: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
        }
    }
}

impl InMemoryTxnManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> InMemoryTxn {
        let xid = Xid(self.next_xid.fetch_add(1, Ordering::SeqCst));
        self.live.lock().insert(xid);
        InMemoryTxn { xid }
    }

    pub fn commit(&self, txn: InMemoryTxn) {
        self.live.lock().remove(&txn.xid);
    }

    pub fn abort(&self, txn: InMemoryTxn) {
        self.live.lock().remove(&txn.xid);
    }
}

impl TransactionManager for InMemoryTxnManager {
    type Txn = InMemoryTxn;

    fn txn_get_xids(&self, txn: &InMemoryTxn) -> Vec<Xid> {
        vec![txn.xid]
    }

    fn get_root_xid(&self, txn: &InMemoryTxn) -> Xid {
        txn.xid
    }

    fn get_oldest_in_live_root_list(&self) -> Xid {
        self.live
            .lock()
            .iter()
            .min_by_key(|x| x.0)
            .copied()
            .unwrap_or(Xid(u64::MAX))
    }

    fn is_in_live_root_list(&self, xid: Xid) -> bool {
        self.live.lock().contains(&xid)
    }

    fn snapshot_xid(&self, txn: &InMemoryTxn) -> Xid {
        txn.xid
    }
}

impl LiveRootList for InMemoryTxnManager {
    fn is_in_live_root_list(&self, xid: Xid) -> bool {
        TransactionManager::is_in_live_root_list(self, xid)
    }
}
