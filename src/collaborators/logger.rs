//! The write-ahead / rollback logger (consumed, §6). Per-operation entries
//! (`enq_insert`, `enq_delete_any`, ...) and an optional
//! `force_fsync_on_commit` flag. The rollback log's inverse-record format
//! is out of scope (§1); operations are traced via the `log` crate so the
//! engine still has useful observability without owning WAL durability.

use crate::{cow_bytes::CowBytes, message::Xid};

pub trait Logger {
    fn enq_insert(&self, key: &CowBytes, val: &[u8]);
    fn enq_insert_no_overwrite(&self, key: &CowBytes, val: &[u8]);
    fn enq_delete_any(&self, key: &CowBytes);
    fn enq_update(&self, key: &CowBytes, extra: &[u8]);
    fn enq_update_broadcast(&self, extra: &[u8]);
    fn fcreate(&self);
    fn fopen(&self);
    fn fclose(&self);
    fn fassociate(&self, xid: Xid);
    fn suppress_rollback(&self, xid: Xid);
    fn force_fsync_on_commit(&self) -> bool;
}

/// Logs each call at `trace` level and otherwise does nothing; stands in
/// for a real WAL/rollback-log implementation (§1 explicit out-of-scope).
#[derive(Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn enq_insert(&self, key: &CowBytes, val: &[u8]) {
        log::trace!("enq_insert key={} bytes val={} bytes", key.len(), val.len());
    }
    fn enq_insert_no_overwrite(&self, key: &CowBytes, val: &[u8]) {
        log::trace!(
            "enq_insert_no_overwrite key={} bytes val={} bytes",
            key.len(),
            val.len()
        );
    }
    fn enq_delete_any(&self, key: &CowBytes) {
        log::trace!("enq_delete_any key={} bytes", key.len());
    }
    fn enq_update(&self, key: &CowBytes, extra: &[u8]) {
        log::trace!("enq_update key={} bytes extra={} bytes", key.len(), extra.len());
    }
    fn enq_update_broadcast(&self, extra: &[u8]) {
        log::trace!("enq_update_broadcast extra={} bytes", extra.len());
    }
    fn fcreate(&self) {
        log::debug!("fcreate");
    }
    fn fopen(&self) {
        log::debug!("fopen");
    }
    fn fclose(&self) {
        log::debug!("fclose");
    }
    fn fassociate(&self, xid: Xid) {
        log::trace!("fassociate xid={}", xid.0);
    }
    fn suppress_rollback(&self, xid: Xid) {
        log::trace!("suppress_rollback xid={}", xid.0);
    }
    fn force_fsync_on_commit(&self) -> bool {
        false
    }
}
