//! The per-file header (§3, §4.7): root block, nodesize, layout version,
//! dictionary id, panic string, msn counter, checkpoint lsn — and its
//! shadow-copy protocol for fuzzy checkpointing.

use parking_lot::RwLock;

use crate::{
    block::BlockNum,
    checksum::XxHash,
    error::Error,
    msn::Msn,
};

pub const CURRENT_LAYOUT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointState {
    /// No checkpoint in flight.
    Idle,
    /// `begin_checkpoint` has shallow-copied the header; writers may
    /// continue.
    InProgress,
}

/// The header singleton (§3). Two alternate on-disk slots back this
/// in-memory struct so the checkpoint swap (§4.7 step 4) is atomic.
#[derive(Debug, Clone)]
pub struct Header {
    pub layout_version: u32,
    pub nodesize: usize,
    pub flags: u32,
    pub root: BlockNum,
    pub root_hash: XxHash,
    pub dictionary_id: u64,
    pub msn_counter: Msn,
    pub checkpoint_lsn: u64,
    pub checkpoint_count: u64,
    /// Sticky panic string (§7): once set, every subsequent API call is a
    /// no-op returning this error.
    pub panic: Option<String>,
    pub txnid_that_created_when_empty: Option<u64>,
    pub txnid_that_suppressed_recovery: Option<u64>,
    pub dirty: bool,
}

impl Header {
    pub fn new(root: BlockNum, nodesize: usize) -> Self {
        Header {
            layout_version: CURRENT_LAYOUT_VERSION,
            nodesize,
            flags: 0,
            root,
            root_hash: XxHash::default(),
            dictionary_id: 1,
            msn_counter: Msn::ZERO,
            checkpoint_lsn: 0,
            checkpoint_count: 0,
            panic: None,
            txnid_that_created_when_empty: None,
            txnid_that_suppressed_recovery: None,
            dirty: true,
        }
    }

    pub fn is_panicked(&self) -> bool {
        self.panic.is_some()
    }
}

/// Owns the live [`Header`], its in-flight checkpoint shadow, and the
/// fuzzy-checkpoint state machine (§4.7):
///
/// 1. `begin_checkpoint(lsn)` shallow-copies the live header under the
///    header lock, marks the shadow `IN_PROGRESS`, clears the live header's
///    dirty bit.
/// 2. Dirty nodes keep flushing to disk (outside this type's concern; the
///    block allocator consults both translations, §6).
/// 3. `checkpoint(fd)` serializes the shadow if dirty, bumps
///    `checkpoint_count`, and on any I/O error sets the sticky panic.
/// 4. `end_checkpoint` fsyncs, swaps `checkpoint_lsn` on success, and frees
///    the shadow.
pub struct HeaderMgr {
    live: RwLock<Header>,
    shadow: RwLock<Option<Header>>,
    state: RwLock<CheckpointState>,
}

impl HeaderMgr {
    pub fn new(header: Header) -> Self {
        HeaderMgr {
            live: RwLock::new(header),
            shadow: RwLock::new(None),
            state: RwLock::new(CheckpointState::Idle),
        }
    }

    /// Returns the sticky panic error, if any, poisoning every subsequent
    /// operation (§7).
    pub fn check_panic(&self) -> Result<(), Error> {
        let live = self.live.read();
        if let Some(msg) = &live.panic {
            return Err(Error::Panicked(Box::new(Error::Io(msg.clone()))));
        }
        Ok(())
    }

    pub fn set_panic(&self, err: &Error) {
        log::error!("header panicked: {err}");
        self.live.write().panic = Some(err.to_string());
    }

    /// Stamps `msn_counter + 1` and returns it, the single global ordering
    /// source for `RootPut` (§4.4 step 2, §5 ordering guarantees).
    pub fn next_msn(&self) -> Msn {
        let mut live = self.live.write();
        let next = live.msn_counter.next();
        live.msn_counter = next;
        next
    }

    pub fn root(&self) -> BlockNum {
        self.live.read().root
    }

    pub fn set_root(&self, root: BlockNum, root_hash: XxHash) {
        let mut live = self.live.write();
        live.root = root;
        live.root_hash = root_hash;
        live.dirty = true;
    }

    pub fn nodesize(&self) -> usize {
        self.live.read().nodesize
    }

    /// `change_descriptor` (§6): bumps the dictionary id recorded in the
    /// header. The descriptor payload itself is opaque to this crate.
    pub fn bump_dictionary_id(&self) {
        let mut live = self.live.write();
        live.dictionary_id += 1;
        live.dirty = true;
    }

    pub fn snapshot(&self) -> Header {
        self.live.read().clone()
    }

    /// §4.7 step 1.
    pub fn begin_checkpoint(&self, lsn: u64) {
        let mut live = self.live.write();
        let mut shadow_header = live.clone();
        shadow_header.checkpoint_lsn = lsn;
        *self.shadow.write() = Some(shadow_header);
        *self.state.write() = CheckpointState::InProgress;
        live.dirty = false;
    }

    /// §4.7 step 3: serialize the shadow if dirty; on any error, panic the
    /// header.
    pub fn checkpoint<W: std::io::Write>(&self, mut fd: W) -> Result<(), Error> {
        let mut shadow = self.shadow.write();
        let Some(header) = shadow.as_mut() else {
            return Ok(());
        };
        if !header.dirty {
            return Ok(());
        }
        let encoded = bincode::serialize(&HeaderWire::from(&*header))
            .map_err(|e| Error::Io(e.to_string()))?;
        let result = fd.write_all(&encoded).map_err(Error::from);
        match result {
            Ok(()) => {
                header.checkpoint_count += 1;
                header.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.set_panic(&e);
                Err(e)
            }
        }
    }

    /// §4.7 step 4: fsync, swap `checkpoint_lsn`, free the shadow.
    pub fn end_checkpoint<F: FnOnce() -> std::io::Result<()>>(&self, fsync: F) -> Result<(), Error> {
        if let Err(e) = fsync().map_err(Error::from) {
            self.set_panic(&e);
            return Err(e);
        }
        let shadow = self.shadow.write().take();
        if let Some(shadow) = shadow {
            let mut live = self.live.write();
            live.checkpoint_lsn = shadow.checkpoint_lsn;
            live.checkpoint_count = shadow.checkpoint_count;
        }
        *self.state.write() = CheckpointState::Idle;
        Ok(())
    }

    pub fn checkpoint_state(&self) -> CheckpointState {
        *self.state.read()
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct HeaderWire {
    layout_version: u32,
    nodesize: u64,
    root: u64,
    msn_counter: u64,
    checkpoint_lsn: u64,
}

impl From<&Header> for HeaderWire {
    fn from(h: &Header) -> Self {
        HeaderWire {
            layout_version: h.layout_version,
            nodesize: h.nodesize as u64,
            root: h.root.0,
            msn_counter: h.msn_counter.0,
            checkpoint_lsn: h.checkpoint_lsn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> HeaderMgr {
        HeaderMgr::new(Header::new(BlockNum(1), 4096))
    }

    #[test]
    fn next_msn_is_monotone_and_starts_at_one() {
        let h = mgr();
        assert_eq!(h.next_msn(), Msn(1));
        assert_eq!(h.next_msn(), Msn(2));
        assert_eq!(h.next_msn(), Msn(3));
    }

    #[test]
    fn bump_dictionary_id_increments_and_marks_dirty() {
        let h = mgr();
        let before = h.snapshot().dictionary_id;
        h.checkpoint_state();
        h.bump_dictionary_id();
        let after = h.snapshot();
        assert_eq!(after.dictionary_id, before + 1);
        assert!(after.dirty);
    }

    #[test]
    fn checkpoint_cycle_clears_dirty_and_swaps_lsn() {
        let h = mgr();
        h.set_root(BlockNum(2), XxHash::default());
        assert!(h.snapshot().dirty);

        h.begin_checkpoint(42);
        assert_eq!(h.checkpoint_state(), CheckpointState::InProgress);
        // live header's dirty bit is cleared as soon as the shadow is taken.
        assert!(!h.snapshot().dirty);

        let mut buf = Vec::new();
        h.checkpoint(&mut buf).unwrap();
        assert!(!buf.is_empty());

        h.end_checkpoint(|| Ok(())).unwrap();
        assert_eq!(h.checkpoint_state(), CheckpointState::Idle);
        assert_eq!(h.snapshot().checkpoint_lsn, 42);
    }

    #[test]
    fn checkpoint_is_a_noop_without_begin_checkpoint() {
        let h = mgr();
        let mut buf = Vec::new();
        h.checkpoint(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn io_error_during_checkpoint_sticks_as_panic() {
        struct FailingWriter;
        impl std::io::Write for FailingWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let h = mgr();
        h.set_root(BlockNum(2), XxHash::default());
        h.begin_checkpoint(1);
        assert!(h.checkpoint(FailingWriter).is_err());
        assert!(h.check_panic().is_err());

        // the panic is sticky: a later, unrelated call observes it too.
        assert!(h.check_panic().is_err());
    }

    #[test]
    fn end_checkpoint_fsync_failure_panics_and_leaves_lsn_unswapped() {
        let h = mgr();
        h.begin_checkpoint(99);
        let err = h.end_checkpoint(|| {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "fsync failed"))
        });
        assert!(err.is_err());
        assert!(h.check_panic().is_err());
        assert_eq!(h.snapshot().checkpoint_lsn, 0);
    }
}
