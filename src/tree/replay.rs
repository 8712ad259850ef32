//! `AncestorReplay` (§4.4): brings a leaf's single basement up to date by
//! walking the ancestor chain nearest-to-farthest and draining each
//! ancestor's relevant child buffer into it.
//!
//! The buffered-leaf layout here holds exactly one basement per leaf node
//! (see `DESIGN.md`), so "for each basement `i`" degenerates to the single
//! slot 0.

use crate::{
    message::Message,
    msn::Msn,
    node::{
        basement::{Comparator, MessageApplier, UpdateFn},
        Node,
    },
};

/// Runs `apply_once` over every message in every ancestor buffer the descent
/// passed through (nearest first) whose `msn > leaf.max_msn_on_disk`, then
/// marks the leaf's basement caught up. Buffers are passed as owned
/// snapshots since the page cache only lends nodes for the duration of one
/// callback (§6).
///
/// Key-bounds filtering (§4.4: "whose key ... lies within this basement's
/// pivot bounds") is a no-op here since a leaf holds a single basement
/// spanning its entire key range (`DESIGN.md`).
pub fn ancestor_replay<CMP: Comparator, UF: UpdateFn>(
    leaf: &mut Node,
    ancestor_buffers: &[Vec<Message>],
    cmp: &CMP,
    update_fn: &UF,
    seqinsert_window_cap: usize,
) {
    debug_assert!(leaf.is_leaf());
    let slot = &mut leaf.children[0];
    if let crate::node::ChildPayload::Basement(bn) = &slot.payload {
        if bn.soft_copy_is_up_to_date() {
            return;
        }
    }

    let applier = MessageApplier {
        cmp,
        update_fn,
        seqinsert_window_cap,
    };
    let mut max_seen = leaf.max_msn_on_disk;
    if let crate::node::ChildPayload::Basement(bn) = &mut slot.payload {
        for buffer in ancestor_buffers {
            for msg in buffer {
                if msg.msn > leaf.max_msn_on_disk {
                    applier.apply_once(bn, &mut slot.estimate, msg);
                    if msg.msn > max_seen {
                        max_seen = msg.msn;
                    }
                }
            }
        }
        bn.mark_replayed(max_seen);
    }
    leaf.max_msn_in_memory = leaf.max_msn_in_memory.max(max_seen);
}

pub fn bump_max_msn_on_disk(leaf: &mut Node, msn: Msn) {
    leaf.max_msn_on_disk = leaf.max_msn_on_disk.max(msn);
}
